//! Channel identity, directory records, and broker topic derivation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel record returned by the directory's channel lookup.
///
/// Only the identifiers are interpreted; everything else is kept in `extra`
/// and handed back to callers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: u64,
    pub slug: String,
    #[serde(default)]
    pub user: Option<ChannelUser>,
    pub chatroom: ChatroomRef,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelUser {
    pub username: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatroomRef {
    pub id: u64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Chatroom configuration returned by the directory's chatroom lookup.
/// Opaque to the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatroomInfo(pub serde_json::Value);

/// One joined Kick channel.
///
/// Identifiers are fixed at construction. Channels are shared as
/// `Arc<Channel>` with every notification and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    info: ChannelInfo,
    chatroom: ChatroomInfo,
    name: String,
}

impl Channel {
    pub fn new(name: impl Into<String>, info: ChannelInfo, chatroom: ChatroomInfo) -> Self {
        Self {
            info,
            chatroom,
            name: name.into(),
        }
    }

    /// Numeric channel id.
    pub fn id(&self) -> u64 {
        self.info.id
    }

    pub fn chatroom_id(&self) -> u64 {
        self.info.chatroom.id
    }

    /// Normalized name this channel was joined under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.info.slug
    }

    /// Display name of the channel owner, falling back to the slug.
    pub fn username(&self) -> &str {
        self.info
            .user
            .as_ref()
            .map_or(self.info.slug.as_str(), |u| u.username.as_str())
    }

    pub fn info(&self) -> &ChannelInfo {
        &self.info
    }

    pub fn chatroom(&self) -> &ChatroomInfo {
        &self.chatroom
    }

    /// The primary topic; its subscription ack confirms a join.
    pub fn primary_topic(&self) -> String {
        format!("chatrooms.{}.v2", self.chatroom_id())
    }

    /// Every topic this channel occupies on the broker. Always subscribed and
    /// unsubscribed as a set.
    pub fn topics(&self) -> [String; 5] {
        let room = self.chatroom_id();
        let id = self.id();
        [
            format!("chatrooms.{room}.v2"),
            format!("chatroom_{room}"),
            format!("channel_{id}"),
            format!("channel.{id}"),
            format!("predictions-channel-{id}"),
        ]
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.username())
    }
}

/// Normalize a user-supplied channel name: trim, lowercase, drop one leading `#`.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_prefix('#') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Which registry index a topic resolves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicRef {
    Chatroom(u64),
    Channel(u64),
}

/// Parse a broker topic back into the id it was derived from.
pub fn parse_topic(topic: &str) -> Option<TopicRef> {
    if let Some(rest) = topic.strip_prefix("chatrooms.") {
        return rest
            .strip_suffix(".v2")
            .and_then(|id| id.parse().ok())
            .map(TopicRef::Chatroom);
    }
    if let Some(id) = topic.strip_prefix("chatroom_") {
        return id.parse().ok().map(TopicRef::Chatroom);
    }
    if let Some(id) = topic.strip_prefix("predictions-channel-") {
        return id.parse().ok().map(TopicRef::Channel);
    }
    topic
        .strip_prefix("channel_")
        .or_else(|| topic.strip_prefix("channel."))
        .and_then(|id| id.parse().ok())
        .map(TopicRef::Channel)
}

#[cfg(test)]
pub(crate) fn test_channel(name: &str, id: u64, chatroom_id: u64) -> Channel {
    let info: ChannelInfo = serde_json::from_value(serde_json::json!({
        "id": id,
        "slug": name,
        "user": {"username": name.to_uppercase()},
        "chatroom": {"id": chatroom_id},
    }))
    .unwrap();
    Channel::new(name, info, ChatroomInfo::default())
}
