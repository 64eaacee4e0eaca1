//! Channel registry: normalized name and chatroom id indexes kept in lockstep.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::{Channel, TopicRef, parse_topic};

#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    by_name: HashMap<String, Arc<Channel>>,
    by_chatroom: HashMap<u64, Arc<Channel>>,
}

impl ChannelRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<Channel>> {
        self.by_name.get(name)
    }

    pub fn get_by_chatroom(&self, chatroom_id: u64) -> Option<&Arc<Channel>> {
        self.by_chatroom.get(&chatroom_id)
    }

    pub fn get_by_channel_id(&self, id: u64) -> Option<&Arc<Channel>> {
        self.by_name.values().find(|c| c.id() == id)
    }

    /// Resolve the channel a broker topic belongs to.
    pub fn resolve_topic(&self, topic: &str) -> Option<&Arc<Channel>> {
        match parse_topic(topic)? {
            TopicRef::Chatroom(id) => self.get_by_chatroom(id),
            TopicRef::Channel(id) => self.get_by_channel_id(id),
        }
    }

    /// Insert a channel under its name and chatroom id.
    ///
    /// If either key is already taken the existing entry wins and is
    /// returned; the registry is left unchanged.
    pub fn insert(&mut self, channel: Arc<Channel>) -> Result<(), Arc<Channel>> {
        if let Some(existing) = self.by_name.get(channel.name()) {
            return Err(Arc::clone(existing));
        }
        if let Some(existing) = self.by_chatroom.get(&channel.chatroom_id()) {
            return Err(Arc::clone(existing));
        }
        self.by_chatroom
            .insert(channel.chatroom_id(), Arc::clone(&channel));
        self.by_name.insert(channel.name().to_string(), channel);
        Ok(())
    }

    /// Remove a channel from both indexes.
    pub fn remove(&mut self, name: &str) -> Option<Arc<Channel>> {
        let channel = self.by_name.remove(name)?;
        self.by_chatroom.remove(&channel.chatroom_id());
        Some(channel)
    }

    /// Remove `channel` only if it is still the registered instance.
    pub fn remove_instance(&mut self, channel: &Arc<Channel>) -> bool {
        let same = self
            .by_name
            .get(channel.name())
            .is_some_and(|c| Arc::ptr_eq(c, channel));
        if same {
            self.remove(channel.name());
        }
        same
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}
