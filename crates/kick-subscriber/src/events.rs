//! Typed payloads for Kick application events.
//!
//! Field sets follow what the broker sends today. Unknown fields are ignored
//! and absent fields take their default, so schema drift on Kick's side
//! degrades to missing data rather than dropped notifications.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Badge {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub color: String,
    pub badges: Vec<Badge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sender {
    pub id: u64,
    pub username: String,
    pub slug: String,
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRef {
    pub id: u64,
    pub username: String,
    pub slug: String,
}

/// `App\Events\ChatMessageEvent`. `kind` is `message`, `reply` or `celebration`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMessage {
    pub id: String,
    pub chatroom_id: u64,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: String,
    pub sender: Sender,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subscription {
    pub chatroom_id: u64,
    pub username: String,
    pub months: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftedSubscriptions {
    pub chatroom_id: u64,
    pub gifted_usernames: Vec<String>,
    pub gifter_username: String,
    pub gifter_total: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamHost {
    pub chatroom_id: u64,
    pub optional_message: String,
    pub number_viewers: u64,
    pub host_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserBanned {
    pub id: String,
    pub user: UserRef,
    pub banned_by: UserRef,
    pub permanent: bool,
    /// Minutes, for temporary bans.
    pub duration: Option<u64>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserUnbanned {
    pub id: String,
    pub user: UserRef,
    pub unbanned_by: UserRef,
    pub permanent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDeleted {
    pub id: String,
    pub message: MessageRef,
    #[serde(rename = "aiModerated")]
    pub ai_moderated: bool,
    #[serde(rename = "violatedRules")]
    pub violated_rules: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinnedMessageCreated {
    pub message: ChatMessage,
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeToggle {
    pub enabled: bool,
    pub message_interval: Option<u64>,
    pub min_duration: Option<u64>,
    pub remaining_time: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatroomUpdated {
    pub id: u64,
    pub slow_mode: ModeToggle,
    pub subscribers_mode: ModeToggle,
    pub followers_mode: ModeToggle,
    pub emotes_mode: ModeToggle,
    pub advanced_bot_protection: ModeToggle,
    pub account_age: ModeToggle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollOption {
    pub id: u64,
    pub label: String,
    pub votes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Poll {
    pub title: String,
    pub options: Vec<PollOption>,
    pub duration: u64,
    pub remaining: u64,
    pub result_display_duration: u64,
    pub has_voted: bool,
    pub voted_option_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollUpdate {
    pub poll: Poll,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSession {
    pub id: u64,
    pub channel_id: u64,
    pub session_title: String,
    pub source: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerIsLive {
    pub livestream: LiveSession,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastChannel {
    pub id: u64,
    pub is_banned: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppedLivestream {
    pub id: u64,
    pub channel: BroadcastChannel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StopStreamBroadcast {
    pub livestream: StoppedLivestream,
}

/// Shared by goal created / canceled / progress events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Goal {
    pub id: String,
    pub channel_id: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub target_value: u64,
    pub current_value: u64,
    pub progress_bar_emoji_id: Option<String>,
    pub end_date: Option<String>,
    pub achieved_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub count_from_creation: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Livestream {
    pub id: u64,
    pub slug: String,
    pub channel_id: u64,
    pub session_title: String,
    pub is_live: bool,
    pub start_time: Option<String>,
    pub language: Option<String>,
    pub is_mature: bool,
    pub viewer_count: u64,
    pub tags: Vec<String>,
    pub categories: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivestreamUpdated {
    pub livestream: Livestream,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopUser {
    pub user_id: u64,
    pub username: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionOutcome {
    pub id: String,
    pub title: String,
    pub total_vote_amount: u64,
    pub vote_count: u64,
    pub return_rate: f64,
    pub top_users: Vec<TopUser>,
}

/// `state` is `ACTIVE`, `LOCKED` or `RESOLVED`; the lock and winner fields
/// are present only in the later states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prediction {
    pub id: String,
    pub channel_id: u64,
    pub title: String,
    pub state: String,
    pub outcomes: Vec<PredictionOutcome>,
    pub duration: u64,
    pub created_at: String,
    pub updated_at: String,
    pub locked_at: Option<String>,
    pub winning_outcome_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionEvent {
    pub prediction: Prediction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardRedeemed {
    pub reward_title: String,
    pub user_id: u64,
    pub channel_id: u64,
    pub username: String,
    pub user_input: String,
    pub reward_background_color: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSubscription {
    pub user_ids: Vec<u64>,
    pub username: String,
    pub channel_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuckyUsersWhoGotGiftSubscriptions {
    pub channel: serde_json::Value,
    pub usernames: Vec<String>,
    pub gifter_username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoPrivated {
    pub video_id: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaderboardEntry {
    pub user_id: u64,
    pub username: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GiftsLeaderboardUpdated {
    pub leaderboard: Vec<LeaderboardEntry>,
    pub weekly_leaderboard: Vec<LeaderboardEntry>,
    pub monthly_leaderboard: Vec<LeaderboardEntry>,
    pub gifter_id: u64,
    pub gifter_username: String,
    pub gifted_quantity: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatMoveToSupportedChannel {
    pub channel: serde_json::Value,
    pub slug: String,
    pub hosted: Option<serde_json::Value>,
}

/// A chat-family notification, delivered together with its channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ChatMessage),
    Subscription(Subscription),
    GiftedSubscriptions(GiftedSubscriptions),
    StreamHost(StreamHost),
    UserBanned(UserBanned),
    UserUnbanned(UserUnbanned),
    MessageDeleted(MessageDeleted),
    PinnedMessageCreated(PinnedMessageCreated),
    PinnedMessageDeleted(MessageDeleted),
    ChatroomUpdated(ChatroomUpdated),
    PollUpdate(PollUpdate),
    PollDelete,
    StreamerIsLive(StreamerIsLive),
    StopStreamBroadcast(StopStreamBroadcast),
    GoalCreated(Goal),
    GoalCanceled(Goal),
    GoalProgressUpdate(Goal),
    LivestreamUpdated(LivestreamUpdated),
    PredictionCreated(PredictionEvent),
    PredictionUpdated(PredictionEvent),
    RewardRedeemed(RewardRedeemed),
    ChannelSubscription(ChannelSubscription),
    LuckyUsersWhoGotGiftSubscriptions(LuckyUsersWhoGotGiftSubscriptions),
    VideoPrivated(VideoPrivated),
    GiftsLeaderboardUpdated(GiftsLeaderboardUpdated),
    ChatMoveToSupportedChannel(ChatMoveToSupportedChannel),
}

impl ChatEvent {
    /// Notification name, as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Subscription(_) => "subscription",
            Self::GiftedSubscriptions(_) => "giftedSubscriptions",
            Self::StreamHost(_) => "streamHost",
            Self::UserBanned(_) => "userBanned",
            Self::UserUnbanned(_) => "userUnbanned",
            Self::MessageDeleted(_) => "messageDeleted",
            Self::PinnedMessageCreated(_) => "pinnedMessageCreated",
            Self::PinnedMessageDeleted(_) => "pinnedMessageDeleted",
            Self::ChatroomUpdated(_) => "chatroomUpdated",
            Self::PollUpdate(_) => "pollUpdate",
            Self::PollDelete => "pollDelete",
            Self::StreamerIsLive(_) => "streamerIsLive",
            Self::StopStreamBroadcast(_) => "stopStreamBroadcast",
            Self::GoalCreated(_) => "goalCreated",
            Self::GoalCanceled(_) => "goalCanceled",
            Self::GoalProgressUpdate(_) => "goalProgressUpdate",
            Self::LivestreamUpdated(_) => "livestreamUpdated",
            Self::PredictionCreated(_) => "predictionCreated",
            Self::PredictionUpdated(_) => "predictionUpdated",
            Self::RewardRedeemed(_) => "rewardRedeemed",
            Self::ChannelSubscription(_) => "channelSubscription",
            Self::LuckyUsersWhoGotGiftSubscriptions(_) => "luckyUsersWhoGotGiftSubscriptions",
            Self::VideoPrivated(_) => "videoPrivated",
            Self::GiftsLeaderboardUpdated(_) => "giftsLeaderboardUpdated",
            Self::ChatMoveToSupportedChannel(_) => "chatMoveToSupportedChannel",
        }
    }
}
