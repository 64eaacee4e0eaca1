//! Maps decoded envelopes to broker control signals and typed chat events.

use serde::de::DeserializeOwned;

use crate::events::ChatEvent;
use crate::protocol::{ConnectionEstablished, Envelope, PusherError, decode_data, event};

/// Every inbound event name the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    ConnectionEstablished,
    SubscriptionSucceeded,
    Pong,
    BrokerError,
    ChatMessage,
    Subscription,
    GiftedSubscriptions,
    StreamHost,
    UserBanned,
    UserUnbanned,
    MessageDeleted,
    PinnedMessageCreated,
    PinnedMessageDeleted,
    ChatroomUpdated,
    PollUpdate,
    PollDelete,
    StreamerIsLive,
    StopStreamBroadcast,
    GoalCreated,
    GoalCanceled,
    GoalProgressUpdate,
    LivestreamUpdated,
    PredictionCreated,
    PredictionUpdated,
    RewardRedeemed,
    ChannelSubscription,
    LuckyUsersWhoGotGiftSubscriptions,
    VideoPrivated,
    GiftsLeaderboardUpdated,
    ChatMoveToSupportedChannel,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            event::CONNECTION_ESTABLISHED => Self::ConnectionEstablished,
            event::SUBSCRIPTION_SUCCEEDED => Self::SubscriptionSucceeded,
            event::PONG => Self::Pong,
            event::ERROR => Self::BrokerError,
            r"App\Events\ChatMessageEvent" => Self::ChatMessage,
            r"App\Events\SubscriptionEvent" => Self::Subscription,
            "GiftedSubscriptionsEvent" => Self::GiftedSubscriptions,
            r"App\Events\StreamHostEvent" => Self::StreamHost,
            r"App\Events\UserBannedEvent" => Self::UserBanned,
            r"App\Events\UserUnbannedEvent" => Self::UserUnbanned,
            r"App\Events\MessageDeletedEvent" => Self::MessageDeleted,
            r"App\Events\PinnedMessageCreatedEvent" => Self::PinnedMessageCreated,
            r"App\Events\PinnedMessageDeletedEvent" => Self::PinnedMessageDeleted,
            r"App\Events\ChatroomUpdatedEvent" => Self::ChatroomUpdated,
            r"App\Events\PollUpdateEvent" => Self::PollUpdate,
            r"App\Events\PollDeleteEvent" => Self::PollDelete,
            r"App\Events\StreamerIsLive" => Self::StreamerIsLive,
            r"App\Events\StopStreamBroadcast" => Self::StopStreamBroadcast,
            "GoalCreatedEvent" => Self::GoalCreated,
            "GoalCanceledEvent" => Self::GoalCanceled,
            "GoalProgressUpdateEvent" => Self::GoalProgressUpdate,
            r"App\Events\LivestreamUpdated" => Self::LivestreamUpdated,
            "PredictionCreated" => Self::PredictionCreated,
            "PredictionUpdated" => Self::PredictionUpdated,
            "RewardRedeemedEvent" => Self::RewardRedeemed,
            r"App\Events\ChannelSubscriptionEvent" => Self::ChannelSubscription,
            r"App\Events\LuckyUsersWhoGotGiftSubscriptionsEvent" => {
                Self::LuckyUsersWhoGotGiftSubscriptions
            }
            r"App\Events\VideoPrivatedEvent" => Self::VideoPrivated,
            "GiftsLeaderboardUpdated" => Self::GiftsLeaderboardUpdated,
            r"App\Events\ChatMoveToSupportedChannelEvent" => Self::ChatMoveToSupportedChannel,
            _ => return None,
        };
        Some(kind)
    }
}

/// What an inbound envelope means to the connection loop.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    ConnectionEstablished(ConnectionEstablished),
    SubscriptionSucceeded,
    Pong,
    BrokerError(PusherError),
    Chat(ChatEvent),
}

/// Decode a chat payload. Explicit nulls count as absent, so only text
/// that is not JSON or has the wrong shape is rejected.
fn chat<T: DeserializeOwned>(data: &str, wrap: fn(T) -> ChatEvent) -> Option<Inbound> {
    let mut value: serde_json::Value = decode_data(data)?;
    strip_nulls(&mut value);
    serde_json::from_value(value)
        .map(|payload| Inbound::Chat(wrap(payload)))
        .ok()
}

fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Interpret an envelope. Unknown event names and undecodable payloads
/// yield `None`.
pub(crate) fn interpret(envelope: &Envelope) -> Option<Inbound> {
    let Some(kind) = EventKind::from_name(&envelope.event) else {
        tracing::debug!(event = %envelope.event, "Ignoring unknown event");
        return None;
    };
    let data = envelope.data.as_str();
    let inbound = match kind {
        EventKind::ConnectionEstablished => {
            decode_data(data).map(Inbound::ConnectionEstablished)
        }
        EventKind::SubscriptionSucceeded => Some(Inbound::SubscriptionSucceeded),
        EventKind::Pong => Some(Inbound::Pong),
        EventKind::BrokerError => decode_data(data).map(Inbound::BrokerError),
        EventKind::ChatMessage => chat(data, ChatEvent::Message),
        EventKind::Subscription => chat(data, ChatEvent::Subscription),
        EventKind::GiftedSubscriptions => chat(data, ChatEvent::GiftedSubscriptions),
        EventKind::StreamHost => chat(data, ChatEvent::StreamHost),
        EventKind::UserBanned => chat(data, ChatEvent::UserBanned),
        EventKind::UserUnbanned => chat(data, ChatEvent::UserUnbanned),
        EventKind::MessageDeleted => chat(data, ChatEvent::MessageDeleted),
        EventKind::PinnedMessageCreated => chat(data, ChatEvent::PinnedMessageCreated),
        EventKind::PinnedMessageDeleted => chat(data, ChatEvent::PinnedMessageDeleted),
        EventKind::ChatroomUpdated => chat(data, ChatEvent::ChatroomUpdated),
        EventKind::PollUpdate => chat(data, ChatEvent::PollUpdate),
        EventKind::PollDelete => Some(Inbound::Chat(ChatEvent::PollDelete)),
        EventKind::StreamerIsLive => chat(data, ChatEvent::StreamerIsLive),
        EventKind::StopStreamBroadcast => chat(data, ChatEvent::StopStreamBroadcast),
        EventKind::GoalCreated => chat(data, ChatEvent::GoalCreated),
        EventKind::GoalCanceled => chat(data, ChatEvent::GoalCanceled),
        EventKind::GoalProgressUpdate => chat(data, ChatEvent::GoalProgressUpdate),
        EventKind::LivestreamUpdated => chat(data, ChatEvent::LivestreamUpdated),
        EventKind::PredictionCreated => chat(data, ChatEvent::PredictionCreated),
        EventKind::PredictionUpdated => chat(data, ChatEvent::PredictionUpdated),
        EventKind::RewardRedeemed => chat(data, ChatEvent::RewardRedeemed),
        EventKind::ChannelSubscription => chat(data, ChatEvent::ChannelSubscription),
        EventKind::LuckyUsersWhoGotGiftSubscriptions => {
            chat(data, ChatEvent::LuckyUsersWhoGotGiftSubscriptions)
        }
        EventKind::VideoPrivated => chat(data, ChatEvent::VideoPrivated),
        EventKind::GiftsLeaderboardUpdated => chat(data, ChatEvent::GiftsLeaderboardUpdated),
        EventKind::ChatMoveToSupportedChannel => {
            chat(data, ChatEvent::ChatMoveToSupportedChannel)
        }
    };
    if inbound.is_none() {
        tracing::debug!(event = %envelope.event, "Dropping event with undecodable data");
    }
    inbound
}
