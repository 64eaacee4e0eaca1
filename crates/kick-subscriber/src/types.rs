//! Public types for the kick-subscriber crate.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_tungstenite::tungstenite;

use crate::channel::Channel;
use crate::events::ChatEvent;

/// Default Pusher application endpoint used by Kick.
pub const DEFAULT_ENDPOINT: &str = "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679";

/// Reason attached to the `Leave` notification for caller-initiated leaves.
pub const LEAVE_REASON: &str = "Disconnected by user";

/// Lifecycle state of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Notifications emitted by a [`Client`](crate::Client).
#[derive(Debug, Clone)]
pub enum Event {
    /// Handshake acknowledged; all registered channels have been resubscribed.
    Connected,
    /// The connection closed and will not be retried.
    Disconnected { reason: String },
    /// A reconnect attempt has been scheduled.
    Reconnecting,
    /// Transport failure, join failure, or exhausted reconnects.
    SocketError { message: String },
    /// The broker confirmed the subscription for a channel.
    Join(Arc<Channel>),
    /// A channel was left.
    Leave { channel: Arc<Channel>, reason: String },
    /// A typed chat notification for a joined channel.
    Chat {
        event: ChatEvent,
        channel: Arc<Channel>,
    },
    /// Every text frame received, before interpretation.
    Raw(String),
}

/// Timing knobs. The defaults suit production; tests shrink them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimingConfig {
    /// How long `join` waits for the broker's subscription ack.
    #[serde(with = "millis")]
    pub join_timeout: Duration,
    /// Bound on opening the transport.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// How long a `close` waits for the transport to finish closing.
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    /// Heartbeat interval assumed until the broker announces its own.
    #[serde(with = "millis")]
    pub default_activity_timeout: Duration,
    /// Capacity of the notification channel.
    pub event_channel_capacity: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            default_activity_timeout: Duration::from_secs(120),
            event_channel_capacity: 64,
        }
    }
}

/// Configuration for [`Client::new`](crate::Client::new).
///
/// Deserializes from the camelCase JSON shape
/// (`{"channels": [...], "reconnectMaxAttempts": 5, ...}`); durations are
/// given in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Channels to join as soon as the client is created.
    pub channels: Vec<String>,
    /// Reconnect automatically after an unrequested close.
    pub reconnect: bool,
    /// Reconnect attempt ceiling. `None` retries forever.
    pub reconnect_max_attempts: Option<u32>,
    #[serde(with = "millis")]
    pub reconnect_initial_timeout: Duration,
    #[serde(with = "millis")]
    pub reconnect_max_timeout: Duration,
    /// Broker endpoint. Defaults to [`DEFAULT_ENDPOINT`].
    pub endpoint: Option<String>,
    pub timing: TimingConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            reconnect: true,
            reconnect_max_attempts: None,
            reconnect_initial_timeout: Duration::from_millis(1000),
            reconnect_max_timeout: Duration::from_millis(60_000),
            endpoint: None,
            timing: TimingConfig::default(),
        }
    }
}

impl ClientOptions {
    /// Parse options from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("Directory HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Client is already connected.")]
    AlreadyConnected,

    #[error("Directory lookup failed for {name}: {message}")]
    Directory { name: String, message: String },

    #[error("Timed out waiting for subscription of {name}")]
    JoinTimeout { name: String },

    #[error("Channel {name} was left before its subscription was confirmed")]
    ChannelLeft { name: String },

    #[error("Channel {name} shares chatroom {chatroom_id} with joined channel {existing}")]
    ChatroomAlreadyJoined {
        name: String,
        existing: String,
        chatroom_id: u64,
    },

    #[error("Client event loop has stopped")]
    ClientClosed,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}
