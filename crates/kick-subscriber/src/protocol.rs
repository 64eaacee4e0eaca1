//! Pusher wire protocol types, constants, and JSON frame encode/decode.

use serde::{Deserialize, Serialize};

use crate::Error;

// ---------------------------------------------------------------------------
// Protocol event names
// ---------------------------------------------------------------------------

pub mod event {
    // Outbound control verbs (prefixed with `pusher:` on the wire).
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UNSUBSCRIBE: &str = "unsubscribe";
    pub const PING: &str = "ping";

    // Inbound broker events.
    pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
    pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";
    pub const PONG: &str = "pusher:pong";
    pub const ERROR: &str = "pusher:error";
}

pub mod error_code {
    /// Broker asks the client to drop the connection and reconnect right away.
    pub const FORCE_RECONNECT: i64 = 4200;
}

/// Fixed query parameters identifying the client to the broker.
pub const CONNECT_PARAMS: [(&str, &str); 4] = [
    ("protocol", "7"),
    ("client", "js"),
    ("version", "7.4.0"),
    ("flash", "false"),
];

// ---------------------------------------------------------------------------
// Wire protocol types (JSON)
// ---------------------------------------------------------------------------

/// A decoded inbound frame. `data` is itself JSON text, decoded per event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, deserialize_with = "data_as_string")]
    pub data: String,
    #[serde(default)]
    pub channel: Option<String>,
}

/// Outbound control frame: `{"event": "pusher:<verb>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct ControlFrame {
    pub event: String,
    pub data: ControlData,
}

/// Untagged, so `Empty {}` goes out as `{}` rather than `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ControlData {
    Subscription { auth: String, channel: String },
    Empty {},
}

/// Payload of `pusher:connection_established`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default = "default_activity_timeout")]
    pub activity_timeout: u64,
}

/// Payload of `pusher:error`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PusherError {
    pub code: Option<i64>,
    pub message: Option<String>,
}

fn default_activity_timeout() -> u64 {
    120
}

/// Pusher usually sends `data` as a JSON string, but some broker frames
/// carry an inline object. Normalise both to JSON text.
fn data_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

pub fn encode_frame(frame: &ControlFrame) -> Result<String, Error> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode an inbound text frame. Malformed frames yield `None`.
pub fn decode_envelope(text: &str) -> Option<Envelope> {
    match serde_json::from_str::<Envelope>(text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::debug!("Dropping malformed frame: {e}");
            None
        }
    }
}

/// Decode the JSON text carried in [`Envelope::data`].
pub fn decode_data<T: serde::de::DeserializeOwned>(data: &str) -> Option<T> {
    serde_json::from_str(data).ok()
}

pub fn subscribe_frame(topic: &str) -> ControlFrame {
    subscription_frame(event::SUBSCRIBE, topic)
}

pub fn unsubscribe_frame(topic: &str) -> ControlFrame {
    subscription_frame(event::UNSUBSCRIBE, topic)
}

pub fn ping_frame() -> ControlFrame {
    ControlFrame {
        event: format!("pusher:{}", event::PING),
        data: ControlData::Empty {},
    }
}

fn subscription_frame(verb: &str, topic: &str) -> ControlFrame {
    ControlFrame {
        event: format!("pusher:{verb}"),
        data: ControlData::Subscription {
            auth: String::new(),
            channel: topic.to_string(),
        },
    }
}

/// Build the broker URL with the client identification parameters.
pub fn build_ws_url(endpoint: &str) -> Result<String, Error> {
    let mut u = url::Url::parse(endpoint)?;
    {
        let mut q = u.query_pairs_mut();
        for (key, value) in CONNECT_PARAMS {
            q.append_pair(key, value);
        }
    }
    Ok(u.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
