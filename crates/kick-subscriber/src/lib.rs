//! Kick chat subscriber over the Pusher realtime protocol.
//!
//! Implements the subset of the Pusher WebSocket protocol Kick's chat uses:
//! connect, subscribe/unsubscribe to a channel's topics, keep the connection
//! alive, and turn broadcast frames into typed notifications.
//!
//! # Features
//! - Channel name resolution through Kick's REST directory
//! - Join confirmed by the broker's subscription ack, with timeout and rollback
//! - Automatic reconnection with exponential backoff and resubscription
//! - Activity-timeout heartbeat
//! - Typed chat events plus a raw-frame tap
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), kick_subscriber::Error> {
//! use kick_subscriber::{Client, ClientOptions, Event};
//!
//! let options = ClientOptions {
//!     channels: vec!["xqc".to_string()],
//!     ..Default::default()
//! };
//!
//! let (client, mut events) = Client::with_defaults(options)?;
//! client.connect().await?;
//! while let Some(event) = events.next().await {
//!     match event {
//!         Event::Chat { event, channel } => println!("{channel}: {}", event.name()),
//!         Event::Connected => println!("connected"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
mod channel;
mod client;
mod connection;
mod directory;
mod dispatch;
pub mod events;
mod protocol;
mod registry;
mod transport;
mod types;

pub use channel::{Channel, ChannelInfo, ChannelUser, ChatroomInfo, ChatroomRef, normalize_name};
pub use client::{Client, Events};
pub use directory::{DEFAULT_DIRECTORY_BASE, Directory, KickDirectory};
pub use events::ChatEvent;
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
pub use types::{
    ClientOptions, ConnectionState, DEFAULT_ENDPOINT, Error, Event, LEAVE_REASON, TimingConfig,
};
