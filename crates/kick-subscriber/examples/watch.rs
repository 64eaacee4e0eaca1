//! Watch one or more Kick chatrooms and print what happens.
//!
//! ```sh
//! cargo run -p kick-subscriber --example watch -- --channel xqc --channel trainwreckstv
//! ```
//!
//! Chat messages go to stdout as `channel user: text`; everything else is
//! logged. Set `RUST_LOG=kick_subscriber=debug` for protocol detail.

use clap::Parser;
use kick_subscriber::{ChatEvent, Client, ClientOptions, Event};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(about = "Print live Kick chat")]
struct Args {
    /// Channel to join. Repeat for several.
    #[arg(long = "channel", short = 'c', required = true)]
    channels: Vec<String>,

    /// Give up after this many consecutive failed reconnects.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Do not reconnect after the connection drops.
    #[arg(long)]
    no_reconnect: bool,

    /// Broker endpoint override.
    #[arg(long, env = "KICK_ENDPOINT")]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = ClientOptions {
        channels: args.channels,
        reconnect: !args.no_reconnect,
        reconnect_max_attempts: args.max_attempts,
        endpoint: args.endpoint,
        ..Default::default()
    };

    let (client, mut events) = Client::with_defaults(options)?;
    client.connect().await?;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    Event::Chat { event: ChatEvent::Message(msg), channel } => {
                        println!("{channel} {}: {}", msg.sender.username, msg.content);
                    }
                    Event::Chat { event, channel } => {
                        tracing::info!(channel = %channel, "{}", event.name());
                    }
                    Event::Join(channel) => tracing::info!("Joined {channel}"),
                    Event::Leave { channel, reason } => tracing::info!("Left {channel}: {reason}"),
                    Event::Connected => tracing::info!("Connected"),
                    Event::Reconnecting => tracing::warn!("Reconnecting"),
                    Event::SocketError { message } => tracing::error!("{message}"),
                    Event::Disconnected { reason } => {
                        tracing::info!("Disconnected: {reason}");
                        break;
                    }
                    Event::Raw(_) => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.close().await?;
            }
        }
    }

    Ok(())
}
