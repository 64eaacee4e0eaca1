//! Transport capability used by the connection loop, plus the WebSocket
//! implementation.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use crate::Error;

/// Something the transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { code: Option<u16>, reason: String },
    Error(String),
}

/// An open duplex text connection to the broker.
///
/// `next_event` yields [`TransportEvent::Open`] first and
/// [`TransportEvent::Close`] last; `None` afterwards.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), Error>;

    async fn close(&mut self) -> Result<(), Error>;

    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Opens transports. Supplied by the embedding application.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, Error>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, Error> {
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await?;
        Ok(Box::new(WsTransport {
            ws,
            phase: Phase::Fresh,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Open,
    /// A stream error was reported; the close is still owed.
    Failed,
    Finished,
}

pub struct WsTransport {
    ws: WsStream,
    phase: Phase,
}

impl WsTransport {
    fn finish(&mut self, code: Option<u16>, reason: String) -> Option<TransportEvent> {
        self.phase = Phase::Finished;
        Some(TransportEvent::Close { code, reason })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), Error> {
        self.ws.send(tungstenite::Message::text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.phase {
            Phase::Finished => return None,
            Phase::Failed => return self.finish(Some(1006), String::new()),
            Phase::Fresh => {
                self.phase = Phase::Open;
                return Some(TransportEvent::Open);
            }
            Phase::Open => {}
        }
        loop {
            match self.ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Some(TransportEvent::Message(text)),
                        Err(e) => tracing::warn!("Dropping non UTF-8 binary frame: {e}"),
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((None, String::new()), |f| {
                        (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    return self.finish(code, reason);
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite.
                }
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error: {e}");
                    self.phase = Phase::Failed;
                    return Some(TransportEvent::Error(e.to_string()));
                }
                None => return self.finish(Some(1006), String::new()),
            }
        }
    }
}
