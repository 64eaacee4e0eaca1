//! Connection management: lifecycle state machine, keepalive, subscriptions,
//! and reconnection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::Error;
use crate::backoff::Backoff;
use crate::channel::Channel;
use crate::dispatch::{Inbound, interpret};
use crate::protocol::{
    ConnectionEstablished, ControlFrame, Envelope, PusherError, decode_envelope, encode_frame,
    error_code, ping_frame, subscribe_frame, unsubscribe_frame,
};
use crate::registry::ChannelRegistry;
use crate::transport::{Connector, Transport, TransportEvent};
use crate::types::{ConnectionState, Event, LEAVE_REASON, TimingConfig};

pub(crate) const MAX_ATTEMPTS_MESSAGE: &str = "Maximum reconnect attempts reached.";
const CLIENT_CLOSE_REASON: &str = "Connection closed by client";
const HANDSHAKE_TIMEOUT_MESSAGE: &str = "Handshake timed out";
/// Bounds for the broker-announced activity timeout.
const MIN_KEEPALIVE_PERIOD: Duration = Duration::from_secs(1);
const MAX_KEEPALIVE_PERIOD: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Commands from the public handle
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Lookup {
        name: String,
        reply: oneshot::Sender<Option<Arc<Channel>>>,
    },
    Register {
        channel: Arc<Channel>,
        reply: oneshot::Sender<Registered>,
    },
    /// Roll back a failed join. `channel` is `None` when the directory
    /// lookup failed before anything was registered.
    Abort {
        channel: Option<Arc<Channel>>,
        message: String,
    },
    Leave {
        name: String,
        reply: oneshot::Sender<bool>,
    },
    State {
        reply: oneshot::Sender<ConnectionState>,
    },
    Channels {
        reply: oneshot::Sender<Vec<Arc<Channel>>>,
    },
}

pub(crate) enum Registered {
    /// Subscription requested; resolves when the broker acknowledges it.
    Pending(oneshot::Receiver<Arc<Channel>>),
    /// Another join got there first.
    Existing(Arc<Channel>),
    /// The chatroom is already joined under a different name.
    Alias(Arc<Channel>),
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Per-connection state announced by the broker's handshake.
#[derive(Debug, Clone)]
struct Session {
    socket_id: String,
    activity_timeout: Duration,
}

pub(crate) struct LoopConfig {
    pub url: String,
    pub reconnect: bool,
    pub backoff: Backoff,
    pub timing: TimingConfig,
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

pub(crate) struct EventLoop {
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<Event>,
    connector: Arc<dyn Connector>,
    url: String,
    reconnect: bool,
    timing: TimingConfig,
    state: ConnectionState,
    transport: Option<Box<dyn Transport>>,
    session: Option<Session>,
    backoff: Backoff,
    registry: ChannelRegistry,
    pending_joins: HashMap<u64, oneshot::Sender<Arc<Channel>>>,
    close_requested: bool,
    keepalive: Option<Interval>,
    reconnect_at: Option<Instant>,
    close_deadline: Option<Instant>,
    handshake_deadline: Option<Instant>,
    dropped_events: u64,
    fatal: bool,
}

impl EventLoop {
    pub fn new(
        cmd_rx: mpsc::Receiver<Command>,
        event_tx: mpsc::Sender<Event>,
        connector: Arc<dyn Connector>,
        config: LoopConfig,
    ) -> Self {
        Self {
            cmd_rx,
            event_tx,
            connector,
            url: config.url,
            reconnect: config.reconnect,
            timing: config.timing,
            state: ConnectionState::Disconnected,
            transport: None,
            session: None,
            backoff: config.backoff,
            registry: ChannelRegistry::default(),
            pending_joins: HashMap::new(),
            close_requested: false,
            keepalive: None,
            reconnect_at: None,
            close_deadline: None,
            handshake_deadline: None,
            dropped_events: 0,
            fatal: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            if self.fatal {
                tracing::error!("Error notification had no receiver, stopping event loop");
                self.shutdown().await;
                return;
            }

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            tracing::debug!("All client handles dropped");
                            self.shutdown().await;
                            return;
                        }
                    }
                }

                event = next_transport_event(&mut self.transport) => {
                    self.handle_transport_event(event).await;
                }

                () = tick(&mut self.keepalive) => {
                    self.heartbeat().await;
                }

                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open().await;
                }

                () = sleep_until_opt(self.close_deadline) => {
                    tracing::warn!("Transport did not finish closing in time, dropping it");
                    self.transport = None;
                    self.on_closed(None, CLIENT_CLOSE_REASON.to_string()).await;
                }

                () = sleep_until_opt(self.handshake_deadline) => {
                    self.handshake_deadline = None;
                    self.on_handshake_timeout().await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => {
                if self.state == ConnectionState::Connected {
                    let _ = reply.send(Err(Error::AlreadyConnected));
                    return;
                }
                self.close_requested = false;
                let _ = reply.send(Ok(()));
                match self.state {
                    ConnectionState::Connecting => {
                        tracing::debug!("Connect requested while already connecting");
                    }
                    _ => {
                        self.reconnect_at = None;
                        self.close_deadline = None;
                        self.handshake_deadline = None;
                        self.transport = None;
                        self.open().await;
                    }
                }
            }
            Command::Close { reply } => {
                self.close().await;
                let _ = reply.send(());
            }
            Command::Lookup { name, reply } => {
                let _ = reply.send(self.registry.get(&name).cloned());
            }
            Command::Register { channel, reply } => {
                let registered = self.register(channel).await;
                let _ = reply.send(registered);
            }
            Command::Abort { channel, message } => {
                if let Some(channel) = channel
                    && self.registry.remove_instance(&channel)
                {
                    self.pending_joins.remove(&channel.chatroom_id());
                    tracing::info!(channel = %channel.name(), "Join rolled back");
                }
                self.emit_status(Event::SocketError { message }).await;
            }
            Command::Leave { name, reply } => {
                let left = self.leave(&name).await;
                let _ = reply.send(left);
            }
            Command::State { reply } => {
                let _ = reply.send(self.state);
            }
            Command::Channels { reply } => {
                let _ = reply.send(self.registry.channels().cloned().collect());
            }
        }
    }

    async fn register(&mut self, channel: Arc<Channel>) -> Registered {
        if let Err(existing) = self.registry.insert(Arc::clone(&channel)) {
            if existing.name() != channel.name() {
                tracing::warn!(
                    channel = %channel.name(),
                    existing = %existing.name(),
                    chatroom_id = channel.chatroom_id(),
                    "Chatroom already joined under another name",
                );
                return Registered::Alias(existing);
            }
            return Registered::Existing(existing);
        }
        let (tx, rx) = oneshot::channel();
        self.pending_joins.insert(channel.chatroom_id(), tx);
        tracing::info!(
            channel = %channel.name(),
            id = channel.id(),
            chatroom_id = channel.chatroom_id(),
            total = self.registry.len(),
            "Channel registered",
        );
        if self.state == ConnectionState::Connected {
            self.send_topics(&channel, subscribe_frame).await;
        }
        Registered::Pending(rx)
    }

    async fn leave(&mut self, name: &str) -> bool {
        let Some(channel) = self.registry.get(name).cloned() else {
            return false;
        };
        if self.state == ConnectionState::Connected {
            self.send_topics(&channel, unsubscribe_frame).await;
        }
        self.registry.remove(name);
        self.pending_joins.remove(&channel.chatroom_id());
        tracing::info!(channel = %name, "Channel left");
        self.emit_status(Event::Leave {
            channel,
            reason: LEAVE_REASON.to_string(),
        })
        .await;
        true
    }

    async fn close(&mut self) {
        self.close_requested = true;
        self.reconnect_at = None;
        self.keepalive = None;
        self.handshake_deadline = None;
        if let Some(transport) = self.transport.as_mut() {
            tracing::info!("Close requested");
            self.state = ConnectionState::Closing;
            if let Err(e) = transport.close().await {
                tracing::warn!("Failed to close transport cleanly: {e}");
            }
            self.close_deadline = Some(Instant::now() + self.timing.close_timeout);
        } else if self.state == ConnectionState::Reconnecting {
            tracing::info!("Close requested during reconnect");
            self.state = ConnectionState::Disconnected;
            self.emit_status(Event::Disconnected {
                reason: CLIENT_CLOSE_REASON.to_string(),
            })
            .await;
        } else {
            tracing::debug!("Close requested while not connected");
        }
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    async fn open(&mut self) {
        self.state = ConnectionState::Connecting;
        tracing::info!(attempt = self.backoff.attempts(), "Connecting");
        let result =
            tokio::time::timeout(self.timing.connect_timeout, self.connector.connect(&self.url))
                .await;
        let error = match result {
            Ok(Ok(transport)) => {
                self.transport = Some(transport);
                self.handshake_deadline = Some(Instant::now() + self.timing.connect_timeout);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => "Connection timed out".to_string(),
        };
        tracing::warn!("Connect failed: {error}");
        self.emit_status(Event::SocketError {
            message: error.clone(),
        })
        .await;
        self.on_closed(None, error).await;
    }

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Open) => {
                tracing::debug!("Transport open, awaiting handshake");
            }
            Some(TransportEvent::Message(text)) => {
                self.emit_data(Event::Raw(text.clone()));
                if let Some(envelope) = decode_envelope(&text) {
                    self.route(envelope).await;
                }
            }
            Some(TransportEvent::Error(message)) => {
                self.emit_status(Event::SocketError { message }).await;
            }
            Some(TransportEvent::Close { code, reason }) => {
                self.transport = None;
                self.on_closed(code, reason).await;
            }
            None => {
                self.transport = None;
                self.on_closed(None, String::new()).await;
            }
        }
    }

    async fn on_closed(&mut self, code: Option<u16>, reason: String) {
        self.keepalive = None;
        if let Some(session) = self.session.take() {
            tracing::debug!(socket_id = %session.socket_id, "Session ended");
        }
        self.close_deadline = None;
        self.handshake_deadline = None;
        let reason = if reason.is_empty() {
            match code {
                Some(code) => format!("Socket closed with code {code}"),
                None => "Socket closed".to_string(),
            }
        } else {
            reason
        };

        if self.close_requested || !self.reconnect {
            tracing::info!(%reason, "Disconnected");
            self.state = ConnectionState::Disconnected;
            self.emit_status(Event::Disconnected { reason }).await;
        } else {
            tracing::warn!(%reason, "Connection lost");
            self.schedule_reconnect().await;
        }
    }

    /// The socket opened but the broker never sent its handshake.
    async fn on_handshake_timeout(&mut self) {
        tracing::warn!(
            timeout_ms = self.timing.connect_timeout.as_millis() as u64,
            "{HANDSHAKE_TIMEOUT_MESSAGE}",
        );
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            tracing::debug!("Error closing transport after handshake timeout: {e}");
        }
        self.emit_status(Event::SocketError {
            message: HANDSHAKE_TIMEOUT_MESSAGE.to_string(),
        })
        .await;
        self.on_closed(None, HANDSHAKE_TIMEOUT_MESSAGE.to_string())
            .await;
    }

    async fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                tracing::info!(
                    attempt = self.backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting",
                );
                self.state = ConnectionState::Reconnecting;
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit_status(Event::Reconnecting).await;
            }
            None => {
                tracing::error!(attempts = self.backoff.attempts(), "{MAX_ATTEMPTS_MESSAGE}");
                self.state = ConnectionState::Disconnected;
                self.emit_status(Event::SocketError {
                    message: MAX_ATTEMPTS_MESSAGE.to_string(),
                })
                .await;
            }
        }
    }

    /// Broker-requested cycle: drop the live transport and go straight to
    /// the reconnect path.
    async fn force_reconnect(&mut self) {
        tracing::warn!(state = ?self.state, "Broker requested reconnect");
        self.keepalive = None;
        self.session = None;
        self.close_deadline = None;
        self.handshake_deadline = None;
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            tracing::debug!("Error closing transport for forced reconnect: {e}");
        }
        self.reconnect_at = None;
        self.schedule_reconnect().await;
    }

    /// Send a control frame. Only permitted while connected.
    async fn send_frame(&mut self, frame: &ControlFrame) {
        if self.state != ConnectionState::Connected {
            tracing::debug!(event = %frame.event, state = ?self.state, "Not connected, frame not sent");
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let text = match encode_frame(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Failed to encode {}: {e}", frame.event);
                return;
            }
        };
        if let Err(e) = transport.send(text).await {
            // The transport reports the failure as a close shortly after.
            tracing::warn!("Failed to send {}: {e}", frame.event);
        }
    }

    async fn send_topics(&mut self, channel: &Channel, build: fn(&str) -> ControlFrame) {
        for topic in channel.topics() {
            self.send_frame(&build(&topic)).await;
        }
    }

    async fn heartbeat(&mut self) {
        if self.state == ConnectionState::Connected {
            tracing::trace!("Sending heartbeat");
            self.send_frame(&ping_frame()).await;
        }
    }

    // -----------------------------------------------------------------------
    // Inbound frames
    // -----------------------------------------------------------------------

    async fn route(&mut self, envelope: Envelope) {
        let Some(inbound) = interpret(&envelope) else {
            return;
        };
        let channel = envelope
            .channel
            .as_deref()
            .and_then(|topic| self.registry.resolve_topic(topic))
            .cloned();

        match inbound {
            Inbound::ConnectionEstablished(established) => {
                self.on_handshake(established).await;
            }
            Inbound::SubscriptionSucceeded => {
                self.on_subscribed(envelope.channel.as_deref(), channel)
                    .await;
            }
            Inbound::Pong => {
                tracing::trace!("Heartbeat acknowledged");
            }
            Inbound::BrokerError(err) => self.on_broker_error(err).await,
            Inbound::Chat(event) => match channel {
                Some(channel) => {
                    tracing::trace!(event = event.name(), channel = %channel.name(), "Chat event");
                    self.emit_data(Event::Chat { event, channel });
                }
                None => {
                    tracing::debug!(
                        event = event.name(),
                        topic = ?envelope.channel,
                        "Chat event for unknown topic"
                    );
                }
            },
        }
    }

    async fn on_handshake(&mut self, established: ConnectionEstablished) {
        if self.close_requested || self.state == ConnectionState::Closing {
            tracing::debug!(state = ?self.state, "Ignoring handshake after close");
            return;
        }
        self.handshake_deadline = None;
        let activity_timeout = match established.activity_timeout {
            0 => self.timing.default_activity_timeout,
            secs => Duration::from_secs(secs),
        }
        .clamp(MIN_KEEPALIVE_PERIOD, MAX_KEEPALIVE_PERIOD);
        let session = Session {
            socket_id: established.socket_id,
            activity_timeout,
        };
        tracing::info!(
            socket_id = %session.socket_id,
            activity_timeout_s = session.activity_timeout.as_secs(),
            "Connected",
        );

        self.state = ConnectionState::Connected;
        self.backoff.reset();

        let channels: Vec<Arc<Channel>> = self.registry.channels().cloned().collect();
        for channel in &channels {
            self.send_topics(channel, subscribe_frame).await;
        }

        self.start_keepalive(session.activity_timeout);
        self.session = Some(session);
        self.emit_status(Event::Connected).await;
    }

    fn start_keepalive(&mut self, period: Duration) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(interval);
    }

    async fn on_subscribed(&mut self, topic: Option<&str>, channel: Option<Arc<Channel>>) {
        let (Some(topic), Some(channel)) = (topic, channel) else {
            tracing::debug!(?topic, "Subscription ack for unknown topic");
            return;
        };
        if topic != channel.primary_topic() {
            tracing::debug!(topic, channel = %channel.name(), "Secondary topic subscribed");
            return;
        }
        if let Some(waiter) = self.pending_joins.remove(&channel.chatroom_id()) {
            let _ = waiter.send(Arc::clone(&channel));
        }
        tracing::info!(channel = %channel.name(), "Joined");
        self.emit_status(Event::Join(channel)).await;
    }

    async fn on_broker_error(&mut self, err: PusherError) {
        if err.code == Some(error_code::FORCE_RECONNECT) {
            self.force_reconnect().await;
        } else {
            tracing::warn!(code = ?err.code, message = ?err.message, "Broker error");
        }
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    /// Lifecycle notifications wait for room in the channel; they must not be
    /// lost. An error nobody can receive is fatal.
    async fn emit_status(&mut self, event: Event) {
        let is_error = matches!(event, Event::SocketError { .. });
        if let Err(mpsc::error::SendError(event)) = self.event_tx.send(event).await
            && is_error
        {
            tracing::error!(?event, "Unobserved error notification");
            self.fatal = true;
        }
    }

    /// Frame-rate notifications are dropped rather than stalling the loop
    /// when the consumer falls behind.
    fn emit_data(&mut self, event: Event) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_events += 1;
                tracing::warn!(
                    total_dropped = self.dropped_events,
                    "event channel full, dropping notification"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn shutdown(&mut self) {
        self.keepalive = None;
        self.reconnect_at = None;
        self.handshake_deadline = None;
        if let Some(mut transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            tracing::debug!("Error closing transport on shutdown: {e}");
        }
        self.state = ConnectionState::Disconnected;
    }
}

async fn next_transport_event(transport: &mut Option<Box<dyn Transport>>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.next_event().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
