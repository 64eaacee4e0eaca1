//! Public entry point: [`Client`] and [`Events`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::backoff::Backoff;
use crate::channel::{Channel, normalize_name};
use crate::connection::{Command, EventLoop, LoopConfig, Registered};
use crate::directory::{Directory, KickDirectory};
use crate::protocol::build_ws_url;
use crate::transport::{Connector, WsConnector};
use crate::types::{ClientOptions, ConnectionState, DEFAULT_ENDPOINT, Error, Event};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Stream of notifications from a [`Client`].
///
/// Chat and raw-frame notifications may be dropped under backpressure if the
/// consumer falls behind; lifecycle notifications are not.
pub struct Events {
    rx: mpsc::Receiver<Event>,
}

impl Events {
    /// Receive the next notification. Returns `None` once the background
    /// task has exited.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Handle to a Kick chat connection.
///
/// Cheap to clone. The background task exits once every clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    cmd_tx: mpsc::Sender<Command>,
    directory: Arc<dyn Directory>,
    join_timeout: Duration,
}

impl Client {
    /// Create a client with the production directory and WebSocket transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_defaults(options: ClientOptions) -> Result<(Self, Events), Error> {
        Self::new(
            options,
            Arc::new(KickDirectory::new()?),
            Arc::new(WsConnector),
        )
    }

    /// Create a client and spawn its background event loop.
    ///
    /// The client starts disconnected; call [`connect`](Client::connect).
    /// Channels listed in `options.channels` are joined in the background and
    /// subscribe once the connection is up.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        options: ClientOptions,
        directory: Arc<dyn Directory>,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, Events), Error> {
        let endpoint = options.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        let url = build_ws_url(endpoint)?;
        let timing = options.timing;

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(timing.event_channel_capacity.max(1));

        let config = LoopConfig {
            url,
            reconnect: options.reconnect,
            backoff: Backoff::new(
                options.reconnect_initial_timeout,
                options.reconnect_max_timeout,
                options.reconnect_max_attempts,
            ),
            timing: timing.clone(),
        };
        tokio::spawn(EventLoop::new(cmd_rx, event_tx, connector, config).run());

        let client = Self {
            inner: Arc::new(Inner {
                cmd_tx,
                directory,
                join_timeout: timing.join_timeout,
            }),
        };

        for name in options.channels {
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.join(&name).await {
                    tracing::warn!(channel = %name, "Auto-join failed: {e}");
                }
            });
        }

        Ok((client, Events { rx: event_rx }))
    }

    /// Open the connection to the broker.
    ///
    /// Returns once the attempt has started; progress is reported through
    /// [`Event::Connected`] and [`Event::SocketError`]. Fails with
    /// [`Error::AlreadyConnected`] if the client is already connected.
    pub async fn connect(&self) -> Result<(), Error> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Close the connection. No reconnect follows.
    pub async fn close(&self) -> Result<(), Error> {
        self.request(|reply| Command::Close { reply }).await
    }

    /// Join a channel and wait for the broker to confirm its subscription.
    ///
    /// Joining an already joined channel returns the existing handle without
    /// any lookup. A name whose chatroom is already joined under another
    /// name fails with [`Error::ChatroomAlreadyJoined`].
    pub async fn join(&self, name: &str) -> Result<Arc<Channel>, Error> {
        let name = normalize_name(name);

        let existing = self
            .request(|reply| Command::Lookup {
                name: name.clone(),
                reply,
            })
            .await?;
        if let Some(channel) = existing {
            return Ok(channel);
        }

        let channel = match self.lookup(&name).await {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                tracing::warn!(channel = %name, "Directory lookup failed: {e}");
                self.abort(None, &e).await;
                return Err(e);
            }
        };

        let registered = self
            .request(|reply| Command::Register {
                channel: Arc::clone(&channel),
                reply,
            })
            .await?;
        let ack = match registered {
            Registered::Existing(existing) => return Ok(existing),
            Registered::Alias(existing) => {
                return Err(Error::ChatroomAlreadyJoined {
                    name,
                    existing: existing.name().to_string(),
                    chatroom_id: existing.chatroom_id(),
                });
            }
            Registered::Pending(ack) => ack,
        };

        match tokio::time::timeout(self.inner.join_timeout, ack).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(_)) => Err(Error::ChannelLeft { name }),
            Err(_) => {
                let err = Error::JoinTimeout { name };
                self.abort(Some(channel), &err).await;
                Err(err)
            }
        }
    }

    /// Leave a channel. Unknown names are ignored.
    pub async fn leave(&self, name: &str) -> Result<(), Error> {
        let name = normalize_name(name);
        let left = self.request(|reply| Command::Leave { name, reply }).await?;
        if !left {
            tracing::debug!("Leave ignored, channel not joined");
        }
        Ok(())
    }

    /// Current connection state.
    pub async fn state(&self) -> Result<ConnectionState, Error> {
        self.request(|reply| Command::State { reply }).await
    }

    /// Channels currently registered, including joins still awaiting their
    /// subscription ack.
    pub async fn channels(&self) -> Result<Vec<Arc<Channel>>, Error> {
        self.request(|reply| Command::Channels { reply }).await
    }

    async fn lookup(&self, name: &str) -> Result<Channel, Error> {
        let info = self.inner.directory.channel_info(name).await?;
        let chatroom = self.inner.directory.chatroom_info(name).await?;
        Ok(Channel::new(name, info, chatroom))
    }

    async fn abort(&self, channel: Option<Arc<Channel>>, err: &Error) {
        let cmd = Command::Abort {
            channel,
            message: err.to_string(),
        };
        if self.inner.cmd_tx.send(cmd).await.is_err() {
            tracing::debug!("Event loop gone, join abort not delivered");
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .cmd_tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ClientClosed)?;
        rx.await.map_err(|_| Error::ClientClosed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channel::{ChannelInfo, ChatroomInfo};
    use crate::connection::tests::{FakeConn, FakeConnector, Sent};

    #[derive(Default)]
    struct FakeDirectory {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl Directory for FakeDirectory {
        async fn channel_info(&self, name: &str) -> Result<ChannelInfo, Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if name == "missing" {
                return Err(Error::Directory {
                    name: name.to_string(),
                    message: "not found".into(),
                });
            }
            Ok(serde_json::from_value(serde_json::json!({
                "id": 123,
                "slug": name,
                "user": {"username": "xQc"},
                "chatroom": {"id": 456},
            }))?)
        }

        async fn chatroom_info(&self, _name: &str) -> Result<ChatroomInfo, Error> {
            Ok(ChatroomInfo(serde_json::json!({"id": 456})))
        }
    }

    fn start(join_timeout: Duration) -> (Client, Events, Arc<FakeDirectory>, mpsc::UnboundedReceiver<FakeConn>) {
        let directory = Arc::new(FakeDirectory::default());
        let (connector, conns) = FakeConnector::new();
        let options = ClientOptions {
            timing: crate::TimingConfig {
                join_timeout,
                ..Default::default()
            },
            ..Default::default()
        };
        let (client, events) = Client::new(options, directory.clone(), connector).unwrap();
        (client, events, directory, conns)
    }

    async fn connected(client: &Client, events: &mut Events, conns: &mut mpsc::UnboundedReceiver<FakeConn>) -> FakeConn {
        client.connect().await.unwrap();
        let conn = conns.recv().await.unwrap();
        conn.handshake(120);
        loop {
            if let Some(Event::Connected) = events.next().await {
                return conn;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn join_resolves_on_primary_ack() {
        let (client, mut events, directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joiner = tokio::spawn({
            let client = client.clone();
            async move { client.join("#XQC").await }
        });
        for _ in 0..5 {
            assert!(matches!(conn.next_sent().await, Sent::Text(_)));
        }
        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);

        let channel = joiner.await.unwrap().unwrap();
        assert_eq!(channel.name(), "xqc");
        assert_eq!(channel.chatroom_id(), 456);
        assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);

        // Second join is served from the registry.
        let again = client.join("xqc").await.unwrap();
        assert!(Arc::ptr_eq(&channel, &again));
        assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(client.channels().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn join_during_pending_join_reuses_channel() {
        let (client, mut events, directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.join("xqc").await }
        });
        for _ in 0..5 {
            conn.next_sent().await;
        }

        // Still awaiting the ack; the registered handle is returned as is.
        let second = client.join("XQC").await.unwrap();
        assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);

        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);
        let first = first.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.channels().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_joins_share_one_channel() {
        let (client, mut events, directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joins: Vec<_> = (0..2)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.join("xqc").await })
            })
            .collect();
        for _ in 0..5 {
            conn.next_sent().await;
        }
        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);

        let mut joined = Vec::new();
        for join in joins {
            joined.push(join.await.unwrap().unwrap());
        }
        assert!(Arc::ptr_eq(&joined[0], &joined[1]));
        assert_eq!(client.channels().await.unwrap().len(), 1);
        assert!(conn.from_client.try_recv().is_err(), "subscribed twice");

        let lookups = directory.lookups.load(Ordering::SeqCst);
        let again = client.join("xqc").await.unwrap();
        assert!(Arc::ptr_eq(&again, &joined[0]));
        assert_eq!(directory.lookups.load(Ordering::SeqCst), lookups);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_during_pending_join_reports_left() {
        let (client, mut events, _directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joiner = tokio::spawn({
            let client = client.clone();
            async move { client.join("xqc").await }
        });
        for _ in 0..5 {
            conn.next_sent().await;
        }
        client.leave("xqc").await.unwrap();

        let err = joiner.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ChannelLeft { ref name } if name == "xqc"));
        assert!(client.channels().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_name_for_joined_chatroom_fails() {
        let (client, mut events, _directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joiner = tokio::spawn({
            let client = client.clone();
            async move { client.join("a").await }
        });
        for _ in 0..5 {
            conn.next_sent().await;
        }
        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);
        joiner.await.unwrap().unwrap();

        // The directory maps every name to chatroom 456.
        let err = client.join("b").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ChatroomAlreadyJoined { ref name, ref existing, chatroom_id: 456 }
                if name == "b" && existing == "a"
        ));
        let names: Vec<String> = client
            .channels()
            .await
            .unwrap()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn join_timeout_rolls_back() {
        let (client, mut events, _directory, mut conns) = start(Duration::from_secs(10));
        let _conn = connected(&client, &mut events, &mut conns).await;

        let err = client.join("xqc").await.unwrap_err();
        assert!(matches!(err, Error::JoinTimeout { ref name } if name == "xqc"));
        assert!(client.channels().await.unwrap().is_empty());

        let mut saw_error = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(10), events.next()).await {
            if let Event::SocketError { message } = event {
                assert_eq!(message, err.to_string());
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test(start_paused = true)]
    async fn directory_failure_registers_nothing() {
        let (client, mut events, _directory, _conns) = start(Duration::from_secs(10));
        let err = client.join("missing").await.unwrap_err();
        assert!(matches!(err, Error::Directory { .. }));
        assert!(client.channels().await.unwrap().is_empty());
        assert!(matches!(events.next().await, Some(Event::SocketError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn leave_unsubscribes_and_notifies() {
        let (client, mut events, _directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joiner = tokio::spawn({
            let client = client.clone();
            async move { client.join("xqc").await }
        });
        for _ in 0..5 {
            conn.next_sent().await;
        }
        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);
        let channel = joiner.await.unwrap().unwrap();

        client.leave("XQC").await.unwrap();
        let mut unsubscribed = Vec::new();
        for _ in 0..5 {
            if let Sent::Text(v) = conn.next_sent().await {
                assert_eq!(v["event"], "pusher:unsubscribe");
                unsubscribed.push(v["data"]["channel"].as_str().unwrap().to_string());
            }
        }
        assert_eq!(unsubscribed, channel.topics().to_vec());

        loop {
            if let Some(Event::Leave { channel: left, reason }) = events.next().await {
                assert!(Arc::ptr_eq(&left, &channel));
                assert_eq!(reason, crate::LEAVE_REASON);
                break;
            }
        }
        assert!(client.channels().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chat_events_carry_channel() {
        let (client, mut events, _directory, mut conns) = start(Duration::from_secs(10));
        let mut conn = connected(&client, &mut events, &mut conns).await;

        let joiner = tokio::spawn({
            let client = client.clone();
            async move { client.join("xqc").await }
        });
        for _ in 0..5 {
            conn.next_sent().await;
        }
        conn.push(r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.456.v2"}"#);
        joiner.await.unwrap().unwrap();

        let data = serde_json::json!({
            "id": "m1",
            "chatroom_id": 456,
            "content": "hello",
            "type": "message",
            "created_at": "2024-01-01T00:00:00Z",
            "sender": {
                "id": 9,
                "username": "viewer",
                "slug": "viewer",
                "identity": {"color": "#fff", "badges": []},
            },
        });
        let frame = serde_json::json!({
            "event": r"App\Events\ChatMessageEvent",
            "data": data.to_string(),
            "channel": "chatrooms.456.v2",
        });
        conn.push(&frame.to_string());

        loop {
            match events.next().await {
                Some(Event::Chat { event, channel }) => {
                    assert_eq!(event.name(), "message");
                    assert_eq!(channel.name(), "xqc");
                    break;
                }
                Some(_) => {}
                None => panic!("event stream ended"),
            }
        }
    }

    #[tokio::test]
    async fn dropping_client_stops_loop() {
        let (client, mut events, _directory, _conns) = start(Duration::from_secs(10));
        drop(client);
        assert!(events.next().await.is_none());
    }
}
