use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use httpmock::prelude::*;
use kick_subscriber::{
    ChannelInfo, ChatEvent, ChatroomInfo, Client, ClientOptions, ConnectionState, Directory, Error,
    Event, Events, KickDirectory, TimingConfig, WsConnector,
};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct MockBroker {
    listener: TcpListener,
    port: u16,
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

impl MockBroker {
    async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    fn endpoint(&self) -> String {
        format!("ws://127.0.0.1:{}/app/test-key", self.port)
    }

    /// Accept one connection without sending anything.
    async fn accept_raw(&self) -> Result<WsStream, Box<dyn std::error::Error>> {
        let (tcp, _) = self.listener.accept().await?;
        Ok(tokio_tungstenite::accept_async(tcp).await?)
    }

    /// Accept one connection and announce the session.
    async fn accept_and_handshake(
        &self,
        activity_timeout: u64,
    ) -> Result<WsStream, Box<dyn std::error::Error>> {
        let mut ws = self.accept_raw().await?;
        let data = serde_json::json!({"socket_id": "123.456", "activity_timeout": activity_timeout});
        send_event(&mut ws, "pusher:connection_established", data, None).await?;
        Ok(ws)
    }
}

/// Send a Pusher event with its `data` JSON-encoded as a string, the way the
/// broker does.
async fn send_event(
    ws: &mut WsStream,
    event: &str,
    data: serde_json::Value,
    channel: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut frame = serde_json::json!({"event": event, "data": data.to_string()});
    if let Some(channel) = channel {
        frame["channel"] = channel.into();
    }
    ws.send(tungstenite::Message::text(frame.to_string())).await?;
    Ok(())
}

async fn ack(ws: &mut WsStream, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    send_event(
        ws,
        "pusher_internal:subscription_succeeded",
        serde_json::json!({}),
        Some(topic),
    )
    .await
}

async fn read_frame(ws: &mut WsStream) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await?
            .ok_or("WebSocket closed unexpectedly")??;
        if let tungstenite::Message::Text(text) = frame {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Read `n` frames and return the subscribe topics among them, in order.
async fn read_subscriptions(
    ws: &mut WsStream,
    n: usize,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut topics = Vec::new();
    for _ in 0..n {
        let frame = read_frame(ws).await?;
        assert_eq!(frame["event"], "pusher:subscribe");
        topics.push(
            frame["data"]["channel"]
                .as_str()
                .ok_or("subscribe without channel")?
                .to_string(),
        );
    }
    Ok(topics)
}

/// Next notification other than the raw-frame tap.
async fn next_event(events: &mut Events) -> Result<Event, Box<dyn std::error::Error>> {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await?
            .ok_or("event stream ended")?;
        if !matches!(event, Event::Raw(_)) {
            return Ok(event);
        }
    }
}

const XQC_TOPICS: [&str; 5] = [
    "chatrooms.456.v2",
    "chatroom_456",
    "channel_123",
    "channel.123",
    "predictions-channel-123",
];

#[derive(Default)]
struct FakeDirectory {
    lookups: AtomicUsize,
}

#[async_trait]
impl Directory for FakeDirectory {
    async fn channel_info(&self, name: &str) -> Result<ChannelInfo, Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_value(serde_json::json!({
            "id": 123,
            "slug": name,
            "user": {"username": "xQc"},
            "chatroom": {"id": 456},
        }))?)
    }

    async fn chatroom_info(&self, _name: &str) -> Result<ChatroomInfo, Error> {
        Ok(ChatroomInfo(serde_json::json!({"id": 456, "slow_mode": false})))
    }
}

fn test_options(broker: &MockBroker) -> ClientOptions {
    ClientOptions {
        endpoint: Some(broker.endpoint()),
        reconnect_initial_timeout: Duration::from_millis(10),
        reconnect_max_timeout: Duration::from_millis(50),
        timing: TimingConfig {
            join_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(1),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn start_client(options: ClientOptions) -> Result<(Client, Events, Arc<FakeDirectory>), Error> {
    let directory = Arc::new(FakeDirectory::default());
    let (client, events) = Client::new(options, directory.clone(), Arc::new(WsConnector))?;
    Ok((client, events, directory))
}

// ---------------------------------------------------------------------------
// Test 1: handshake brings the client to Connected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handshake_connects() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let _ws = broker.accept_and_handshake(120).await?;

    assert!(matches!(next_event(&mut events).await?, Event::Connected));
    assert_eq!(client.state().await?, ConnectionState::Connected);

    // A second connect fails fast and leaves the connection alone.
    assert!(matches!(client.connect().await, Err(Error::AlreadyConnected)));
    assert_eq!(client.state().await?, ConnectionState::Connected);
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 2: join subscribes every topic and resolves on the primary ack
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_subscribes_and_resolves() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));

    let joiner = tokio::spawn({
        let client = client.clone();
        async move { client.join("#xQc").await }
    });

    assert_eq!(read_subscriptions(&mut ws, 5).await?, XQC_TOPICS);
    ack(&mut ws, "chatroom_456").await?;
    ack(&mut ws, "chatrooms.456.v2").await?;

    let channel = joiner.await??;
    assert_eq!(channel.name(), "xqc");
    assert_eq!(channel.id(), 123);
    assert_eq!(channel.chatroom_id(), 456);
    assert_eq!(channel.username(), "xQc");

    match next_event(&mut events).await? {
        Event::Join(joined) => assert!(Arc::ptr_eq(&joined, &channel)),
        other => panic!("expected Join, got {other:?}"),
    }

    // Joining again is served locally: no lookup, no frames.
    let again = client.join("XQC").await?;
    assert!(Arc::ptr_eq(&again, &channel));
    assert_eq!(dir.lookups.load(Ordering::SeqCst), 1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 3: chat frames are typed and tagged with their channel; raw tap sees all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_message_dispatch() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));

    let joiner = tokio::spawn({
        let client = client.clone();
        async move { client.join("xqc").await }
    });
    read_subscriptions(&mut ws, 5).await?;
    ack(&mut ws, "chatrooms.456.v2").await?;
    joiner.await??;
    assert!(matches!(next_event(&mut events).await?, Event::Join(_)));

    send_event(&mut ws, r"App\Events\Unknown", serde_json::json!({}), Some("chatrooms.456.v2")).await?;
    send_event(
        &mut ws,
        r"App\Events\ChatMessageEvent",
        serde_json::json!({
            "id": "msg-1",
            "chatroom_id": 456,
            "content": "hello",
            "type": "message",
            "created_at": "2024-01-01T00:00:00Z",
            "sender": {
                "id": 9,
                "username": "Viewer",
                "slug": "viewer",
                "identity": {"color": "#00FF00", "badges": [{"type": "subscriber", "text": "Sub"}]},
            },
        }),
        Some("chatrooms.456.v2"),
    )
    .await?;

    let mut raw_unknown = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await?
            .ok_or("event stream ended")?;
        match event {
            Event::Raw(text) if text.contains("Unknown") => raw_unknown = true,
            Event::Raw(_) => {}
            Event::Chat { event: ChatEvent::Message(msg), channel } => {
                assert_eq!(msg.content, "hello");
                assert_eq!(msg.sender.username, "Viewer");
                assert_eq!(channel.name(), "xqc");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert!(raw_unknown, "raw tap missed the unknown event");
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 4: broker error 4200 forces a reconnect and resubscribe
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forced_reconnect_resubscribes() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));

    let joiner = tokio::spawn({
        let client = client.clone();
        async move { client.join("xqc").await }
    });
    read_subscriptions(&mut ws, 5).await?;
    ack(&mut ws, "chatrooms.456.v2").await?;
    joiner.await??;
    assert!(matches!(next_event(&mut events).await?, Event::Join(_)));

    send_event(
        &mut ws,
        "pusher:error",
        serde_json::json!({"code": 4200, "message": "Please reconnect immediately"}),
        None,
    )
    .await?;
    assert!(matches!(next_event(&mut events).await?, Event::Reconnecting));

    let mut ws2 = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));
    assert_eq!(read_subscriptions(&mut ws2, 5).await?, XQC_TOPICS);
    assert_eq!(client.channels().await?.len(), 1);
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 5: exhausted reconnect attempts produce exactly one error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn max_attempts_reported_once() -> TestResult {
    let broker = MockBroker::start().await?;
    let mut options = test_options(&broker);
    options.reconnect_max_attempts = Some(2);
    let (client, mut events, _dir) = start_client(options)?;

    client.connect().await?;
    for _ in 0..3 {
        let mut ws = broker.accept_raw().await?;
        ws.close(None).await?;
    }

    let mut max_errors = 0;
    let mut reconnecting = 0;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(500), events.next()).await {
        match event {
            Event::SocketError { message } if message == "Maximum reconnect attempts reached." => {
                max_errors += 1;
            }
            Event::Reconnecting => reconnecting += 1,
            _ => {}
        }
    }
    assert_eq!(max_errors, 1);
    assert_eq!(reconnecting, 2);
    assert_eq!(client.state().await?, ConnectionState::Disconnected);

    // No further attempts.
    let extra = tokio::time::timeout(Duration::from_millis(200), broker.listener.accept()).await;
    assert!(extra.is_err());
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 6: close is terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_disconnects_without_reconnect() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));

    client.close().await?;
    // Drive the server side so the closing handshake completes.
    tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });

    match next_event(&mut events).await? {
        Event::Disconnected { reason } => assert!(!reason.is_empty()),
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert_eq!(client.state().await?, ConnectionState::Disconnected);

    let extra = tokio::time::timeout(Duration::from_millis(200), broker.listener.accept()).await;
    assert!(extra.is_err());
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 7: heartbeat follows the announced activity timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn keepalive_pings() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(1).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));

    let frame = read_frame(&mut ws).await?;
    assert_eq!(frame, serde_json::json!({"event": "pusher:ping", "data": {}}));
    send_event(&mut ws, "pusher:pong", serde_json::json!({}), None).await?;
    assert_eq!(client.state().await?, ConnectionState::Connected);
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 8: leave of an unknown channel is a silent no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn leave_unknown_channel() -> TestResult {
    let broker = MockBroker::start().await?;
    let (client, mut events, _dir) = start_client(test_options(&broker))?;

    client.leave("nobody").await?;
    assert!(
        tokio::time::timeout(Duration::from_millis(100), events.next())
            .await
            .is_err()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Test 9: channels from the options are joined with the HTTP directory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn auto_join_with_http_directory() -> TestResult {
    let http = MockServer::start_async().await;
    http.mock_async(|when, then| {
        when.method(GET).path("/api/v2/channels/xqc");
        then.status(200).json_body(serde_json::json!({
            "id": 123,
            "slug": "xqc",
            "user": {"username": "xQc"},
            "chatroom": {"id": 456},
        }));
    })
    .await;
    http.mock_async(|when, then| {
        when.method(GET).path("/api/v2/channels/xqc/chatroom");
        then.status(200).json_body(serde_json::json!({"id": 456}));
    })
    .await;

    let broker = MockBroker::start().await?;
    let mut options = test_options(&broker);
    options.channels = vec!["xqc".to_string()];
    let directory = Arc::new(KickDirectory::with_base_url(http.base_url())?);
    let (client, mut events) = Client::new(options, directory, Arc::new(WsConnector))?;

    // Give the background join time to register before the handshake so the
    // subscriptions go out as part of it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.channels().await?.len(), 1);

    client.connect().await?;
    let mut ws = broker.accept_and_handshake(120).await?;
    assert!(matches!(next_event(&mut events).await?, Event::Connected));
    assert_eq!(read_subscriptions(&mut ws, 5).await?, XQC_TOPICS);

    ack(&mut ws, "chatrooms.456.v2").await?;
    match next_event(&mut events).await? {
        Event::Join(channel) => assert_eq!(channel.username(), "xQc"),
        other => panic!("expected Join, got {other:?}"),
    }
    Ok(())
}
