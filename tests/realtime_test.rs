//! End-to-end tests against an in-process Pusher-protocol broker.
//!
//! The broker accepts one connection at a time, greets it with
//! `pusher:connection_established`, forwards every client frame to the test
//! and sends whatever the test queues.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reportcast::config::{BrokerConfig, Config};
use reportcast::credentials::{CredentialStore, MemoryCredentialStore};
use reportcast::notifications::{AttachOutcome, SkipReason};
use reportcast::{
    ApiClient, ConnectionContext, LifecycleOutcome, NotificationKind, NotificationStore,
    TransportState,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

enum BrokerCommand {
    Send(Value),
    Close,
}

struct FakeBroker {
    port: u16,
    frames: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<BrokerCommand>,
}

impl FakeBroker {
    async fn start() -> Self {
        Self::start_with_greeting_delay(Duration::ZERO).await
    }

    /// Broker that completes the WebSocket handshake at once but holds
    /// `connection_established` back for `delay`.
    async fn start_with_greeting_delay(delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut connections = 0;
            while let Ok((stream, _)) = listener.accept().await {
                connections += 1;
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut sink, mut source) = ws.split();
                tokio::time::sleep(delay).await;

                let hello = json!({
                    "event": "pusher:connection_established",
                    "data": json!({
                        "socket_id": format!("{connections}.4242"),
                        "activity_timeout": 120
                    })
                    .to_string()
                });
                if sink.send(Message::Text(hello.to_string())).await.is_err() {
                    continue;
                }

                loop {
                    tokio::select! {
                        msg = source.next() => match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = frames_tx.send(serde_json::from_str(&text).unwrap());
                            }
                            Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        command = command_rx.recv() => match command {
                            Some(BrokerCommand::Send(frame)) => {
                                let _ = sink.send(Message::Text(frame.to_string())).await;
                            }
                            Some(BrokerCommand::Close) => {
                                let _ = sink.close().await;
                                break;
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            port,
            frames,
            commands,
        }
    }

    async fn next_frame(&mut self) -> Value {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("broker stopped")
    }

    async fn assert_quiet(&mut self) {
        let extra = timeout(Duration::from_millis(200), self.frames.recv()).await;
        assert!(extra.is_err(), "unexpected client frame: {:?}", extra);
    }

    fn send(&self, frame: Value) {
        let _ = self.commands.send(BrokerCommand::Send(frame));
    }

    fn send_event(&self, channel: &str, event: &str, data: &Value) {
        self.send(json!({"event": event, "channel": channel, "data": data.to_string()}));
    }

    fn close(&self) {
        let _ = self.commands.send(BrokerCommand::Close);
    }
}

struct Harness {
    broker: FakeBroker,
    api_server: MockServer,
    ctx: ConnectionContext,
    store: NotificationStore,
}

async fn harness() -> Harness {
    harness_with(FakeBroker::start().await).await
}

async fn harness_with(broker: FakeBroker) -> Harness {
    let api_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/broadcasting/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"auth": "app-key:sig"})))
        .mount(&api_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/notifications/unread-count"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": {"count": 1}})),
        )
        .mount(&api_server)
        .await;

    let config = Config {
        api_url: format!("{}/api", api_server.uri()),
        broker: BrokerConfig {
            host: "127.0.0.1".to_string(),
            port: broker.port,
            app_key: "app-key".to_string(),
            ..BrokerConfig::default()
        },
        user_id: Some("7".to_string()),
        ..Config::default()
    };
    let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::with_token("tok"));
    let api = Arc::new(ApiClient::new(&config, Arc::clone(&credentials)).unwrap());
    let ctx = ConnectionContext::new(&config, credentials, Arc::clone(&api) as _);
    let store = NotificationStore::new(api, config.locale.clone());

    Harness {
        broker,
        api_server,
        ctx,
        store,
    }
}

async fn wait_for_state(ctx: &ConnectionContext, state: TransportState) {
    let mut states = ctx.watch_connection();
    let reached = timeout(WAIT, states.wait_for(|s| *s == state)).await;
    assert!(reached.is_ok(), "never reached {state}, at {}", ctx.state());
}

async fn wait_for_len(store: &NotificationStore, len: usize) {
    let mut changes = store.subscribe_changes();
    timeout(WAIT, async {
        while store.len() < len {
            changes.changed().await.unwrap();
        }
    })
    .await
    .expect("store never filled");
}

fn subscribe_data(frame: &Value) -> &Value {
    assert_eq!(frame["event"], "pusher:subscribe", "{frame}");
    &frame["data"]
}

#[tokio::test]
async fn test_attach_subscribes_each_channel_once() {
    let mut h = harness().await;
    assert_eq!(h.ctx.start().await, LifecycleOutcome::Connecting);
    wait_for_state(&h.ctx, TransportState::Connected).await;
    assert_eq!(h.ctx.transport().socket_id().as_deref(), Some("1.4242"));

    let outcome = h.store.attach(&h.ctx, Some("7")).unwrap();
    assert_eq!(
        outcome,
        AttachOutcome::Attached {
            channels: vec!["private-user.7".to_string(), "reports".to_string()]
        }
    );

    let private = h.broker.next_frame().await;
    assert_eq!(
        subscribe_data(&private),
        &json!({"channel": "private-user.7", "auth": "app-key:sig"})
    );
    let public = h.broker.next_frame().await;
    assert_eq!(subscribe_data(&public), &json!({"channel": "reports"}));
    h.broker.assert_quiet().await;

    assert_eq!(
        h.store.attach(&h.ctx, Some("7")).unwrap(),
        AttachOutcome::AlreadyAttached
    );
    h.broker.assert_quiet().await;
}

#[tokio::test]
async fn test_dual_path_delivery_stores_once() {
    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;
    h.store.attach(&h.ctx, Some("7")).unwrap();
    h.broker.next_frame().await;
    h.broker.next_frame().await;

    let broadcasts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&broadcasts);
    let _registration = h.store.register_refresh_callback(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    h.broker.send_event(
        "private-user.7",
        "report.status.updated",
        &json!({"report_id": 5, "status": 3}),
    );
    wait_for_len(&h.store, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.settle().await;

    let stored = h.store.notifications();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, "report-5");
    assert_eq!(stored[0].kind, NotificationKind::ReportStatus);
    assert_eq!(stored[0].title, "Report Completed");
    assert_eq!(broadcasts.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.unread_count(), 1);
}

#[tokio::test]
async fn test_events_arrive_newest_first() {
    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;
    h.store.attach(&h.ctx, Some("7")).unwrap();
    h.broker.next_frame().await;
    h.broker.next_frame().await;

    h.broker.send_event(
        "private-user.7",
        "points.updated",
        &json!({"transaction_id": "p1", "points": 50, "total_points": 1050}),
    );
    h.broker.send_event(
        "private-user.7",
        "wallet.updated",
        &json!({"transaction_id": "w1", "amount": -200, "balance": 800, "reason": "Fee"}),
    );
    h.broker.send_event(
        "reports",
        "notification.sent",
        &json!({"id": 31, "title": "New report nearby", "message": "Broken streetlight"}),
    );
    wait_for_len(&h.store, 3).await;

    let ids: Vec<_> = h.store.notifications().into_iter().map(|n| n.id).collect();
    assert_eq!(ids, vec!["notification-31", "wallet-w1", "points-p1"]);
    let wallet = h.store.get("wallet-w1").unwrap();
    assert_eq!(wallet.title, "Wallet Debited");
    assert_eq!(wallet.message, "-200 credits: Fee\nNew balance: 800 credits");
    h.store.settle().await;
}

#[tokio::test]
async fn test_subscription_before_connect_is_sent_once_established() {
    let mut h = harness().await;
    h.ctx.subscribe("reports");
    assert!(h.ctx.listen("reports", ".notification.sent", Arc::new(|_: &Value| {})).is_ok());

    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;

    let frame = h.broker.next_frame().await;
    assert_eq!(subscribe_data(&frame), &json!({"channel": "reports"}));
    h.broker.assert_quiet().await;
}

#[tokio::test]
async fn test_ping_is_answered() {
    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;

    h.broker.send(json!({"event": "pusher:ping", "data": {}}));
    let pong = h.broker.next_frame().await;
    assert_eq!(pong["event"], "pusher:pong");
}

#[tokio::test]
async fn test_undecodable_multibyte_frame_keeps_session() {
    // Frame previews are only formatted when a logger is listening.
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .is_test(true)
        .try_init();

    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;

    // No `event` field; byte 100 of the encoded frame falls inside a
    // three-byte character.
    h.broker.send(json!({"channel": "x", "data": "ổ".repeat(40)}));
    h.broker.send(json!({"event": "pusher:ping", "data": {}}));

    let pong = h.broker.next_frame().await;
    assert_eq!(pong["event"], "pusher:pong");
    assert_eq!(h.ctx.state(), TransportState::Connected);
}

#[tokio::test]
async fn test_follow_connection_attaches_when_session_comes_up_late() {
    let Harness {
        mut broker,
        api_server,
        ctx,
        store,
    } = harness_with(FakeBroker::start_with_greeting_delay(Duration::from_millis(400)).await).await;
    let ctx = Arc::new(ctx);

    assert_eq!(ctx.start().await, LifecycleOutcome::Connecting);
    assert_eq!(
        store.attach(&ctx, Some("7")).unwrap(),
        AttachOutcome::Skipped(SkipReason::NotConnected)
    );

    let follower = tokio::spawn({
        let store = store.clone();
        let ctx = Arc::clone(&ctx);
        async move { store.follow_connection(&ctx, Some("7")).await }
    });

    wait_for_state(&ctx, TransportState::Connected).await;
    let private = broker.next_frame().await;
    assert_eq!(subscribe_data(&private)["channel"], "private-user.7");
    let public = broker.next_frame().await;
    assert_eq!(subscribe_data(&public), &json!({"channel": "reports"}));

    broker.send_event(
        "private-user.7",
        "points.updated",
        &json!({"transaction_id": "late", "points": 5}),
    );
    wait_for_len(&store, 1).await;
    assert!(store.get("points-late").is_some());

    follower.abort();
    store.settle().await;
    drop(api_server);
}

#[tokio::test]
async fn test_follow_connection_survives_reconnect() {
    let Harness {
        mut broker,
        api_server,
        ctx,
        store,
    } = harness().await;
    let ctx = Arc::new(ctx);
    ctx.start().await;

    let follower = tokio::spawn({
        let store = store.clone();
        let ctx = Arc::clone(&ctx);
        async move { store.follow_connection(&ctx, Some("7")).await }
    });
    wait_for_state(&ctx, TransportState::Connected).await;
    broker.next_frame().await;
    broker.next_frame().await;

    broker.close();
    wait_for_state(&ctx, TransportState::Disconnected).await;
    ctx.start().await;
    wait_for_state(&ctx, TransportState::Connected).await;

    let mut resent = HashSet::new();
    for _ in 0..2 {
        let frame = broker.next_frame().await;
        resent.insert(subscribe_data(&frame)["channel"].as_str().unwrap().to_string());
    }
    assert_eq!(
        resent,
        HashSet::from(["private-user.7".to_string(), "reports".to_string()])
    );
    broker.assert_quiet().await;

    broker.send_event(
        "reports",
        "notification.sent",
        &json!({"id": 90, "title": "After reconnect"}),
    );
    wait_for_len(&store, 1).await;

    follower.abort();
    store.settle().await;
    drop(api_server);
}

#[tokio::test]
async fn test_fatal_broker_error_marks_failed() {
    let h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;

    h.broker.send(json!({
        "event": "pusher:error",
        "data": {"code": 4001, "message": "Application disabled"}
    }));
    wait_for_state(&h.ctx, TransportState::Failed).await;
    assert!(!h.ctx.connected());
    assert_eq!(h.ctx.transport().socket_id(), None);
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;
    h.ctx.subscribe("reports");
    h.broker.next_frame().await;

    h.broker.close();
    wait_for_state(&h.ctx, TransportState::Disconnected).await;
    assert!(!h.ctx.connected());

    assert_eq!(h.ctx.start().await, LifecycleOutcome::Connecting);
    wait_for_state(&h.ctx, TransportState::Connected).await;
    assert_eq!(h.ctx.transport().socket_id().as_deref(), Some("2.4242"));
    let frame = h.broker.next_frame().await;
    assert_eq!(subscribe_data(&frame), &json!({"channel": "reports"}));
}

#[tokio::test]
async fn test_start_twice_is_idempotent() {
    let h = harness().await;
    h.ctx.start().await;
    assert_eq!(h.ctx.start().await, LifecycleOutcome::AlreadyConnected);
    wait_for_state(&h.ctx, TransportState::Connected).await;
    assert_eq!(h.ctx.start().await, LifecycleOutcome::AlreadyConnected);
}

#[tokio::test]
async fn test_teardown_unsubscribes_and_disconnects() {
    let mut h = harness().await;
    h.ctx.start().await;
    wait_for_state(&h.ctx, TransportState::Connected).await;
    h.store.attach(&h.ctx, Some("7")).unwrap();
    h.broker.next_frame().await;
    h.broker.next_frame().await;

    h.store.detach(&h.ctx);
    h.ctx.teardown().await;

    let mut unsubscribed = HashSet::new();
    for _ in 0..2 {
        let frame = h.broker.next_frame().await;
        assert_eq!(frame["event"], "pusher:unsubscribe");
        unsubscribed.insert(frame["data"]["channel"].as_str().unwrap().to_string());
    }
    assert_eq!(
        unsubscribed,
        HashSet::from(["private-user.7".to_string(), "reports".to_string()])
    );
    assert_eq!(h.ctx.state(), TransportState::Disconnected);
    assert!(h.ctx.transport().subscribed_channels().is_empty());
    assert_eq!(
        h.ctx
            .registry()
            .listener_count("private-user.7", "report.status.updated"),
        0
    );
    h.store.settle().await;
    drop(h.api_server);
}
