//! End-to-end feed behavior over the in-memory transport.
//!
//! All tests run on a paused clock, so reconnect delays elapse instantly.

use std::sync::Arc;
use std::time::Duration;

use livefeed_client::{
    FeedConfig, HandlerError, LiveFeed, MemoryConnector, MemoryListener, MemoryPeer,
};
use livefeed_core::{ConnectionStatus, InboundMessage, Notification, ReconnectPolicy};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};

const TIMEOUT: Duration = Duration::from_secs(60);
const ENDPOINT: &str = "mem://dashboard/api/ws";

fn config(max_attempts: u32, base_delay_ms: u64) -> FeedConfig {
    FeedConfig::new(ENDPOINT).with_policy(ReconnectPolicy {
        max_attempts,
        base_delay: Duration::from_millis(base_delay_ms),
        min_stable_uptime: None,
    })
}

fn start(config: FeedConfig) -> (LiveFeed, MemoryConnector, MemoryListener) {
    let (connector, listener) = MemoryConnector::new();
    let feed = LiveFeed::start(config, Arc::new(connector.clone()));
    (feed, connector, listener)
}

async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
    timeout(TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

async fn next_json(peer: &mut MemoryPeer) -> Value {
    let text = timeout(TIMEOUT, peer.recv_text())
        .await
        .expect("timed out waiting for a frame")
        .expect("client closed the channel");
    serde_json::from_str(&text).expect("client wrote invalid JSON")
}

async fn wait_status(feed: &LiveFeed, status: ConnectionStatus) {
    let mut rx = feed.watch_status();
    let _ = timeout(TIMEOUT, rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {status}"))
        .expect("status publisher dropped");
}

async fn next_notification(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

/// A handler forwarding every payload it sees.
fn forward(
    tx: mpsc::UnboundedSender<Value>,
) -> impl Fn(&InboundMessage) -> Result<(), HandlerError> + Send + 'static {
    move |m: &InboundMessage| -> Result<(), HandlerError> {
        tx.send(m.payload.clone())?;
        Ok(())
    }
}

async fn next_payload(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a dispatched message")
        .expect("handler dropped")
}

/// Timer deadlines land on the next millisecond tick.
fn assert_delay(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + Duration::from_millis(5),
        "expected ~{expected:?}, got {actual:?}"
    );
}

fn subscribe_frame(topic: &str) -> Value {
    json!({"action": "subscribe", "channel": topic})
}

// ── Subscriptions ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn replays_topics_in_order_before_dispatch() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    for topic in ["A", "B", "C"] {
        feed.subscribe(topic);
    }
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = feed.on_topic("A", forward(tx));

    let mut peer = accept(&mut listener).await;
    assert_eq!(peer.endpoint(), ENDPOINT);
    assert!(peer.send_text(r#"{"channel":"A","n":1}"#));

    assert_eq!(next_payload(&mut rx).await["n"], 1);
    // By the time the first message was dispatched, the replay was written.
    let written: Vec<Value> = std::iter::from_fn(|| peer.try_recv())
        .map(|f| serde_json::from_str(&f.into_text().unwrap()).unwrap())
        .collect();
    assert_eq!(
        written,
        vec![subscribe_frame("A"), subscribe_frame("B"), subscribe_frame("C")]
    );
    assert_eq!(feed.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn subscribe_is_idempotent() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    feed.subscribe("a");
    feed.subscribe("a");
    feed.subscribe("b");

    assert_eq!(next_json(&mut peer).await, subscribe_frame("a"));
    assert_eq!(next_json(&mut peer).await, subscribe_frame("b"));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_sends_only_for_known_topics() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    feed.subscribe("a");
    let mut peer = accept(&mut listener).await;
    assert_eq!(next_json(&mut peer).await, subscribe_frame("a"));

    feed.unsubscribe("never-subscribed");
    feed.unsubscribe("a");
    feed.unsubscribe("a");
    feed.subscribe("fence");

    assert_eq!(
        next_json(&mut peer).await,
        json!({"action": "unsubscribe", "channel": "a"})
    );
    assert_eq!(next_json(&mut peer).await, subscribe_frame("fence"));
}

#[tokio::test(start_paused = true)]
async fn topics_added_while_disconnected_are_replayed() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    peer.close();
    wait_status(&feed, ConnectionStatus::Reconnecting).await;
    feed.subscribe("late");

    let mut peer = accept(&mut listener).await;
    assert_eq!(next_json(&mut peer).await, subscribe_frame("late"));
}

// ── Sending ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_is_dropped() {
    let (feed, connector, mut listener) = start(config(1, 1000));
    connector.set_refusing(true);
    let mut notes = feed.notifications();

    feed.send(&json!({"early": true})).unwrap();
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionLost { attempts: 1 }
    );

    connector.set_refusing(false);
    feed.reconnect();
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    feed.send(&json!({"late": true})).unwrap();
    assert_eq!(next_json(&mut peer).await, json!({"late": true}));
}

// ── Reconnection ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnects_after_server_close() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    feed.subscribe("prices");
    let mut notes = feed.notifications();

    let mut peer = accept(&mut listener).await;
    assert_eq!(next_json(&mut peer).await, subscribe_frame("prices"));
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionEstablished
    );

    let closed_at = Instant::now();
    peer.close();
    wait_status(&feed, ConnectionStatus::Reconnecting).await;

    let mut peer = accept(&mut listener).await;
    assert_delay(closed_at.elapsed(), Duration::from_millis(1000));
    assert_eq!(next_json(&mut peer).await, subscribe_frame("prices"));
    wait_status(&feed, ConnectionStatus::Connected).await;
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionEstablished
    );
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_linearly() {
    let (feed, connector, _listener) = start(config(3, 1000));
    connector.set_refusing(true);
    let mut notes = feed.notifications();

    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionLost { attempts: 3 }
    );

    let times = connector.attempt_times();
    assert_eq!(times.len(), 4);
    for (n, pair) in (1u32..).zip(times.windows(2)) {
        assert_delay(pair[1] - pair[0], Duration::from_millis(1000) * n);
    }
}

#[tokio::test(start_paused = true)]
async fn retry_cap_stops_attempts() {
    let (feed, connector, _listener) = start(config(3, 100));
    connector.set_refusing(true);
    let mut notes = feed.notifications();

    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionLost { attempts: 3 }
    );
    assert_eq!(feed.status(), ConnectionStatus::Disconnected);
    assert_eq!(connector.attempts(), 4);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.attempts(), 4);
    assert!(matches!(
        notes.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test(start_paused = true)]
async fn explicit_reconnect_after_cap() {
    let (feed, connector, mut listener) = start(config(1, 100));
    connector.set_refusing(true);
    let mut notes = feed.notifications();
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionLost { attempts: 1 }
    );

    connector.set_refusing(false);
    feed.reconnect();
    let _peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionEstablished
    );
}

#[tokio::test(start_paused = true)]
async fn oversized_delay_keeps_event_loop_alive() {
    let policy = ReconnectPolicy {
        max_attempts: 3,
        base_delay: Duration::MAX,
        min_stable_uptime: None,
    };
    let (feed, connector, mut listener) = start(FeedConfig::new(ENDPOINT).with_policy(policy));
    connector.set_refusing(true);
    wait_status(&feed, ConnectionStatus::Reconnecting).await;

    connector.set_refusing(false);
    feed.reconnect();
    let _peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_counts_once() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    let failed_at = Instant::now();
    peer.fail("connection reset");
    let _peer = accept(&mut listener).await;
    // First attempt of the outage: one base delay, not two.
    assert_delay(failed_at.elapsed(), Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn flapping_server_exhausts_with_stable_uptime() {
    let policy = ReconnectPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(100),
        min_stable_uptime: Some(Duration::from_secs(10)),
    };
    let (feed, _connector, mut listener) = start(FeedConfig::new(ENDPOINT).with_policy(policy));
    let mut notes = feed.notifications();

    for _ in 0..3 {
        let mut peer = accept(&mut listener).await;
        assert_eq!(
            next_notification(&mut notes).await,
            Notification::ConnectionEstablished
        );
        peer.close();
    }
    assert_eq!(
        next_notification(&mut notes).await,
        Notification::ConnectionLost { attempts: 2 }
    );
    assert_eq!(feed.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn missing_endpoint_never_connects() {
    let config = FeedConfig {
        endpoint: None,
        policy: ReconnectPolicy::default(),
    };
    let (feed, connector, _listener) = start(config);
    let mut notes = feed.notifications();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 0);
    assert_eq!(feed.status(), ConnectionStatus::Disconnected);
    assert!(notes.try_recv().is_err());
}

// ── Dispatch ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn routes_messages_and_tracks_last() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let (tx, mut prices) = mpsc::unbounded_channel();
    let _ = feed.on_topic("prices", forward(tx));
    let (tx, mut news) = mpsc::unbounded_channel();
    let _ = feed.on_topic("news", forward(tx));

    let peer = accept(&mut listener).await;
    assert!(peer.send_text("not json at all"));
    assert!(peer.send_text(r#"{"channel":"prices","v":1}"#));
    assert!(peer.send_binary(br#"{"topic":"news","v":2}"#.to_vec()));

    assert_eq!(next_payload(&mut prices).await["v"], 1);
    assert_eq!(next_payload(&mut news).await["v"], 2);

    let last = feed.last_message().expect("last message recorded");
    assert_eq!(last.payload, json!({"topic": "news", "v": 2}));
    assert_eq!(feed.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn unrouted_message_only_updates_last() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let mut last = feed.watch_last_message();
    let peer = accept(&mut listener).await;

    assert!(peer.send_text(r#"{"kind":"heartbeat"}"#));
    let _ = timeout(TIMEOUT, last.wait_for(Option::is_some))
        .await
        .expect("timed out waiting for a message")
        .expect("dispatcher dropped");
    assert_eq!(
        feed.last_message().map(|m| m.payload.clone()),
        Some(json!({"kind": "heartbeat"}))
    );
}

#[tokio::test(start_paused = true)]
async fn failing_handler_does_not_stop_others() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let _ = feed.on_topic("t", |_: &InboundMessage| -> Result<(), HandlerError> {
        panic!("handler bug")
    });
    let _ = feed.on_topic("t", |_: &InboundMessage| -> Result<(), HandlerError> {
        Err("rejected".into())
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = feed.on_topic("t", forward(tx));

    let peer = accept(&mut listener).await;
    assert!(peer.send_text(r#"{"channel":"t","n":1}"#));
    assert!(peer.send_text(r#"{"channel":"t","n":2}"#));

    assert_eq!(next_payload(&mut rx).await["n"], 1);
    assert_eq!(next_payload(&mut rx).await["n"], 2);
    assert_eq!(feed.status(), ConnectionStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn removed_handler_gets_nothing() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let (tx, mut removed) = mpsc::unbounded_channel();
    let id = feed.on_topic("t", forward(tx));
    feed.remove_handler(id);
    let (tx, mut fence) = mpsc::unbounded_channel();
    let _ = feed.on_topic("fence", forward(tx));

    let peer = accept(&mut listener).await;
    assert!(peer.send_text(r#"{"channel":"t"}"#));
    assert!(peer.send_text(r#"{"channel":"fence"}"#));

    let _ = next_payload(&mut fence).await;
    assert!(removed.try_recv().is_err());
}

// ── Teardown ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_closes_channel_and_stops() {
    let (feed, connector, mut listener) = start(config(5, 1000));
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    feed.shutdown().await;
    feed.shutdown().await;

    assert!(timeout(TIMEOUT, peer.recv()).await.unwrap().is_none());
    assert_eq!(feed.status(), ConnectionStatus::Disconnected);

    feed.reconnect();
    feed.subscribe("ignored");
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(listener.try_accept().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_pending_reconnect() {
    let (feed, connector, _listener) = start(config(5, 1000));
    connector.set_refusing(true);
    wait_status(&feed, ConnectionStatus::Reconnecting).await;

    feed.shutdown().await;
    assert_eq!(feed.status(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_tears_down() {
    let (feed, _connector, mut listener) = start(config(5, 1000));
    let mut peer = accept(&mut listener).await;
    wait_status(&feed, ConnectionStatus::Connected).await;

    drop(feed);
    assert!(timeout(TIMEOUT, peer.recv()).await.unwrap().is_none());
}
