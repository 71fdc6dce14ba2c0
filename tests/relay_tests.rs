//! End-to-end relay tests — real port sessions over WebSocket against a live
//! in-test SSE upstream, exercising connection sharing, fan-out, and eviction.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt, stream};
use pushmux_protocol::Events;
use pushmux_relay::{Registry, SseUpstream};
use pushmux_transport::{TransportConfig, TransportServer};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ─────────────────────────────────────────────────────────────────────────────
// In-test SSE upstream
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct UpstreamState {
    tx: broadcast::Sender<(String, String)>,
    /// Connections opened over the server's lifetime.
    total: Arc<AtomicUsize>,
    /// Connections currently open.
    active: Arc<AtomicUsize>,
}

struct ConnGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn events_handler(State(state): State<UpstreamState>) -> Response {
    state.total.fetch_add(1, Ordering::Relaxed);
    state.active.fetch_add(1, Ordering::Relaxed);
    let guard = ConnGuard { active: state.active.clone() };
    let rx = state.tx.subscribe();

    // Frames are written by hand rather than through `axum::response::sse`:
    // axum omits the `data:` line entirely for empty data, and SSE parsers
    // don't dispatch events that never carried one, so empty-payload events
    // (e.g. `logout`) would be dropped before reaching the relay.
    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        match rx.recv().await {
            Ok((name, data)) => {
                let frame = format!("event: {name}\ndata: {data}\n\n");
                Some((Ok::<_, Infallible>(frame), (rx, guard)))
            }
            Err(_) => None,
        }
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(stream))
        .unwrap()
}

/// Start an SSE upstream server emitting whatever the test broadcasts.
async fn start_upstream() -> (u16, UpstreamState) {
    let (tx, _) = broadcast::channel(64);
    let state = UpstreamState {
        tx,
        total: Arc::new(AtomicUsize::new(0)),
        active: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/events", get(events_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (port, state)
}

impl UpstreamState {
    fn emit(&self, name: &str, data: &str) {
        let _ = self.tx.send((name.to_string(), data.to_string()));
    }

    async fn wait_for_active(&self, expected: usize) {
        for _ in 0..200 {
            if self.active.load(Ordering::Relaxed) == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "upstream never reached {expected} active connections (currently {})",
            self.active.load(Ordering::Relaxed)
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay + port helpers
// ─────────────────────────────────────────────────────────────────────────────

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the relay on a random port with the real SSE transport.
async fn start_relay() -> u16 {
    let registry = Arc::new(Registry::new(Arc::new(SseUpstream::new()), Events::baseline()));
    let config = TransportConfig {
        port: 0,
        hostname: "127.0.0.1".into(),
        max_connections: Some(16),
    };
    let transport = TransportServer::start(config, registry).await.unwrap();
    let port = transport.port();

    // Leak the transport to keep it running for the test
    Box::leak(Box::new(transport));

    port
}

async fn connect_port(relay_port: u16) -> WsClient {
    let url = format!("ws://127.0.0.1:{relay_port}/ws");
    let (ws, _) = connect_async(&url).await.expect("Failed to connect");
    ws
}

async fn send(ws: &mut WsClient, message: Value) {
    ws.send(Message::Text(serde_json::to_string(&message).unwrap().into()))
        .await
        .unwrap();
}

async fn recv_json(ws: &mut WsClient) -> Value {
    let msg = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("Timeout waiting for message")
        .expect("Stream ended")
        .expect("WebSocket error");
    serde_json::from_str(&msg.into_text().unwrap()).unwrap()
}

async fn expect_silence(ws: &mut WsClient) {
    assert!(
        timeout(Duration::from_millis(200), ws.next()).await.is_err(),
        "expected no message"
    );
}

/// Session messages are handled in order, so a `status` round-trip proves
/// every previously sent message has been applied.
async fn barrier(ws: &mut WsClient) {
    send(ws, json!({"type": "status"})).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "status");
}

/// Connect a port and bind it to the upstream's /events URL.
async fn start_port(relay_port: u16, upstream_port: u16) -> WsClient {
    let mut ws = connect_port(relay_port).await;
    let url = format!("http://127.0.0.1:{upstream_port}/events");
    send(&mut ws, json!({"type": "start", "url": url})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "status");
    assert_eq!(reply["message"], format!("registered to {url}"));
    ws
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_confirms_registration() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let _ws = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;
}

#[tokio::test]
async fn two_ports_share_one_upstream_connection() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let mut tab1 = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;
    let mut tab2 = start_port(relay_port, upstream_port).await;

    // Second start reuses the existing source — still one physical connection.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.total.load(Ordering::Relaxed), 1);

    for ws in [&mut tab1, &mut tab2] {
        send(ws, json!({"type": "listen", "eventType": "test-event"})).await;
        barrier(ws).await;
    }

    upstream.emit("test-event", "hello");

    for ws in [&mut tab1, &mut tab2] {
        let event = recv_json(ws).await;
        assert_eq!(event, json!({"type": "test-event", "data": "hello"}));
        expect_silence(ws).await;
    }
}

#[tokio::test]
async fn unlistened_categories_are_gated() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let mut ws = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;

    send(&mut ws, json!({"type": "listen", "eventType": "wanted"})).await;
    barrier(&mut ws).await;

    upstream.emit("unwanted", "x");
    upstream.emit("wanted", "y");

    // Only the listened-for category comes through.
    let event = recv_json(&mut ws).await;
    assert_eq!(event, json!({"type": "wanted", "data": "y"}));
    expect_silence(&mut ws).await;
}

#[tokio::test]
async fn baseline_categories_relay_without_listen() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let mut ws = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;

    upstream.emit("logout", "");
    let event = recv_json(&mut ws).await;
    assert_eq!(event["type"], "logout");
}

#[tokio::test]
async fn last_close_releases_the_upstream_connection() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let mut tab1 = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;
    let mut tab2 = start_port(relay_port, upstream_port).await;

    send(&mut tab1, json!({"type": "close"})).await;
    barrier(&mut tab1).await;

    // tab2 still holds the source open.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(upstream.active.load(Ordering::Relaxed), 1);

    send(&mut tab2, json!({"type": "close"})).await;
    barrier(&mut tab2).await;
    upstream.wait_for_active(0).await;

    // A later start builds a brand-new source with a fresh connection.
    let _tab3 = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;
    assert_eq!(upstream.total.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn start_for_a_new_url_migrates_the_binding() {
    let (upstream_a_port, upstream_a) = start_upstream().await;
    let (upstream_b_port, upstream_b) = start_upstream().await;
    let relay_port = start_relay().await;

    let mut ws = start_port(relay_port, upstream_a_port).await;
    upstream_a.wait_for_active(1).await;

    // No close in between — the sole client migrates, so A is released.
    let url_b = format!("http://127.0.0.1:{upstream_b_port}/events");
    send(&mut ws, json!({"type": "start", "url": url_b})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["message"], format!("registered to {url_b}"));

    upstream_a.wait_for_active(0).await;
    upstream_b.wait_for_active(1).await;
}

#[tokio::test]
async fn status_on_unbound_port_is_not_connected() {
    let relay_port = start_relay().await;
    let mut ws = connect_port(relay_port).await;

    send(&mut ws, json!({"type": "status"})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply, json!({"type": "status", "message": "not connected"}));
}

#[tokio::test]
async fn unknown_message_gets_an_error_reply() {
    let relay_port = start_relay().await;
    let mut ws = connect_port(relay_port).await;

    ws.send(Message::Text(r#"{"type":"reboot"}"#.into())).await.unwrap();
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(
        reply["message"],
        r#"received but don't know how to handle: {"type":"reboot"}"#
    );
}

#[tokio::test]
async fn health_endpoint_reports_clients_and_sources() {
    let (upstream_port, upstream) = start_upstream().await;
    let relay_port = start_relay().await;

    let _ws = start_port(relay_port, upstream_port).await;
    upstream.wait_for_active(1).await;

    let url = format!("http://127.0.0.1:{relay_port}/health");
    let resp = reqwest::get(&url).await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 1);
    assert_eq!(body["sources"], 1);
}
