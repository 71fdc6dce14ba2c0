//! Source — owns one upstream push-channel connection and fans its events out
//! to every registered port.
//!
//! A source is created by the first `start` for a URL and closed (and evicted
//! from the registry) when its last port deregisters. A closed source is never
//! reused; the next `start` for the same URL builds a fresh one.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use pushmux_protocol::{Events, PortReply};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use futures_util::future::BoxFuture;

use crate::upstream::{ChannelEvent, ChannelStream, Upstream, UpstreamError};

/// Upstream connection readiness, as reported in `status` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Handle to one connected port: its identity plus the outbound reply queue
/// drained by that port's session loop.
///
/// The relay holds these as non-owning references — sends are fire-and-forget
/// and a dead receiver is simply skipped.
#[derive(Debug, Clone)]
pub struct PortHandle {
    pub id: String,
    tx: mpsc::UnboundedSender<PortReply>,
}

impl PortHandle {
    /// Create a handle and the receiving half its session loop drains.
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<PortReply>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: id.into(), tx }, rx)
    }

    /// Queue a reply for this port. At-most-once, no delivery guarantee.
    pub fn send(&self, reply: PortReply) {
        let _ = self.tx.send(reply);
    }
}

/// One multiplexed push-channel connection.
pub struct Source {
    url: String,
    /// Registered ports, in registration order. A port appears at most once.
    clients: Mutex<Vec<PortHandle>>,
    /// Event categories with a relay handler attached. Grows monotonically.
    listening: Mutex<HashSet<String>>,
    /// Abort handle for the connection task; `None` once closed.
    connection: Mutex<Option<AbortHandle>>,
    state: AtomicU8,
}

impl Source {
    /// Open the upstream connection for `url` and start relaying.
    ///
    /// Always succeeds synchronously; the connection itself is established by
    /// a spawned task, and failures surface later as relayed `error` events.
    /// The baseline categories are listened for immediately so common events
    /// are never missed before any port calls `listen`.
    pub fn open(url: &str, upstream: Arc<dyn Upstream>, baseline: &[String]) -> Arc<Self> {
        let source = Arc::new(Self {
            url: url.to_string(),
            clients: Mutex::new(Vec::new()),
            listening: Mutex::new(baseline.iter().cloned().collect()),
            connection: Mutex::new(None),
            state: AtomicU8::new(ReadyState::Connecting as u8),
        });

        // Invoke the transport synchronously so opening is observable as soon
        // as this returns; the returned future does the actual connecting and
        // is awaited by the spawned task, which also keeps the transport alive
        // for the connection's lifetime.
        let connect = upstream.open(url);
        let task = tokio::spawn({
            let source = source.clone();
            async move {
                let _upstream = upstream;
                run_channel(source, connect).await;
            }
        });
        *source.connection.lock() = Some(task.abort_handle());
        source
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Add a port. Idempotent — a port already registered is left alone.
    /// Confirms the registration with a `status` reply to that port only.
    pub fn register(&self, port: &PortHandle) {
        let mut clients = self.clients.lock();
        if clients.iter().any(|c| c.id == port.id) {
            return;
        }
        clients.push(port.clone());
        port.send(PortReply::status(format!("registered to {}", self.url)));
    }

    /// Remove a port. Idempotent — removing an absent port changes nothing.
    /// Returns the remaining client count so the caller can decide whether to
    /// close and evict this source.
    pub fn deregister(&self, port_id: &str) -> usize {
        let mut clients = self.clients.lock();
        clients.retain(|c| c.id != port_id);
        clients.len()
    }

    /// Attach a relay handler for an event category. No-op if already attached.
    pub fn listen(&self, event_name: &str) {
        self.listening.lock().insert(event_name.to_string());
    }

    /// Release the upstream connection. No-op if already released.
    pub fn close(&self) {
        if let Some(handle) = self.connection.lock().take() {
            handle.abort();
        }
        self.state.store(ReadyState::Closed as u8, Ordering::Relaxed);
        debug!(url = %self.url, "source closed");
    }

    /// Reply to `port` with a connection diagnostic. Other ports are unaffected.
    pub fn status(&self, port: &PortHandle) {
        port.send(PortReply::status(format!(
            "url: {} readyState: {}",
            self.url,
            self.ready_state()
        )));
    }

    /// Deliver one reply to every registered port, in registration order.
    pub fn notify_clients(&self, reply: &PortReply) {
        for client in self.clients.lock().iter() {
            client.send(reply.clone());
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Registered port ids, in registration order.
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.lock().iter().map(|c| c.id.clone()).collect()
    }

    /// Relay one upstream event to all ports, gated on the listening set.
    fn dispatch(&self, event: ChannelEvent) {
        if !self.listening.lock().contains(&event.name) {
            return;
        }
        self.notify_clients(&PortReply::event(event.name, event.data));
    }

    fn dispatch_error(&self, error: &UpstreamError) {
        self.dispatch(ChannelEvent::new(Events::ERROR, Value::String(error.to_string())));
    }
}

/// Connection task: open the upstream channel and relay until it ends.
/// No retry or reconnect — after a failure the source goes quiet and recovery
/// is the subscribing port's responsibility.
async fn run_channel(
    source: Arc<Source>,
    connect: BoxFuture<'static, Result<ChannelStream, UpstreamError>>,
) {
    let mut stream = match connect.await {
        Ok(stream) => {
            source.state.store(ReadyState::Open as u8, Ordering::Relaxed);
            stream
        }
        Err(e) => {
            warn!(url = %source.url(), "upstream connect failed: {e}");
            source.state.store(ReadyState::Closed as u8, Ordering::Relaxed);
            source.dispatch_error(&e);
            return;
        }
    };

    use futures_util::StreamExt;
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => source.dispatch(event),
            Err(e) => {
                warn!(url = %source.url(), "upstream channel failed: {e}");
                source.dispatch_error(&e);
                break;
            }
        }
    }

    source.state.store(ReadyState::Closed as u8, Ordering::Relaxed);
    debug!(url = %source.url(), "upstream channel ended");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
