//! Upstream push-channel transports.
//!
//! A transport dials one URL and yields the connection as a stream of named
//! events. The relay is transport-agnostic above this seam: the SSE and
//! WebSocket variants differ only in framing and event-naming convention.

pub mod sse;
pub mod websocket;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

/// One event received from the underlying push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    /// Event category name.
    pub name: String,
    /// Opaque payload — a string for SSE data, a decoded value for WebSocket
    /// frames. Subscribers downcast by category.
    pub data: Value,
}

impl ChannelEvent {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self { name: name.into(), data }
    }
}

/// Stream of events from one open push-channel connection.
///
/// The stream ends when the connection closes. Transport failures are yielded
/// as `Err` items; the source stops reading after the first one.
pub type ChannelStream = BoxStream<'static, Result<ChannelEvent, UpstreamError>>;

/// Errors from the upstream push channel.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// A push-channel transport. Object-safe so the registry can hold whichever
/// transport the process was configured with as a trait object.
pub trait Upstream: Send + Sync + 'static {
    /// Open a connection to `url` and return its event stream.
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChannelStream, UpstreamError>>;
}
