//! pushmux relay core — sources, the registry, and upstream transports.
//!
//! A [`Source`] owns exactly one upstream push-channel connection and fans its
//! events out to every port registered with it. The [`Registry`] tracks which
//! source serves which URL and which source each port is bound to, so that N
//! ports starting the same URL share one physical connection.
//!
//! The relay is a dumb multiplexer: it never retries, reconnects, or buffers.
//! Recovery after an upstream failure is the subscribing port's job, via an
//! explicit `close` followed by a fresh `start`.

pub mod registry;
pub mod source;
pub mod upstream;

pub use registry::Registry;
pub use source::{PortHandle, ReadyState, Source};
pub use upstream::{ChannelEvent, ChannelStream, Upstream, UpstreamError};
pub use upstream::sse::SseUpstream;
pub use upstream::websocket::WebSocketUpstream;
