//! pushmux transport layer.
//!
//! Accepts port connections over WebSocket and drives one session loop per
//! connection. The transport handles:
//! - connection lifecycle (upgrade, message, close)
//! - parsing inbound port session messages
//! - draining each port's reply queue back over its socket
//!
//! The transport is decoupled from the relay logic via the registry: every
//! parsed message is applied to it synchronously.

pub mod server;
pub mod session;

pub use server::{TransportConfig, TransportServer};
pub use session::handle_port_message;
