//! pushmux Port Session Protocol types.
//!
//! This crate is the single source of truth for the message shapes exchanged
//! between a connected port and the relay, plus the baseline event-category
//! names every source listens for from the moment it connects.

pub mod events;
pub mod session;

pub use events::{EventName, Events};
pub use session::{PortReply, PortRequest};
