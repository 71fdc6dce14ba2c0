//! Baseline push-channel event category names.
//!
//! These categories are attached to every source at construction time so that
//! common events are never missed before a port gets around to `listen`ing.
//! The set is configuration input — deployments may extend or replace it.

/// Well-known event category names.
pub struct Events;

impl Events {
    // ── Connection lifecycle ────────────────────────────────────────────
    pub const OPEN: &str = "open";
    pub const CLOSE: &str = "close";
    pub const ERROR: &str = "error";

    // ── Session ─────────────────────────────────────────────────────────
    pub const LOGOUT: &str = "logout";

    // ── Application ─────────────────────────────────────────────────────
    pub const NOTIFICATION_COUNT: &str = "notification-count";
    pub const STOPWATCHES: &str = "stopwatches";

    /// The default baseline set attached to every new source.
    pub fn baseline() -> Vec<String> {
        [
            Self::OPEN,
            Self::CLOSE,
            Self::LOGOUT,
            Self::NOTIFICATION_COUNT,
            Self::STOPWATCHES,
            Self::ERROR,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

/// Type alias for event category names.
pub type EventName = &'static str;
