//! Port session message types.
//!
//! A port drives its session with four request shapes; the relay answers with
//! `status`/`error` replies and relayed events. Relayed events carry their
//! category as the `type` tag, so `PortReply` serializes itself by hand
//! instead of relying on a derived tag.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Inbound message from a connected port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PortRequest {
    /// Bind this port to the source for `url`, creating the source (and its
    /// upstream connection) if no other port has started it yet.
    Start { url: String },
    /// Subscribe the bound source to an event category.
    Listen {
        #[serde(rename = "eventType")]
        event_type: String,
    },
    /// Detach this port; the source closes when its last port detaches.
    Close,
    /// Ask for a connection diagnostic.
    Status,
}

/// Outbound message to a connected port.
#[derive(Debug, Clone, PartialEq)]
pub enum PortReply {
    /// Diagnostic or confirmation text.
    Status { message: String },
    /// Protocol or transport failure, local to this port.
    Error { message: String },
    /// A relayed upstream event. Serializes as `{"type": <name>, "data": ...}`;
    /// the payload is opaque to the relay.
    Event { name: String, data: Value },
}

impl PortReply {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status { message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self::Event { name: name.into(), data }
    }

    /// The reply for an inbound message the relay does not understand.
    pub fn unknown_message(payload: &str) -> Self {
        Self::error(format!("received but don't know how to handle: {payload}"))
    }
}

impl Serialize for PortReply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Status { message } => {
                map.serialize_entry("type", "status")?;
                map.serialize_entry("message", message)?;
            }
            Self::Error { message } => {
                map.serialize_entry("type", "error")?;
                map.serialize_entry("message", message)?;
            }
            Self::Event { name, data } => {
                map.serialize_entry("type", name)?;
                map.serialize_entry("data", data)?;
            }
        }
        map.end()
    }
}
