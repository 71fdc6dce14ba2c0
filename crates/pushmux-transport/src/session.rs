//! Per-port session loop and message dispatch.
//!
//! Each connected socket is one port. The loop interleaves inbound frames
//! (parsed and applied to the registry) with the port's reply queue (relayed
//! events and status/error replies, forwarded back over the socket).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pushmux_protocol::{PortReply, PortRequest};
use pushmux_relay::{PortHandle, Registry};
use tracing::{debug, info, warn};

/// Drive one port session to completion.
pub(crate) async fn run_port_session(socket: WebSocket, registry: Arc<Registry>) {
    let port_id = uuid::Uuid::new_v4().to_string();
    let (port, mut replies) = PortHandle::new(port_id.clone());

    info!("Port connected: {port_id}");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Inbound port session message
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_port_message(&registry, &port, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Port socket closed: {port_id}");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for port {port_id}: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Queued replies and relayed events for this port
            reply = replies.recv() => {
                match reply {
                    Some(reply) => {
                        let text = match serde_json::to_string(&reply) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode reply for port {port_id}: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                            warn!("Failed to send to port {port_id}: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // The session contract is explicit: only a `close` message detaches a
    // port. A socket that drops without one keeps its binding, mirroring how
    // shared-worker message ports behave. Later sends to it are skipped.
    info!("Port disconnected: {port_id}");
}

/// Parse one inbound frame and apply it to the registry.
///
/// Unrecognized messages are reported back to the offending port only; they
/// never affect other ports or any source.
pub fn handle_port_message(registry: &Registry, port: &PortHandle, raw: &str) {
    match serde_json::from_str::<PortRequest>(raw) {
        Ok(PortRequest::Start { url }) => registry.start(port, &url),
        Ok(PortRequest::Listen { event_type }) => registry.listen(port, &event_type),
        Ok(PortRequest::Close) => registry.close(port),
        Ok(PortRequest::Status) => registry.status(port),
        Err(_) => port.send(PortReply::unknown_message(raw)),
    }
}
