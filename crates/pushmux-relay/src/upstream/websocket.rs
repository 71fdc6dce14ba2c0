//! WebSocket upstream transport.
//!
//! Dials with `tokio-tungstenite`, rewriting an http-family URL prefix to the
//! ws family first. Every inbound text frame is a JSON object with `Name`
//! (event category) and `Data` (payload) fields; malformed frames are logged
//! and skipped, non-text frames ignored.

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

use super::{ChannelEvent, ChannelStream, Upstream, UpstreamError};

/// Shape of one upstream WebSocket frame.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Data")]
    data: Value,
}

/// Rewrite an http-family scheme to the matching ws-family scheme.
/// URLs that already speak ws/wss pass through unchanged.
pub fn to_ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// WebSocket transport.
pub struct WebSocketUpstream;

impl Upstream for WebSocketUpstream {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChannelStream, UpstreamError>> {
        let url = url.to_string();

        Box::pin(async move {
            let ws_url = to_ws_url(&url);
            let (socket, _) = connect_async(&ws_url)
                .await
                .map_err(|e| UpstreamError::Connect { url: ws_url.clone(), reason: e.to_string() })?;

            let stream = socket.filter_map(move |msg| {
                let ws_url = ws_url.clone();
                async move {
                    match msg {
                        Ok(Message::Text(text)) => match serde_json::from_str::<WireFrame>(&text) {
                            Ok(frame) => Some(Ok(ChannelEvent::new(frame.name, frame.data))),
                            Err(e) => {
                                warn!(url = %ws_url, "skipping malformed frame: {e}");
                                None
                            }
                        },
                        Ok(Message::Close(_)) => None,
                        Ok(_) => None,
                        Err(e) => Some(Err(UpstreamError::Transport(e.to_string()))),
                    }
                }
            });

            Ok(Box::pin(stream) as ChannelStream)
        })
    }
}
