//! Server-Sent Events upstream transport.
//!
//! Streams a `text/event-stream` response with `reqwest` and parses frames
//! with `eventsource-stream`. Named events arrive pre-dispatched by the
//! parser; the payload is relayed as the raw data string.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use super::{ChannelEvent, ChannelStream, Upstream, UpstreamError};

/// SSE transport backed by a shared `reqwest` client.
pub struct SseUpstream {
    client: reqwest::Client,
}

impl SseUpstream {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl Default for SseUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl Upstream for SseUpstream {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChannelStream, UpstreamError>> {
        let client = self.client.clone();
        let url = url.to_string();

        Box::pin(async move {
            let response = client
                .get(&url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| UpstreamError::Connect { url: url.clone(), reason: e.to_string() })?;

            let stream = response.bytes_stream().eventsource().map(|item| match item {
                Ok(event) => {
                    let name = if event.event.is_empty() {
                        "message".to_string()
                    } else {
                        event.event
                    };
                    Ok(ChannelEvent::new(name, Value::String(event.data)))
                }
                Err(e) => Err(UpstreamError::Transport(e.to_string())),
            });

            Ok(Box::pin(stream) as ChannelStream)
        })
    }
}
