//! Registry — tracks which source serves which URL and which source each port
//! is bound to.
//!
//! Both maps live behind a single lock so no caller can ever observe one map
//! reflecting a binding the other does not. All operations are synchronous;
//! the only asynchrony in the relay is upstream event delivery, which happens
//! inside each source's connection task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pushmux_protocol::PortReply;
use tracing::{debug, info};

use crate::source::{PortHandle, Source};
use crate::upstream::Upstream;

struct Inner {
    by_url: HashMap<String, Arc<Source>>,
    by_port: HashMap<String, Arc<Source>>,
}

/// Process-wide source registry. One instance per relay process.
pub struct Registry {
    upstream: Arc<dyn Upstream>,
    baseline: Vec<String>,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(upstream: Arc<dyn Upstream>, baseline: Vec<String>) -> Self {
        Self {
            upstream,
            baseline,
            inner: Mutex::new(Inner { by_url: HashMap::new(), by_port: HashMap::new() }),
        }
    }

    /// Bind `port` to the source for `url`, creating the source if no port has
    /// started that URL yet.
    ///
    /// Idempotent when the port is already bound to the same URL. A port bound
    /// elsewhere is migrated: detached from its old source (which closes if it
    /// was the last client) before attaching to the new one.
    pub fn start(&self, port: &PortHandle, url: &str) {
        let mut inner = self.inner.lock();

        if let Some(bound) = inner.by_port.get(&port.id) {
            if bound.url() == url {
                return;
            }
            debug!(port = %port.id, from = %bound.url(), to = %url, "migrating port binding");
            Self::detach_locked(&mut inner, &port.id);
        }

        let source = match inner.by_url.get(url) {
            Some(existing) => existing.clone(),
            None => {
                info!(url = %url, "opening new source");
                let created = Source::open(url, self.upstream.clone(), &self.baseline);
                inner.by_url.insert(url.to_string(), created.clone());
                created
            }
        };

        source.register(port);
        inner.by_port.insert(port.id.clone(), source);
    }

    /// Subscribe the port's bound source to an event category.
    /// Short-circuits when the port is unbound.
    pub fn listen(&self, port: &PortHandle, event_name: &str) {
        match self.inner.lock().by_port.get(&port.id) {
            Some(source) => source.listen(event_name),
            None => debug!(port = %port.id, "listen from unbound port ignored"),
        }
    }

    /// Detach the port. When it was the source's last client the source is
    /// closed and evicted in the same step. No-op for an unbound port.
    pub fn close(&self, port: &PortHandle) {
        let mut inner = self.inner.lock();
        Self::detach_locked(&mut inner, &port.id);
    }

    /// Answer a `status` request: forwarded to the bound source, or
    /// "not connected" when the port is unbound.
    pub fn status(&self, port: &PortHandle) {
        match self.inner.lock().by_port.get(&port.id) {
            Some(source) => source.status(port),
            None => port.send(PortReply::status("not connected")),
        }
    }

    /// The source currently serving `url`, if any.
    pub fn source_for_url(&self, url: &str) -> Option<Arc<Source>> {
        self.inner.lock().by_url.get(url).cloned()
    }

    /// The source the given port is bound to, if any.
    pub fn source_for_port(&self, port_id: &str) -> Option<Arc<Source>> {
        self.inner.lock().by_port.get(port_id).cloned()
    }

    /// Number of distinct URLs with a live source.
    pub fn source_count(&self) -> usize {
        self.inner.lock().by_url.len()
    }

    // Must hold the inner lock: deregister-and-maybe-evict is one atomic step.
    fn detach_locked(inner: &mut Inner, port_id: &str) {
        let Some(source) = inner.by_port.remove(port_id) else {
            return;
        };
        if source.deregister(port_id) == 0 {
            inner.by_url.remove(source.url());
            source.close();
            info!(url = %source.url(), "last client left, source evicted");
        }
    }
}
