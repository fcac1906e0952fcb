//! Connected tunnel endpoints and their in-flight requests.
//!
//! Each [`TunnelEndpoint`] owns the sending half of its socket's frame channel
//! and a table of requests still waiting for a reply. Removing an endpoint
//! closes that table and resolves everything left in it, so no caller can be
//! left waiting on a socket that is gone.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

use super::{id, Frame, OutboundResponse};

/// How a pending request was settled by someone other than its waiter.
#[derive(Debug)]
pub enum Resolution {
    /// The endpoint replied.
    Reply(OutboundResponse),
    /// The endpoint replied with a frame that could not be decoded.
    Malformed(String),
    /// The deadline passed and a sweep reclaimed the entry.
    Expired,
    /// The endpoint was removed while the request was in flight.
    Disconnected,
}

/// An in-flight request awaiting its reply.
#[derive(Debug)]
pub struct PendingRequest {
    pub deadline: Instant,
    pub complete: oneshot::Sender<Resolution>,
}

/// Pending requests of one endpoint. Once `closed`, nothing new is accepted.
#[derive(Debug, Default)]
struct PendingTable {
    closed: bool,
    entries: HashMap<String, PendingRequest>,
}

/// A remote handler connected over a tunnel socket.
#[derive(Debug)]
pub struct TunnelEndpoint {
    pub id: String,
    /// URL callers use to reach this endpoint through the gateway.
    pub public_url: String,
    pub connected_since: Instant,
    channel: mpsc::Sender<Frame>,
    pending: Mutex<PendingTable>,
}

impl TunnelEndpoint {
    pub fn new(id: String, public_url: String, channel: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            public_url,
            connected_since: Instant::now(),
            channel,
            pending: Mutex::new(PendingTable::default()),
        }
    }

    /// Queue a frame for the socket writer.
    pub async fn transmit(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.channel.send(frame).await
    }

    /// Insert a pending request under a correlation ID unique to this endpoint.
    ///
    /// Returns `None` if the endpoint has already been drained.
    pub async fn track(&self, request: PendingRequest) -> Option<String> {
        let mut table = self.pending.lock().await;
        if table.closed {
            return None;
        }
        let mut request_id = id::generate();
        while table.entries.contains_key(&request_id) {
            request_id = id::generate();
        }
        table.entries.insert(request_id.clone(), request);
        Some(request_id)
    }

    /// Remove a pending request. Exactly one caller ever gets `Some` for a
    /// given ID; whoever does is responsible for settling it.
    pub async fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.pending.lock().await.entries.remove(request_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    /// Close the pending table and resolve every entry as disconnected.
    pub async fn drain(&self) -> usize {
        let mut table = self.pending.lock().await;
        table.closed = true;
        let count = table.entries.len();
        for (_, pending) in table.entries.drain() {
            let _ = pending.complete.send(Resolution::Disconnected);
        }
        count
    }

    /// Resolve entries whose deadline is before `now`. Their waiters normally
    /// do this themselves; this catches entries whose caller went away.
    pub async fn expire(&self, now: Instant) -> usize {
        let mut table = self.pending.lock().await;
        let expired: Vec<String> = table
            .entries
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for request_id in &expired {
            if let Some(pending) = table.entries.remove(request_id) {
                let _ = pending.complete.send(Resolution::Expired);
            }
        }
        expired.len()
    }
}

/// The set of connected endpoints, keyed by ID, in connection order.
#[derive(Clone, Default)]
pub struct TunnelRegistry {
    endpoints: Arc<RwLock<IndexMap<String, Arc<TunnelEndpoint>>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint under a fresh ID. `public_url` maps the chosen ID to
    /// the URL callers will use.
    pub async fn register(
        &self,
        channel: mpsc::Sender<Frame>,
        public_url: impl FnOnce(&str) -> String,
    ) -> Arc<TunnelEndpoint> {
        let mut endpoints = self.endpoints.write().await;
        let mut endpoint_id = id::generate();
        while endpoints.contains_key(&endpoint_id) {
            endpoint_id = id::generate();
        }
        let url = public_url(&endpoint_id);
        let endpoint = Arc::new(TunnelEndpoint::new(endpoint_id.clone(), url, channel));
        endpoints.insert(endpoint_id, endpoint.clone());
        endpoint
    }

    pub async fn lookup(&self, endpoint_id: &str) -> Option<Arc<TunnelEndpoint>> {
        self.endpoints.read().await.get(endpoint_id).cloned()
    }

    /// The longest-connected endpoint, if any.
    pub async fn lookup_any(&self) -> Option<Arc<TunnelEndpoint>> {
        self.endpoints
            .read()
            .await
            .first()
            .map(|(_, endpoint)| endpoint.clone())
    }

    /// Remove an endpoint and resolve its pending requests. No-op if absent.
    pub async fn remove(&self, endpoint_id: &str) -> bool {
        let removed = self.endpoints.write().await.shift_remove(endpoint_id);
        let Some(endpoint) = removed else {
            return false;
        };
        let count = endpoint.drain().await;
        if count > 0 {
            info!(endpoint = %endpoint_id, count, "Drained {count} pending requests");
        }
        true
    }

    /// Remove every endpoint (gateway shutdown).
    pub async fn drain_all(&self) {
        let endpoints: Vec<_> = self.endpoints.write().await.drain(..).collect();
        for (endpoint_id, endpoint) in endpoints {
            let count = endpoint.drain().await;
            info!(endpoint = %endpoint_id, count, "Drained endpoint for shutdown");
        }
    }

    /// Reclaim pending requests past their deadline across all endpoints.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let endpoints = self.endpoints().await;
        let mut total = 0;
        for endpoint in endpoints {
            total += endpoint.expire(now).await;
        }
        if total > 0 {
            debug!(count = total, "Swept expired pending requests");
        }
        total
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }

    /// Connected endpoints in connection order.
    pub async fn endpoints(&self) -> Vec<Arc<TunnelEndpoint>> {
        self.endpoints.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn channel() -> mpsc::Sender<Frame> {
        mpsc::channel(8).0
    }

    fn pending(deadline: Instant) -> (PendingRequest, oneshot::Receiver<Resolution>) {
        let (complete, rx) = oneshot::channel();
        (PendingRequest { deadline, complete }, rx)
    }

    #[tokio::test]
    async fn test_register_assigns_distinct_ids() {
        let registry = TunnelRegistry::new();
        let mut ids = HashSet::new();
        for _ in 0..500 {
            let endpoint = registry.register(channel(), |id| format!("/{id}")).await;
            assert_eq!(endpoint.public_url, format!("/{}", endpoint.id));
            ids.insert(endpoint.id.clone());
        }
        assert_eq!(ids.len(), 500);
        assert_eq!(registry.len().await, 500);
    }

    #[tokio::test]
    async fn test_lookup_and_remove() {
        let registry = TunnelRegistry::new();
        let endpoint = registry.register(channel(), str::to_string).await;

        assert!(registry.lookup(&endpoint.id).await.is_some());
        assert!(registry.lookup("nosuchid00").await.is_none());

        assert!(registry.remove(&endpoint.id).await);
        assert!(registry.lookup(&endpoint.id).await.is_none());
        assert!(!registry.remove(&endpoint.id).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_lookup_any_prefers_oldest() {
        let registry = TunnelRegistry::new();
        assert!(registry.lookup_any().await.is_none());

        let first = registry.register(channel(), str::to_string).await;
        let second = registry.register(channel(), str::to_string).await;
        let third = registry.register(channel(), str::to_string).await;

        assert_eq!(registry.lookup_any().await.unwrap().id, first.id);
        registry.remove(&second.id).await;
        assert_eq!(registry.lookup_any().await.unwrap().id, first.id);
        registry.remove(&first.id).await;
        assert_eq!(registry.lookup_any().await.unwrap().id, third.id);
    }

    #[tokio::test]
    async fn test_remove_drains_pending() {
        let registry = TunnelRegistry::new();
        let endpoint = registry.register(channel(), str::to_string).await;

        let deadline = Instant::now() + Duration::from_secs(5);
        let (a, rx_a) = pending(deadline);
        let (b, rx_b) = pending(deadline);
        endpoint.track(a).await.unwrap();
        endpoint.track(b).await.unwrap();
        assert_eq!(endpoint.pending_count().await, 2);

        registry.remove(&endpoint.id).await;

        assert!(matches!(rx_a.await, Ok(Resolution::Disconnected)));
        assert!(matches!(rx_b.await, Ok(Resolution::Disconnected)));
        assert_eq!(endpoint.pending_count().await, 0);

        // A drained endpoint accepts nothing further.
        let (late, _rx) = pending(deadline);
        assert!(endpoint.track(late).await.is_none());
    }

    #[tokio::test]
    async fn test_take_is_exclusive() {
        let endpoint = TunnelEndpoint::new("e".into(), "u".into(), channel());
        let (p, _rx) = pending(Instant::now());
        let request_id = endpoint.track(p).await.unwrap();

        assert!(endpoint.take(&request_id).await.is_some());
        assert!(endpoint.take(&request_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_expired_only_past_deadline() {
        let registry = TunnelRegistry::new();
        let endpoint = registry.register(channel(), str::to_string).await;

        let now = Instant::now();
        let (soon, rx_soon) = pending(now + Duration::from_millis(100));
        let (later, _rx_later) = pending(now + Duration::from_secs(60));
        endpoint.track(soon).await.unwrap();
        endpoint.track(later).await.unwrap();

        assert_eq!(registry.sweep_expired().await, 0);
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(registry.sweep_expired().await, 1);

        assert!(matches!(rx_soon.await, Ok(Resolution::Expired)));
        assert_eq!(endpoint.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_drain_all_empties_registry() {
        let registry = TunnelRegistry::new();
        let endpoint = registry.register(channel(), str::to_string).await;
        let (p, rx) = pending(Instant::now() + Duration::from_secs(5));
        endpoint.track(p).await.unwrap();

        registry.drain_all().await;

        assert!(registry.is_empty().await);
        assert!(matches!(rx.await, Ok(Resolution::Disconnected)));
    }
}
