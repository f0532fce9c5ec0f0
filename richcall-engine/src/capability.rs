//! Capability discovery and the shared per-contact capability cache.
//!
//! Reads are served from the cache while an entry is younger than the
//! configured expiry. At most one query per contact is in flight. Query
//! failures leave the entry as it was and are only logged.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use richcall_core::Capabilities;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use crate::broadcaster::{CapabilityEvent, EventBroadcaster};
use crate::config::EngineConfig;
use crate::transport::SignalingTransport;

/// Capability cache plus the query path that refreshes it.
pub struct CapabilityExchange {
    cache: RwLock<HashMap<String, Capabilities>>,
    pending: Mutex<HashSet<String>>,
    transport: Arc<dyn SignalingTransport>,
    events: Arc<EventBroadcaster<CapabilityEvent>>,
    config: Arc<EngineConfig>,
}

/// Clears the pending mark of a contact when the query ends, however it ends.
struct PendingGuard {
    exchange: Arc<CapabilityExchange>,
    contact: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.exchange.pending.lock().remove(&self.contact);
    }
}

impl CapabilityExchange {
    pub fn new(transport: Arc<dyn SignalingTransport>, config: Arc<EngineConfig>) -> Arc<Self> {
        Arc::new(Self {
            cache: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            transport,
            events: Arc::new(EventBroadcaster::new()),
            config,
        })
    }

    pub fn events(&self) -> &Arc<EventBroadcaster<CapabilityEvent>> {
        &self.events
    }

    /// Capabilities we advertise.
    pub fn my_capabilities(&self) -> Capabilities {
        self.config.my_capabilities.clone()
    }

    /// Cached capabilities of a contact, fresh or not. Never queries.
    pub fn contact_capabilities(&self, contact: &str) -> Option<Capabilities> {
        self.cache.read().get(contact).cloned()
    }

    /// Whether the cached entry is missing or older than the expiry window.
    pub fn needs_refresh(&self, contact: &str) -> bool {
        match self.cache.read().get(contact) {
            Some(caps) => !caps.is_fresh(self.config.capability_expiry, Utc::now()),
            None => true,
        }
    }

    /// Mark a contact as being queried. `None` if a query is unnecessary or
    /// already running.
    fn begin_query(self: &Arc<Self>, contact: &str) -> Option<PendingGuard> {
        if !self.needs_refresh(contact) {
            tracing::debug!("Capabilities of {} are fresh, served from cache", contact);
            return None;
        }
        if !self.pending.lock().insert(contact.to_string()) {
            tracing::debug!("Capability request for {} already pending", contact);
            return None;
        }
        Some(PendingGuard {
            exchange: self.clone(),
            contact: contact.to_string(),
        })
    }

    /// Refresh one contact in the background. Returns the query task, or
    /// `None` when the cache already answers.
    pub fn request_capabilities(self: &Arc<Self>, contact: &str) -> Option<JoinHandle<()>> {
        let guard = self.begin_query(contact)?;
        let exchange = self.clone();
        Some(tokio::spawn(async move { exchange.query(guard).await }))
    }

    /// Refresh a set of contacts with bounded concurrency. The task yields
    /// the number of queries issued.
    pub fn request_capabilities_batch<I, S>(self: &Arc<Self>, contacts: I) -> JoinHandle<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let guards: Vec<PendingGuard> = contacts
            .into_iter()
            .filter_map(|c| self.begin_query(c.as_ref()))
            .collect();
        let limit = Arc::new(Semaphore::new(self.config.capability_request_concurrency.max(1)));
        let exchange = self.clone();

        tokio::spawn(async move {
            let issued = guards.len();
            let mut tasks = JoinSet::new();
            for guard in guards {
                let exchange = exchange.clone();
                let limit = limit.clone();
                tasks.spawn(async move {
                    let _permit = match limit.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    exchange.query(guard).await;
                });
            }
            while tasks.join_next().await.is_some() {}
            issued
        })
    }

    async fn query(&self, guard: PendingGuard) {
        let contact = guard.contact.clone();
        tracing::info!("Request capabilities for contact {}", contact);
        let my_tags = self.config.my_capabilities.to_feature_tags();
        match self.transport.query_capabilities(&contact, &my_tags).await {
            Ok(tags) => {
                self.receive_capabilities(&contact, Capabilities::from_feature_tags(&tags));
            }
            Err(e) => {
                tracing::warn!("Capability request for {} failed: {}", contact, e);
            }
        }
        drop(guard);
    }

    /// Store capabilities received for a contact and notify listeners.
    /// The latest arrival wins.
    pub fn receive_capabilities(&self, contact: &str, capabilities: Capabilities) {
        tracing::info!("Receive capabilities for {}", contact);
        self.cache
            .write()
            .insert(contact.to_string(), capabilities.clone());
        self.events.broadcast(&CapabilityEvent::Received {
            contact: contact.to_string(),
            capabilities,
        });
    }

    /// Handle a capability query from a contact: learn its capabilities from
    /// the tags it sent and answer with ours.
    pub fn on_capability_query(&self, contact: &str, feature_tags: &[String]) -> Vec<String> {
        self.receive_capabilities(contact, Capabilities::from_feature_tags(feature_tags));
        self.config.my_capabilities.to_feature_tags()
    }
}
