//! Fan-out of session and capability events to registered listeners.
//!
//! Each service owns one typed [`EventBroadcaster`]. Delivery runs on a
//! snapshot of the listener table taken under the lock, so a listener may
//! register or unregister from inside its own callback. A listener that
//! errors or panics is logged and skipped; the others still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use richcall_core::{Capabilities, Content, ReasonCode, ServiceType, SessionState};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// Events that can be filtered by remote contact.
pub trait BroadcastEvent: Send + Sync + 'static {
    fn contact(&self) -> &str;
}

/// Listener failure.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The client behind this listener is gone; it will be unregistered.
    #[error("listener disconnected")]
    Disconnected,

    #[error("listener failed: {0}")]
    Failed(String),
}

/// Receiver of broadcast events.
pub trait EventListener<E>: Send + Sync {
    fn on_event(&self, event: &E) -> Result<(), ListenerError>;
}

/// Handle returned by [`EventBroadcaster::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<E> {
    id: ListenerId,
    contact_filter: Option<String>,
    listener: Arc<dyn EventListener<E>>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            contact_filter: self.contact_filter.clone(),
            listener: self.listener.clone(),
        }
    }
}

/// Listener table for one event type.
pub struct EventBroadcaster<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration<E>>>,
}

impl<E: BroadcastEvent> EventBroadcaster<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener, optionally restricted to one contact.
    pub fn register(&self, listener: Arc<dyn EventListener<E>>, contact_filter: Option<String>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Registration {
            id,
            contact_filter,
            listener,
        });
        tracing::debug!("Listener {:?} registered", id);
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        before != listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Deliver an event to every matching listener. Returns how many
    /// listeners accepted it.
    pub fn broadcast(&self, event: &E) -> usize {
        let snapshot: Vec<Registration<E>> = self.listeners.lock().clone();
        let mut delivered = 0;
        let mut disconnected = Vec::new();

        for registration in snapshot {
            if let Some(filter) = &registration.contact_filter {
                if filter != event.contact() {
                    continue;
                }
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| registration.listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(ListenerError::Disconnected)) => disconnected.push(registration.id),
                Ok(Err(e)) => {
                    tracing::warn!("Listener {:?} failed: {}", registration.id, e);
                }
                Err(_) => {
                    tracing::warn!("Listener {:?} panicked during delivery", registration.id);
                }
            }
        }

        if !disconnected.is_empty() {
            self.listeners
                .lock()
                .retain(|r| !disconnected.contains(&r.id));
            tracing::debug!("Dropped {} disconnected listener(s)", disconnected.len());
        }
        delivered
    }
}

impl<E: BroadcastEvent> Default for EventBroadcaster<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Listener forwarding events into a channel. Dropping the receiver
/// unregisters it on the next delivery.
pub struct ChannelListener<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E: Clone + Send + 'static> ChannelListener<E> {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl<E: Clone + Send + Sync + 'static> EventListener<E> for ChannelListener<E> {
    fn on_event(&self, event: &E) -> Result<(), ListenerError> {
        self.tx
            .send(event.clone())
            .map_err(|_| ListenerError::Disconnected)
    }
}

/// Session lifecycle events of one sharing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SharingEvent {
    Invitation {
        service: ServiceType,
        contact: String,
        session_id: String,
        content: Content,
    },
    StateChanged {
        service: ServiceType,
        contact: String,
        session_id: String,
        state: SessionState,
        reason: ReasonCode,
    },
    Progress {
        service: ServiceType,
        contact: String,
        session_id: String,
        current: u64,
        total: u64,
    },
    PayloadReceived {
        service: ServiceType,
        contact: String,
        session_id: String,
        payload: Vec<u8>,
    },
    Deleted {
        service: ServiceType,
        contact: String,
        session_ids: Vec<String>,
    },
}

impl SharingEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Invitation { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::PayloadReceived { session_id, .. } => Some(session_id),
            Self::Deleted { .. } => None,
        }
    }
}

impl BroadcastEvent for SharingEvent {
    fn contact(&self) -> &str {
        match self {
            Self::Invitation { contact, .. }
            | Self::StateChanged { contact, .. }
            | Self::Progress { contact, .. }
            | Self::PayloadReceived { contact, .. }
            | Self::Deleted { contact, .. } => contact,
        }
    }
}

/// Typed helpers for sharing broadcasters.
impl EventBroadcaster<SharingEvent> {
    pub fn broadcast_invitation(&self, service: ServiceType, contact: &str, session_id: &str, content: &Content) {
        self.broadcast(&SharingEvent::Invitation {
            service,
            contact: contact.to_string(),
            session_id: session_id.to_string(),
            content: content.clone(),
        });
    }

    pub fn broadcast_state_changed(
        &self,
        service: ServiceType,
        contact: &str,
        session_id: &str,
        state: SessionState,
        reason: ReasonCode,
    ) {
        self.broadcast(&SharingEvent::StateChanged {
            service,
            contact: contact.to_string(),
            session_id: session_id.to_string(),
            state,
            reason,
        });
    }

    pub fn broadcast_progress(&self, service: ServiceType, contact: &str, session_id: &str, current: u64, total: u64) {
        self.broadcast(&SharingEvent::Progress {
            service,
            contact: contact.to_string(),
            session_id: session_id.to_string(),
            current,
            total,
        });
    }

    pub fn broadcast_payload(&self, service: ServiceType, contact: &str, session_id: &str, payload: &[u8]) {
        self.broadcast(&SharingEvent::PayloadReceived {
            service,
            contact: contact.to_string(),
            session_id: session_id.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn broadcast_deleted(&self, service: ServiceType, contact: &str, session_ids: Vec<String>) {
        self.broadcast(&SharingEvent::Deleted {
            service,
            contact: contact.to_string(),
            session_ids,
        });
    }
}

/// Capability updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CapabilityEvent {
    Received {
        contact: String,
        capabilities: Capabilities,
    },
}

impl BroadcastEvent for CapabilityEvent {
    fn contact(&self) -> &str {
        match self {
            Self::Received { contact, .. } => contact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingListener;

    struct FailingListener;

    impl EventListener<SharingEvent> for FailingListener {
        fn on_event(&self, _event: &SharingEvent) -> Result<(), ListenerError> {
            Err(ListenerError::Failed("boom".to_string()))
        }
    }

    struct PanickingListener;

    impl EventListener<SharingEvent> for PanickingListener {
        fn on_event(&self, _event: &SharingEvent) -> Result<(), ListenerError> {
            panic!("listener bug");
        }
    }

    fn state_event(contact: &str) -> SharingEvent {
        SharingEvent::StateChanged {
            service: ServiceType::VideoSharing,
            contact: contact.to_string(),
            session_id: "s1".to_string(),
            state: SessionState::Started,
            reason: ReasonCode::Unspecified,
        }
    }

    #[test]
    fn faulting_listener_does_not_block_others() {
        let broadcaster: EventBroadcaster<SharingEvent> = EventBroadcaster::new();
        let recorder = RecordingListener::new();
        broadcaster.register(Arc::new(FailingListener), None);
        broadcaster.register(Arc::new(PanickingListener), None);
        broadcaster.register(recorder.clone(), None);

        let delivered = broadcaster.broadcast(&state_event("tel:+1"));
        assert_eq!(delivered, 1);
        assert_eq!(recorder.events().len(), 1);
        // Faulting listeners stay registered.
        assert_eq!(broadcaster.listener_count(), 3);
    }

    #[test]
    fn contact_filter_limits_delivery() {
        let broadcaster: EventBroadcaster<SharingEvent> = EventBroadcaster::new();
        let all = RecordingListener::new();
        let only_bob = RecordingListener::new();
        broadcaster.register(all.clone(), None);
        broadcaster.register(only_bob.clone(), Some("tel:+bob".to_string()));

        broadcaster.broadcast(&state_event("tel:+alice"));
        broadcaster.broadcast(&state_event("tel:+bob"));

        assert_eq!(all.events().len(), 2);
        assert_eq!(only_bob.events().len(), 1);
        assert_eq!(only_bob.events()[0].contact(), "tel:+bob");
    }

    #[test]
    fn unregister_stops_delivery() {
        let broadcaster: EventBroadcaster<SharingEvent> = EventBroadcaster::new();
        let recorder = RecordingListener::new();
        let id = broadcaster.register(recorder.clone(), None);
        assert!(broadcaster.unregister(id));
        assert!(!broadcaster.unregister(id));

        broadcaster.broadcast(&state_event("tel:+1"));
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn dropped_channel_listener_is_unregistered() {
        let broadcaster: EventBroadcaster<SharingEvent> = EventBroadcaster::new();
        let (listener, rx) = ChannelListener::<SharingEvent>::new();
        broadcaster.register(listener, None);
        drop(rx);

        assert_eq!(broadcaster.broadcast(&state_event("tel:+1")), 0);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn channel_listener_preserves_order() {
        let broadcaster: EventBroadcaster<SharingEvent> = EventBroadcaster::new();
        let (listener, mut rx) = ChannelListener::<SharingEvent>::new();
        broadcaster.register(listener, None);

        broadcaster.broadcast_state_changed(
            ServiceType::ImageSharing,
            "tel:+1",
            "s1",
            SessionState::Invited,
            ReasonCode::Unspecified,
        );
        broadcaster.broadcast_progress(ServiceType::ImageSharing, "tel:+1", "s1", 10, 100);
        broadcaster.broadcast_deleted(ServiceType::ImageSharing, "tel:+1", vec!["s1".to_string()]);

        assert!(matches!(rx.recv().await, Some(SharingEvent::StateChanged { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(SharingEvent::Progress { current: 10, total: 100, .. })
        ));
        assert!(matches!(rx.recv().await, Some(SharingEvent::Deleted { .. })));
    }

    #[test]
    fn capability_event_serialization() {
        let event = CapabilityEvent::Received {
            contact: "tel:+1".to_string(),
            capabilities: Capabilities::new(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "received");
        assert_eq!(json["contact"], "tel:+1");
    }
}
