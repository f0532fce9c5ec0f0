//! # richcall-engine
//!
//! Session signaling engine for rich-call content sharing.
//!
//! One worker task per session drives the invitation lifecycle against a
//! [`SignalingTransport`]. Live sessions are kept in per-service registries
//! and every state change is fanned out to registered listeners. A
//! [`CapabilityExchange`] keeps a TTL cache of contact capabilities.

pub mod broadcaster;
pub mod capability;
pub mod config;
pub mod history;
pub mod media;
pub mod registry;
pub mod service;
pub mod session;
pub mod session_timer;
pub mod state_machine;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use broadcaster::{
    BroadcastEvent, CapabilityEvent, ChannelListener, EventBroadcaster, EventListener, ListenerError,
    ListenerId, SharingEvent,
};
pub use capability::CapabilityExchange;
pub use config::EngineConfig;
pub use history::{InMemoryHistory, PersistedSharing, SharingHistory, SharingRecord};
pub use media::{MediaEndpoint, RemoteMediaInfo};
pub use registry::{SessionRegistries, SessionRegistry};
pub use service::SharingEngine;
pub use session::{SessionControl, SessionHandle, SessionInfo};
pub use session_timer::{SessionTimer, TimerRole};
pub use transport::SignalingTransport;
