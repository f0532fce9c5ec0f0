//! Per-service tables of live sessions.
//!
//! All mutation goes through one mutex per service. The lock is never held
//! across an await point or while calling out to listeners.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use richcall_core::{RichcallError, RichcallResult, ServiceType};

use crate::session::SessionHandle;

/// Live sessions of one service, keyed by session id.
#[derive(Debug)]
pub struct SessionRegistry {
    service: ServiceType,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(service: ServiceType) -> Self {
        Self {
            service,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    /// Register a session. Fails if the id is already live.
    pub fn add(&self, session: Arc<SessionHandle>) -> RichcallResult<()> {
        if session.service() != self.service {
            return Err(RichcallError::Validation(format!(
                "session {} belongs to {}, not {}",
                session.id(),
                session.service(),
                self.service
            )));
        }
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session.id()) {
            return Err(RichcallError::Validation(format!(
                "session {} already registered",
                session.id()
            )));
        }
        tracing::debug!("Registered {} session {}", self.service, session.id());
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Remove a session; `None` if it was not (or no longer) registered.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.lock().remove(session_id);
        if removed.is_some() {
            tracing::debug!("Unregistered {} session {}", self.service, session_id);
        }
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(session_id).cloned()
    }

    pub fn list_by_contact(&self, contact: &str) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.contact() == contact)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Session owning a SIP dialog.
    pub fn find_by_call_id(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .values()
            .find(|s| s.call_id() == call_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// One registry per service type.
#[derive(Debug)]
pub struct SessionRegistries {
    image: Arc<SessionRegistry>,
    video: Arc<SessionRegistry>,
    geoloc: Arc<SessionRegistry>,
    generic: Arc<SessionRegistry>,
}

impl SessionRegistries {
    pub fn new() -> Self {
        Self {
            image: Arc::new(SessionRegistry::new(ServiceType::ImageSharing)),
            video: Arc::new(SessionRegistry::new(ServiceType::VideoSharing)),
            geoloc: Arc::new(SessionRegistry::new(ServiceType::GeolocSharing)),
            generic: Arc::new(SessionRegistry::new(ServiceType::GenericSipRtp)),
        }
    }

    pub fn for_service(&self, service: ServiceType) -> Arc<SessionRegistry> {
        match service {
            ServiceType::ImageSharing => self.image.clone(),
            ServiceType::VideoSharing => self.video.clone(),
            ServiceType::GeolocSharing => self.geoloc.clone(),
            ServiceType::GenericSipRtp => self.generic.clone(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<SessionRegistry>> {
        [&self.image, &self.video, &self.geoloc, &self.generic].into_iter()
    }

    /// Look a session up in every service.
    pub fn find(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.iter().find_map(|r| r.get(session_id))
    }

    pub fn find_by_call_id(&self, call_id: &str) -> Option<Arc<SessionHandle>> {
        self.iter().find_map(|r| r.find_by_call_id(call_id))
    }

    pub fn list_all(&self) -> Vec<Arc<SessionHandle>> {
        self.iter().flat_map(|r| r.list_all()).collect()
    }
}

impl Default for SessionRegistries {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::new_handle;

    #[test]
    fn add_get_remove() {
        let registry = SessionRegistry::new(ServiceType::VideoSharing);
        let (session, _rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        registry.add(session.clone()).unwrap();

        assert_eq!(registry.get("s1").unwrap().id(), "s1");
        assert_eq!(registry.len(), 1);

        assert!(registry.remove("s1").is_some());
        assert!(registry.get("s1").is_none());
        assert!(registry.remove("s1").is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let registry = SessionRegistry::new(ServiceType::VideoSharing);
        let (first, _rx1) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        let (second, _rx2) = new_handle("s1", "tel:+2", ServiceType::VideoSharing);
        registry.add(first).unwrap();
        assert!(registry.add(second).is_err());
        assert_eq!(registry.get("s1").unwrap().contact(), "tel:+1");
    }

    #[test]
    fn wrong_service_is_rejected() {
        let registry = SessionRegistry::new(ServiceType::ImageSharing);
        let (session, _rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        assert!(registry.add(session).is_err());
    }

    #[test]
    fn list_by_contact() {
        let registry = SessionRegistry::new(ServiceType::GeolocSharing);
        for (id, contact) in [("a", "tel:+1"), ("b", "tel:+2"), ("c", "tel:+1")] {
            let (session, _rx) = new_handle(id, contact, ServiceType::GeolocSharing);
            registry.add(session).unwrap();
        }

        let mut ids: Vec<String> = registry
            .list_by_contact("tel:+1")
            .iter()
            .map(|s| s.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(registry.list_all().len(), 3);
    }

    #[test]
    fn registries_are_isolated_per_service() {
        let registries = SessionRegistries::new();
        let (session, _rx) = new_handle("s1", "tel:+1", ServiceType::ImageSharing);
        registries
            .for_service(ServiceType::ImageSharing)
            .add(session)
            .unwrap();

        assert!(registries.for_service(ServiceType::VideoSharing).get("s1").is_none());
        assert!(registries.find("s1").is_some());
        assert_eq!(registries.list_all().len(), 1);
    }
}
