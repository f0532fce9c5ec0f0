//! Persisted sharing history seam.
//!
//! The engine records each sharing through [`SharingHistory`] but does not
//! own its storage. [`PersistedSharing`] is the per-session accessor: it
//! reads the complete record once and writes every mutation through.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use richcall_core::{
    Content, Direction, ReasonCode, RichcallError, RichcallResult, ServiceType, SessionState,
};
use serde::{Deserialize, Serialize};

/// One row of sharing history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingRecord {
    pub session_id: String,
    pub service: ServiceType,
    pub contact: String,
    pub direction: Direction,
    pub content: Content,
    pub state: SessionState,
    pub reason: ReasonCode,
    pub timestamp: DateTime<Utc>,
    /// What was actually delivered once the transfer completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferred: Option<Content>,
}

/// External history store.
pub trait SharingHistory: Send + Sync {
    fn add_session(&self, record: SharingRecord) -> RichcallResult<()>;

    fn set_state_and_reason_code(
        &self,
        session_id: &str,
        state: SessionState,
        reason: ReasonCode,
    ) -> RichcallResult<()>;

    fn set_transferred(&self, session_id: &str, result: &Content) -> RichcallResult<()>;

    /// Full record of a sharing, `None` if unknown.
    fn get_cacheable_data(&self, session_id: &str) -> RichcallResult<Option<SharingRecord>>;

    fn delete_session(&self, session_id: &str) -> RichcallResult<Option<SharingRecord>>;

    fn delete_by_contact(&self, service: ServiceType, contact: &str) -> RichcallResult<Vec<SharingRecord>>;

    fn delete_all(&self, service: ServiceType) -> RichcallResult<Vec<SharingRecord>>;
}

/// History kept in process memory.
#[derive(Default)]
pub struct InMemoryHistory {
    records: Mutex<HashMap<String, SharingRecord>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn update<F>(&self, session_id: &str, f: F) -> RichcallResult<()>
    where
        F: FnOnce(&mut SharingRecord),
    {
        let mut records = self.records.lock();
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| RichcallError::SessionNotFound(session_id.to_string()))?;
        f(record);
        Ok(())
    }

    fn delete_where<F>(&self, pred: F) -> Vec<SharingRecord>
    where
        F: Fn(&SharingRecord) -> bool,
    {
        let mut records = self.records.lock();
        let ids: Vec<String> = records
            .values()
            .filter(|r| pred(r))
            .map(|r| r.session_id.clone())
            .collect();
        ids.iter().filter_map(|id| records.remove(id)).collect()
    }
}

impl SharingHistory for InMemoryHistory {
    fn add_session(&self, record: SharingRecord) -> RichcallResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&record.session_id) {
            return Err(RichcallError::Validation(format!(
                "sharing {} already recorded",
                record.session_id
            )));
        }
        records.insert(record.session_id.clone(), record);
        Ok(())
    }

    fn set_state_and_reason_code(
        &self,
        session_id: &str,
        state: SessionState,
        reason: ReasonCode,
    ) -> RichcallResult<()> {
        self.update(session_id, |r| {
            r.state = state;
            r.reason = reason;
        })
    }

    fn set_transferred(&self, session_id: &str, result: &Content) -> RichcallResult<()> {
        self.update(session_id, |r| r.transferred = Some(result.clone()))
    }

    fn get_cacheable_data(&self, session_id: &str) -> RichcallResult<Option<SharingRecord>> {
        Ok(self.records.lock().get(session_id).cloned())
    }

    fn delete_session(&self, session_id: &str) -> RichcallResult<Option<SharingRecord>> {
        Ok(self.records.lock().remove(session_id))
    }

    fn delete_by_contact(&self, service: ServiceType, contact: &str) -> RichcallResult<Vec<SharingRecord>> {
        Ok(self.delete_where(|r| r.service == service && r.contact == contact))
    }

    fn delete_all(&self, service: ServiceType) -> RichcallResult<Vec<SharingRecord>> {
        Ok(self.delete_where(|r| r.service == service))
    }
}

/// Accessor over the persisted record of one sharing.
pub struct PersistedSharing {
    session_id: String,
    history: Arc<dyn SharingHistory>,
    cached: Mutex<Option<SharingRecord>>,
}

impl PersistedSharing {
    /// Accessor for an existing row, hydrated on first read.
    pub fn new(session_id: impl Into<String>, history: Arc<dyn SharingHistory>) -> Self {
        Self {
            session_id: session_id.into(),
            history,
            cached: Mutex::new(None),
        }
    }

    /// Insert a new row and keep it as the cached record.
    pub fn create(record: SharingRecord, history: Arc<dyn SharingHistory>) -> RichcallResult<Self> {
        history.add_session(record.clone())?;
        Ok(Self {
            session_id: record.session_id.clone(),
            history,
            cached: Mutex::new(Some(record)),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The full record, read from the store at most once.
    pub fn record(&self) -> RichcallResult<SharingRecord> {
        let mut cached = self.cached.lock();
        if let Some(record) = cached.as_ref() {
            return Ok(record.clone());
        }
        let record = self
            .history
            .get_cacheable_data(&self.session_id)?
            .ok_or_else(|| RichcallError::SessionNotFound(self.session_id.clone()))?;
        *cached = Some(record.clone());
        Ok(record)
    }

    pub fn set_state_and_reason_code(&self, state: SessionState, reason: ReasonCode) -> RichcallResult<()> {
        let mut cached = self.cached.lock();
        self.history
            .set_state_and_reason_code(&self.session_id, state, reason)?;
        if let Some(record) = cached.as_mut() {
            record.state = state;
            record.reason = reason;
        }
        Ok(())
    }

    pub fn set_transferred(&self, result: &Content) -> RichcallResult<()> {
        let mut cached = self.cached.lock();
        self.history.set_transferred(&self.session_id, result)?;
        if let Some(record) = cached.as_mut() {
            record.transferred = Some(result.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str, contact: &str, service: ServiceType) -> SharingRecord {
        SharingRecord {
            session_id: id.to_string(),
            service,
            contact: contact.to_string(),
            direction: Direction::Incoming,
            content: Content::new("image/jpeg", 2048, "photo.jpg"),
            state: SessionState::Invited,
            reason: ReasonCode::Unspecified,
            timestamp: Utc::now(),
            transferred: None,
        }
    }

    /// Counts reads so hydration can be checked.
    struct CountingHistory {
        inner: InMemoryHistory,
        reads: AtomicUsize,
    }

    impl SharingHistory for CountingHistory {
        fn add_session(&self, record: SharingRecord) -> RichcallResult<()> {
            self.inner.add_session(record)
        }
        fn set_state_and_reason_code(&self, id: &str, s: SessionState, r: ReasonCode) -> RichcallResult<()> {
            self.inner.set_state_and_reason_code(id, s, r)
        }
        fn set_transferred(&self, id: &str, c: &Content) -> RichcallResult<()> {
            self.inner.set_transferred(id, c)
        }
        fn get_cacheable_data(&self, id: &str) -> RichcallResult<Option<SharingRecord>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_cacheable_data(id)
        }
        fn delete_session(&self, id: &str) -> RichcallResult<Option<SharingRecord>> {
            self.inner.delete_session(id)
        }
        fn delete_by_contact(&self, s: ServiceType, c: &str) -> RichcallResult<Vec<SharingRecord>> {
            self.inner.delete_by_contact(s, c)
        }
        fn delete_all(&self, s: ServiceType) -> RichcallResult<Vec<SharingRecord>> {
            self.inner.delete_all(s)
        }
    }

    #[test]
    fn in_memory_history_crud() {
        let history = InMemoryHistory::new();
        history.add_session(record("a", "tel:+1", ServiceType::ImageSharing)).unwrap();
        history.add_session(record("b", "tel:+2", ServiceType::ImageSharing)).unwrap();
        history.add_session(record("c", "tel:+1", ServiceType::VideoSharing)).unwrap();
        assert!(history.add_session(record("a", "tel:+1", ServiceType::ImageSharing)).is_err());

        history
            .set_state_and_reason_code("a", SessionState::Rejected, ReasonCode::RejectedByUser)
            .unwrap();
        let a = history.get_cacheable_data("a").unwrap().unwrap();
        assert_eq!(a.state, SessionState::Rejected);
        assert!(history
            .set_state_and_reason_code("zz", SessionState::Failed, ReasonCode::Unspecified)
            .is_err());

        let removed = history.delete_by_contact(ServiceType::ImageSharing, "tel:+1").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id, "a");
        assert_eq!(history.len(), 2);

        let removed = history.delete_all(ServiceType::VideoSharing).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn accessor_hydrates_once_and_writes_through() {
        let history = Arc::new(CountingHistory {
            inner: InMemoryHistory::new(),
            reads: AtomicUsize::new(0),
        });
        history.add_session(record("s1", "tel:+1", ServiceType::GeolocSharing)).unwrap();

        let accessor = PersistedSharing::new("s1", history.clone());
        let hydrated = accessor.record().unwrap();
        assert_eq!(hydrated.contact, "tel:+1");
        assert_eq!(hydrated.direction, Direction::Incoming);
        assert_eq!(accessor.record().unwrap().content.name, "photo.jpg");
        assert_eq!(history.reads.load(Ordering::SeqCst), 1);

        accessor
            .set_state_and_reason_code(SessionState::Accepted, ReasonCode::Unspecified)
            .unwrap();
        assert_eq!(accessor.record().unwrap().state, SessionState::Accepted);
        let stored = history.inner.get_cacheable_data("s1").unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Accepted);

        let delivered = Content::new("application/vnd.gsma.rcspushlocation+xml", 310, "geoloc");
        accessor.set_transferred(&delivered).unwrap();
        assert_eq!(accessor.record().unwrap().transferred, Some(delivered));
        assert_eq!(history.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn accessor_for_unknown_sharing_fails() {
        let accessor = PersistedSharing::new("missing", Arc::new(InMemoryHistory::new()));
        assert!(matches!(accessor.record(), Err(RichcallError::SessionNotFound(_))));
    }
}
