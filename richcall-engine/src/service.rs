//! Application-facing engine: one entry point for every sharing service.
//!
//! Inbound signaling is routed here by the transport owner (`on_invite`,
//! `on_cancel`, `on_bye`, `on_session_refresh`); the application drives the
//! sessions through the remaining methods and observes them through the
//! per-service event broadcasters.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use richcall_core::{
    Content, DialogPath, Direction, InviteRequest, ReasonCode, RichcallError, RichcallResult,
    ServiceType, SessionState, TerminationReason,
};
use tokio::task::JoinHandle;

use crate::broadcaster::{EventBroadcaster, EventListener, ListenerId, SharingEvent};
use crate::capability::CapabilityExchange;
use crate::config::EngineConfig;
use crate::history::{PersistedSharing, SharingHistory, SharingRecord};
use crate::media::MediaEndpoint;
use crate::registry::SessionRegistries;
use crate::session::{SessionControl, SessionHandle, SessionInfo};
use crate::state_machine::{self, WorkerContext};
use crate::transport::SignalingTransport;

/// Worker contexts, one per service.
struct ServiceContexts {
    image: WorkerContext,
    video: WorkerContext,
    geoloc: WorkerContext,
    generic: WorkerContext,
}

impl ServiceContexts {
    fn get(&self, service: ServiceType) -> &WorkerContext {
        match service {
            ServiceType::ImageSharing => &self.image,
            ServiceType::VideoSharing => &self.video,
            ServiceType::GeolocSharing => &self.geoloc,
            ServiceType::GenericSipRtp => &self.generic,
        }
    }
}

/// Rich-call sharing engine.
pub struct SharingEngine {
    config: Arc<EngineConfig>,
    registries: SessionRegistries,
    contexts: ServiceContexts,
    history: Arc<dyn SharingHistory>,
    capabilities: Arc<CapabilityExchange>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl SharingEngine {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn SignalingTransport>,
        history: Arc<dyn SharingHistory>,
    ) -> Self {
        let config = Arc::new(config);
        let registries = SessionRegistries::new();
        let context = |service: ServiceType| WorkerContext {
            registry: registries.for_service(service),
            events: Arc::new(EventBroadcaster::new()),
            transport: transport.clone(),
            config: config.clone(),
        };
        let contexts = ServiceContexts {
            image: context(ServiceType::ImageSharing),
            video: context(ServiceType::VideoSharing),
            geoloc: context(ServiceType::GeolocSharing),
            generic: context(ServiceType::GenericSipRtp),
        };
        let capabilities = CapabilityExchange::new(transport.clone(), config.clone());

        tracing::info!("Sharing engine started for {}", config.local_identity);
        Self {
            config,
            registries,
            contexts,
            history,
            capabilities,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Event broadcaster of one service.
    pub fn events(&self, service: ServiceType) -> &Arc<EventBroadcaster<SharingEvent>> {
        &self.contexts.get(service).events
    }

    pub fn capabilities(&self) -> &Arc<CapabilityExchange> {
        &self.capabilities
    }

    fn track(&self, worker: JoinHandle<()>) {
        let mut workers = self.workers.lock();
        workers.retain(|w| !w.is_finished());
        workers.push(worker);
    }

    fn new_session(
        &self,
        service: ServiceType,
        direction: Direction,
        content: Content,
        dialog: DialogPath,
    ) -> RichcallResult<(Arc<SessionHandle>, tokio::sync::mpsc::UnboundedReceiver<SessionControl>)> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let record = SharingRecord {
            session_id: session_id.clone(),
            service,
            contact: dialog.remote_party().to_string(),
            direction,
            content: content.clone(),
            state: SessionState::Initiating,
            reason: ReasonCode::Unspecified,
            timestamp: Utc::now(),
            transferred: None,
        };
        let persisted = PersistedSharing::create(record, self.history.clone())?;
        let (handle, control_rx) = SessionHandle::new(session_id, service, direction, content, dialog, persisted);
        self.registries.for_service(service).add(handle.clone())?;
        Ok((handle, control_rx))
    }

    // ---- sessions -------------------------------------------------------

    /// Start sharing `content` with `contact`. Returns the new session id.
    pub fn share_outgoing(
        &self,
        service: ServiceType,
        contact: &str,
        content: Content,
        media: Arc<dyn MediaEndpoint>,
    ) -> RichcallResult<String> {
        if contact.trim().is_empty() {
            return Err(RichcallError::Validation("contact is empty".to_string()));
        }
        let dialog = DialogPath::originating(self.config.local_identity.clone(), contact);
        let (handle, control_rx) = self.new_session(service, Direction::Outgoing, content, dialog)?;
        handle.set_media(media);

        tracing::info!("Share {} with {}: session {}", service, contact, handle.id());
        let worker = state_machine::spawn_outgoing(self.contexts.get(service).clone(), handle.clone(), control_rx);
        self.track(worker);
        Ok(handle.id().to_string())
    }

    /// Handle a received invitation. Returns the id of the session created
    /// for it.
    pub fn on_invite(&self, invite: InviteRequest) -> RichcallResult<String> {
        if self.registries.find_by_call_id(&invite.call_id).is_some() {
            return Err(RichcallError::Protocol(format!(
                "invitation {} already has a session",
                invite.call_id
            )));
        }
        let dialog = DialogPath::terminating(&invite);
        let (handle, control_rx) =
            self.new_session(invite.service, Direction::Incoming, invite.content.clone(), dialog)?;

        tracing::info!(
            "Received {} invitation from {}: session {}",
            invite.service,
            invite.from,
            handle.id()
        );
        let ctx = self.contexts.get(invite.service).clone();
        let worker = state_machine::spawn_incoming(ctx, handle.clone(), control_rx, invite);
        self.track(worker);
        Ok(handle.id().to_string())
    }

    fn live_session(&self, session_id: &str) -> RichcallResult<Arc<SessionHandle>> {
        self.registries
            .find(session_id)
            .ok_or_else(|| RichcallError::SessionNotFound(session_id.to_string()))
    }

    /// Attach the player or renderer of a session. Required before an
    /// incoming invitation is accepted.
    pub fn set_media_endpoint(&self, session_id: &str, media: Arc<dyn MediaEndpoint>) -> RichcallResult<()> {
        self.live_session(session_id)?.set_media(media);
        Ok(())
    }

    fn answer_invitation(&self, session_id: &str, control: SessionControl, to: SessionState) -> RichcallResult<()> {
        let session = self.live_session(session_id)?;
        let state = session.state();
        if session.direction() != Direction::Incoming || state != SessionState::Invited {
            return Err(RichcallError::InvalidTransition { from: state, to });
        }
        if !session.send_control(control) {
            return Err(RichcallError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub fn accept_invitation(&self, session_id: &str) -> RichcallResult<()> {
        tracing::info!("Accept session {}", session_id);
        self.answer_invitation(session_id, SessionControl::Accept, SessionState::Accepted)
    }

    pub fn reject_invitation(&self, session_id: &str) -> RichcallResult<()> {
        tracing::info!("Reject session {}", session_id);
        self.answer_invitation(session_id, SessionControl::Reject, SessionState::Rejected)
    }

    /// Abort a session. Aborting a session that already ended is a no-op.
    pub fn abort_session(&self, session_id: &str) -> RichcallResult<()> {
        match self.registries.find(session_id) {
            Some(session) => {
                tracing::info!("Abort session {}", session_id);
                session.abort(TerminationReason::TerminationByUser);
                Ok(())
            }
            None if self.history.get_cacheable_data(session_id)?.is_some() => Ok(()),
            None => Err(RichcallError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Push a payload on a started generic streaming session.
    pub fn send_payload(&self, session_id: &str, payload: &[u8]) -> RichcallResult<()> {
        let session = self.live_session(session_id)?;
        if session.service() != ServiceType::GenericSipRtp {
            return Err(RichcallError::Validation(format!(
                "payloads are not supported by {}",
                session.service()
            )));
        }
        if session.state() != SessionState::Started {
            return Err(RichcallError::Validation(format!(
                "session {} is not started",
                session_id
            )));
        }
        let media = session
            .media()
            .ok_or_else(|| RichcallError::Validation(format!("session {} has no media endpoint", session_id)))?;
        media.send_payload(payload)
    }

    /// Snapshot of a session, live or from history.
    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        if let Some(session) = self.registries.find(session_id) {
            return Some(session.info());
        }
        match PersistedSharing::new(session_id, self.history.clone()).record() {
            Ok(record) => Some(SessionInfo::from(record)),
            Err(RichcallError::SessionNotFound(_)) => None,
            Err(e) => {
                tracing::warn!("History lookup for {} failed: {}", session_id, e);
                None
            }
        }
    }

    /// Live sessions of every service.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.registries.list_all().iter().map(|s| s.info()).collect()
    }

    pub fn list_sessions_for(&self, service: ServiceType) -> Vec<SessionInfo> {
        self.registries
            .for_service(service)
            .list_all()
            .iter()
            .map(|s| s.info())
            .collect()
    }

    pub fn add_listener(
        &self,
        service: ServiceType,
        listener: Arc<dyn EventListener<SharingEvent>>,
        contact_filter: Option<String>,
    ) -> ListenerId {
        self.events(service).register(listener, contact_filter)
    }

    pub fn remove_listener(&self, service: ServiceType, id: ListenerId) -> bool {
        self.events(service).unregister(id)
    }

    // ---- dialog events --------------------------------------------------

    fn route(&self, call_id: &str, control: SessionControl) -> bool {
        match self.registries.find_by_call_id(call_id) {
            Some(session) => session.send_control(control),
            None => {
                tracing::debug!("No session for dialog {}, {:?} dropped", call_id, control);
                false
            }
        }
    }

    /// The remote party withdrew its invitation.
    pub fn on_cancel(&self, call_id: &str) -> bool {
        self.route(call_id, SessionControl::RemoteCancel)
    }

    /// The remote party ended the session.
    pub fn on_bye(&self, call_id: &str) -> bool {
        self.route(call_id, SessionControl::RemoteBye)
    }

    pub fn on_session_refresh(&self, call_id: &str) -> bool {
        self.route(call_id, SessionControl::RefreshReceived)
    }

    // ---- media layer reports --------------------------------------------

    pub fn on_transfer_progress(&self, session_id: &str, current: u64, total: u64) -> RichcallResult<()> {
        let session = self.live_session(session_id)?;
        self.events(session.service())
            .broadcast_progress(session.service(), session.contact(), session.id(), current, total);
        Ok(())
    }

    /// The media layer delivered the whole content; ends the session.
    pub fn on_transfer_completed(&self, session_id: &str, result: Content) -> RichcallResult<()> {
        let session = self.live_session(session_id)?;
        if !session.send_control(SessionControl::TransferCompleted(result)) {
            return Err(RichcallError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    pub fn on_payload_received(&self, session_id: &str, payload: &[u8]) -> RichcallResult<()> {
        let session = self.live_session(session_id)?;
        self.events(session.service())
            .broadcast_payload(session.service(), session.contact(), session.id(), payload);
        Ok(())
    }

    // ---- deletion -------------------------------------------------------

    /// Delete every sharing of a service.
    pub fn delete_sharings(&self, service: ServiceType) -> RichcallResult<()> {
        let live = self.registries.for_service(service).list_all();
        let deleted = self.history.delete_all(service)?;
        self.finish_delete(service, live, deleted);
        Ok(())
    }

    /// Delete the sharings of a service exchanged with one contact.
    pub fn delete_sharings_with(&self, service: ServiceType, contact: &str) -> RichcallResult<()> {
        let live = self.registries.for_service(service).list_by_contact(contact);
        let deleted = self.history.delete_by_contact(service, contact)?;
        self.finish_delete(service, live, deleted);
        Ok(())
    }

    pub fn delete_sharing(&self, service: ServiceType, session_id: &str) -> RichcallResult<()> {
        let live: Vec<_> = self.registries.for_service(service).get(session_id).into_iter().collect();
        let deleted: Vec<_> = self.history.delete_session(session_id)?.into_iter().collect();
        if live.is_empty() && deleted.is_empty() {
            return Err(RichcallError::SessionNotFound(session_id.to_string()));
        }
        self.finish_delete(service, live, deleted);
        Ok(())
    }

    fn finish_delete(&self, service: ServiceType, live: Vec<Arc<SessionHandle>>, deleted: Vec<SharingRecord>) {
        let mut by_contact: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for session in &live {
            session.send_control(SessionControl::Delete);
            by_contact
                .entry(session.contact().to_string())
                .or_default()
                .push(session.id().to_string());
        }
        for record in deleted {
            let ids = by_contact.entry(record.contact).or_default();
            if !ids.contains(&record.session_id) {
                ids.push(record.session_id);
            }
        }

        for (contact, session_ids) in by_contact {
            tracing::info!("Deleted {} {} sharing(s) with {}", session_ids.len(), service, contact);
            self.events(service).broadcast_deleted(service, &contact, session_ids);
        }
    }

    // ---- capabilities ---------------------------------------------------

    pub fn request_capabilities(&self, contact: &str) -> Option<JoinHandle<()>> {
        self.capabilities.request_capabilities(contact)
    }

    pub fn request_capabilities_for<I, S>(&self, contacts: I) -> JoinHandle<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.capabilities.request_capabilities_batch(contacts)
    }

    pub fn on_capability_query(&self, contact: &str, feature_tags: &[String]) -> Vec<String> {
        self.capabilities.on_capability_query(contact, feature_tags)
    }

    // ---- lifecycle ------------------------------------------------------

    /// Abort every live session and wait for the workers to finish.
    pub async fn shutdown(&self) {
        let sessions = self.registries.list_all();
        tracing::info!("Shutting down, aborting {} session(s)", sessions.len());
        for session in &sessions {
            session.abort(TerminationReason::TerminationBySystem);
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Session worker ended abnormally: {}", e);
            }
        }
    }
}

impl From<SharingRecord> for SessionInfo {
    fn from(record: SharingRecord) -> Self {
        Self {
            session_id: record.session_id,
            service: record.service,
            contact: record.contact,
            direction: record.direction,
            state: record.state,
            reason: record.reason,
            content: record.content,
            timestamp: record.timestamp,
        }
    }
}
