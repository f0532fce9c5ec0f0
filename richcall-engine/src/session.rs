//! Live session handle shared between its worker, the registry and the API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use richcall_core::{
    Content, DialogPath, Direction, ReasonCode, RichcallError, RichcallResult, ServiceType,
    SessionState, TerminationReason,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::history::PersistedSharing;
use crate::media::MediaEndpoint;

/// Requests delivered to a session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionControl {
    /// Local user accepted the invitation.
    Accept,
    /// Local user declined the invitation.
    Reject,
    /// Tear the session down. Also used by session-timer expiry.
    Abort(TerminationReason),
    /// Remote party withdrew its invitation.
    RemoteCancel,
    /// Remote party ended the session.
    RemoteBye,
    /// Remote party refreshed the session.
    RefreshReceived,
    /// Media layer finished delivering the content.
    TransferCompleted(Content),
    /// The sharing is being deleted.
    Delete,
}

/// Read-only snapshot of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub service: ServiceType,
    pub contact: String,
    pub direction: Direction,
    pub state: SessionState,
    pub reason: ReasonCode,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

struct Status {
    state: SessionState,
    reason: ReasonCode,
}

/// One live session.
pub struct SessionHandle {
    id: String,
    service: ServiceType,
    contact: String,
    direction: Direction,
    content: Content,
    timestamp: DateTime<Utc>,
    status: Mutex<Status>,
    dialog: Mutex<DialogPath>,
    control: mpsc::UnboundedSender<SessionControl>,
    media: Mutex<Option<Arc<dyn MediaEndpoint>>>,
    cancel: CancellationToken,
    persisted: PersistedSharing,
}

impl SessionHandle {
    /// Create a handle in INITIATING together with its control receiver.
    pub fn new(
        id: impl Into<String>,
        service: ServiceType,
        direction: Direction,
        content: Content,
        dialog: DialogPath,
        persisted: PersistedSharing,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionControl>) {
        let (control, control_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            id: id.into(),
            service,
            contact: dialog.remote_party().to_string(),
            direction,
            content,
            timestamp: Utc::now(),
            status: Mutex::new(Status {
                state: SessionState::Initiating,
                reason: ReasonCode::Unspecified,
            }),
            dialog: Mutex::new(dialog),
            control,
            media: Mutex::new(None),
            cancel: CancellationToken::new(),
            persisted,
        });
        (handle, control_rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn state(&self) -> SessionState {
        self.status.lock().state
    }

    pub fn reason(&self) -> ReasonCode {
        self.status.lock().reason
    }

    pub fn info(&self) -> SessionInfo {
        let status = self.status.lock();
        SessionInfo {
            session_id: self.id.clone(),
            service: self.service,
            contact: self.contact.clone(),
            direction: self.direction,
            state: status.state,
            reason: status.reason,
            content: self.content.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Move to `to` if the state graph allows it.
    pub fn transition(&self, to: SessionState, reason: ReasonCode) -> RichcallResult<SessionState> {
        let mut status = self.status.lock();
        let from = status.state;
        if !from.can_transition_to(to) {
            return Err(RichcallError::InvalidTransition { from, to });
        }
        status.state = to;
        status.reason = reason;
        Ok(from)
    }

    /// Run `f` with exclusive access to the dialog.
    pub fn with_dialog<R>(&self, f: impl FnOnce(&mut DialogPath) -> R) -> R {
        f(&mut self.dialog.lock())
    }

    pub fn call_id(&self) -> String {
        self.dialog.lock().call_id().to_string()
    }

    pub fn media(&self) -> Option<Arc<dyn MediaEndpoint>> {
        self.media.lock().clone()
    }

    pub fn set_media(&self, media: Arc<dyn MediaEndpoint>) {
        *self.media.lock() = Some(media);
    }

    pub fn persisted(&self) -> &PersistedSharing {
        &self.persisted
    }

    /// Token cancelled once the session reaches a terminal state.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue a control request. Returns `false` if the session is terminal
    /// or its worker has exited.
    pub fn send_control(&self, control: SessionControl) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.control.send(control).is_ok()
    }

    /// Ask the worker to tear the session down. No-op on a finished session.
    pub fn abort(&self, reason: TerminationReason) {
        if !self.send_control(SessionControl::Abort(reason)) {
            tracing::debug!("Abort ignored for session {}: already finished", self.id);
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("contact", &self.contact)
            .field("state", &self.state())
            .finish()
    }
}
