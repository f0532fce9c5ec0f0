//! Error types, sharing error codes and reason codes for richcall sessions.

use thiserror::Error;

use crate::state::SessionState;

/// Failure classes surfaced to listeners when a session ends in error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SharingErrorCode {
    /// Unexpected failure while setting up the session.
    SessionInitiationFailed,
    /// The final response could not be delivered or was never acknowledged.
    SendResponseFailed,
    /// No codec in the offer is supported locally.
    UnsupportedMediaType,
    /// The session was accepted without a media player attached.
    MediaPlayerNotInitialized,
}

impl std::fmt::Display for SharingErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionInitiationFailed => write!(f, "SESSION_INITIATION_FAILED"),
            Self::SendResponseFailed => write!(f, "SEND_RESPONSE_FAILED"),
            Self::UnsupportedMediaType => write!(f, "UNSUPPORTED_MEDIA_TYPE"),
            Self::MediaPlayerNotInitialized => write!(f, "MEDIA_PLAYER_NOT_INITIALIZED"),
        }
    }
}

/// Who or what ended a session that never reached, or left, STARTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    TerminationByUser,
    TerminationByTimeout,
    TerminationByRemote,
    TerminationBySystem,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TerminationByUser => write!(f, "TERMINATION_BY_USER"),
            Self::TerminationByTimeout => write!(f, "TERMINATION_BY_TIMEOUT"),
            Self::TerminationByRemote => write!(f, "TERMINATION_BY_REMOTE"),
            Self::TerminationBySystem => write!(f, "TERMINATION_BY_SYSTEM"),
        }
    }
}

/// Reason attached to every state-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    Unspecified,
    RejectedByUser,
    RejectedByTimeout,
    RejectedByRemote,
    RejectedBySystem,
    AbortedByUser,
    AbortedByRemote,
    AbortedBySystem,
    FailedInitiation,
    FailedSendResponse,
    FailedUnsupportedMedia,
    FailedMediaPlayer,
}

impl ReasonCode {
    /// Reason for a session that ended before it was started.
    pub fn rejected(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::TerminationByUser => Self::RejectedByUser,
            TerminationReason::TerminationByTimeout => Self::RejectedByTimeout,
            TerminationReason::TerminationByRemote => Self::RejectedByRemote,
            TerminationReason::TerminationBySystem => Self::RejectedBySystem,
        }
    }

    /// Reason for a session torn down after negotiation began.
    pub fn aborted(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::TerminationByUser => Self::AbortedByUser,
            TerminationReason::TerminationByRemote => Self::AbortedByRemote,
            TerminationReason::TerminationByTimeout | TerminationReason::TerminationBySystem => {
                Self::AbortedBySystem
            }
        }
    }

    /// Human-readable text for UI collaborators.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unspecified => "no specific reason",
            Self::RejectedByUser => "invitation declined by the user",
            Self::RejectedByTimeout => "invitation not answered in time",
            Self::RejectedByRemote => "invitation rejected or canceled by the remote party",
            Self::RejectedBySystem => "invitation rejected by the system",
            Self::AbortedByUser => "session aborted by the user",
            Self::AbortedByRemote => "session ended by the remote party",
            Self::AbortedBySystem => "session aborted by the system",
            Self::FailedInitiation => "session could not be initiated",
            Self::FailedSendResponse => "response to the remote party was not acknowledged",
            Self::FailedUnsupportedMedia => "no supported media codec was offered",
            Self::FailedMediaPlayer => "media player is not initialized",
        }
    }
}

impl From<SharingErrorCode> for ReasonCode {
    fn from(code: SharingErrorCode) -> Self {
        match code {
            SharingErrorCode::SessionInitiationFailed => Self::FailedInitiation,
            SharingErrorCode::SendResponseFailed => Self::FailedSendResponse,
            SharingErrorCode::UnsupportedMediaType => Self::FailedUnsupportedMedia,
            SharingErrorCode::MediaPlayerNotInitialized => Self::FailedMediaPlayer,
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Richcall protocol errors.
#[derive(Debug, Error)]
pub enum RichcallError {
    /// SDP body could not be parsed.
    #[error("malformed SDP: {0}")]
    MalformedSdp(String),

    /// Session-level failure with the code reported to listeners.
    #[error("sharing error {code}: {reason}")]
    Sharing { code: SharingErrorCode, reason: String },

    /// Message delivery failed below the session layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// No live session with this identifier.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// State graph violation.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    /// Caller supplied an unusable argument (duplicate id, wrong service...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Signaling did not follow the expected sequence.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RichcallError {
    pub fn sharing(code: SharingErrorCode, reason: impl Into<String>) -> Self {
        Self::Sharing {
            code,
            reason: reason.into(),
        }
    }

    /// Code reported to listeners when this error ends a session.
    pub fn sharing_code(&self) -> SharingErrorCode {
        match self {
            Self::Sharing { code, .. } => *code,
            Self::Transport(_) => SharingErrorCode::SendResponseFailed,
            _ => SharingErrorCode::SessionInitiationFailed,
        }
    }
}

/// Result type alias for richcall operations.
pub type RichcallResult<T> = Result<T, RichcallError>;
