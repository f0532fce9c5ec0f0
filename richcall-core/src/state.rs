//! Session state graph and the discriminators that key sessions.
//!
//! Every session starts in INITIATING and only ever moves forward through
//! [`SessionState::valid_transitions`]. Terminal states have no successors.

use serde::{Deserialize, Serialize};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Created, nothing sent or received yet.
    Initiating,
    /// Incoming invitation acknowledged with a provisional response.
    Invited,
    /// Outgoing invitation is alerting at the remote party.
    Ringing,
    /// Local user accepted an incoming invitation.
    Accepted,
    /// Final success response exchanged, awaiting confirmation.
    Establishing,
    /// Media session running.
    Started,
    /// Invitation declined (locally or by the remote party).
    Rejected,
    /// Invitation withdrawn by the remote party.
    Canceled,
    /// Invitation not answered within the ringing period.
    Timeout,
    /// Invitation dropped by the engine itself (e.g. shutdown).
    RejectedBySystem,
    /// Invitation removed through a delete request.
    Deleted,
    /// Session torn down by the user or the system.
    Aborted,
    /// Session ended normally by the remote party.
    Terminated,
    /// Session ended on an error.
    Failed,
}

impl SessionState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::Canceled
                | Self::Timeout
                | Self::RejectedBySystem
                | Self::Deleted
                | Self::Aborted
                | Self::Terminated
                | Self::Failed
        )
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [SessionState] {
        match self {
            Self::Initiating => &[
                Self::Invited,
                Self::Ringing,
                Self::Establishing,
                Self::Rejected,
                Self::Timeout,
                Self::Aborted,
                Self::Failed,
            ],
            Self::Invited => &[
                Self::Accepted,
                Self::Rejected,
                Self::Canceled,
                Self::Timeout,
                Self::RejectedBySystem,
                Self::Deleted,
                Self::Failed,
            ],
            Self::Ringing => &[
                Self::Establishing,
                Self::Rejected,
                Self::Timeout,
                Self::Aborted,
                Self::Failed,
            ],
            Self::Accepted => &[Self::Establishing, Self::Aborted, Self::Failed],
            Self::Establishing => &[Self::Started, Self::Aborted, Self::Failed],
            Self::Started => &[Self::Aborted, Self::Terminated, Self::Failed],
            Self::Rejected
            | Self::Canceled
            | Self::Timeout
            | Self::RejectedBySystem
            | Self::Deleted
            | Self::Aborted
            | Self::Terminated
            | Self::Failed => &[],
        }
    }

    /// Check if transition to target state is valid.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Which side opened the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Sharing service a session belongs to. Each one owns its own registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    ImageSharing,
    VideoSharing,
    GeolocSharing,
    GenericSipRtp,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        Self::ImageSharing,
        Self::VideoSharing,
        Self::GeolocSharing,
        Self::GenericSipRtp,
    ];

    /// SDP media type negotiated for this service.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::ImageSharing | Self::GeolocSharing => "message",
            Self::VideoSharing => "video",
            Self::GenericSipRtp => "application",
        }
    }

    /// RTP-based services pick a codec; message-based ones echo the offer.
    pub fn negotiates_codecs(&self) -> bool {
        matches!(self, Self::VideoSharing | Self::GenericSipRtp)
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImageSharing => write!(f, "image-sharing"),
            Self::VideoSharing => write!(f, "video-sharing"),
            Self::GeolocSharing => write!(f, "geoloc-sharing"),
            Self::GenericSipRtp => write!(f, "generic-sip-rtp"),
        }
    }
}
