//! Signaling message types exchanged with the SIP transport.
//!
//! These are the abstracted INVITE/response shapes the session layer works
//! with; header encoding and retransmission belong to the transport.

use serde::{Deserialize, Serialize};

use crate::state::ServiceType;

/// Response status codes used by sharing sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ringing,
    Ok,
    RequestTimeout,
    UnsupportedMediaType,
    BusyHere,
    RequestTerminated,
    Decline,
    Other(u16),
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        match self {
            Self::Ringing => 180,
            Self::Ok => 200,
            Self::RequestTimeout => 408,
            Self::UnsupportedMediaType => 415,
            Self::BusyHere => 486,
            Self::RequestTerminated => 487,
            Self::Decline => 603,
            Self::Other(code) => *code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            180 => Self::Ringing,
            200 => Self::Ok,
            408 => Self::RequestTimeout,
            415 => Self::UnsupportedMediaType,
            486 => Self::BusyHere,
            487 => Self::RequestTerminated,
            603 => Self::Decline,
            other => Self::Other(other),
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            Self::Ringing => "Ringing",
            Self::Ok => "OK",
            Self::RequestTimeout => "Request Timeout",
            Self::UnsupportedMediaType => "Unsupported Media Type",
            Self::BusyHere => "Busy Here",
            Self::RequestTerminated => "Request Terminated",
            Self::Decline => "Decline",
            Self::Other(_) => "",
        }
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.code())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason_phrase())
    }
}

/// Which side refreshes a session under RFC 4028 session timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Refresher {
    Uac,
    Uas,
}

/// Media descriptor of a sharing: what is shared and how big it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub mime_type: String,
    /// Size in bytes; zero for live streams.
    pub size: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl Content {
    pub fn new(mime_type: impl Into<String>, size: u64, name: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            size,
            name: name.into(),
            uri: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn live_video() -> Self {
        Self::new("video/3gpp", 0, "live video")
    }
}

/// Session invitation, inbound from a peer or outbound from us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub call_id: String,
    pub from: String,
    pub from_tag: String,
    pub to: String,
    pub service: ServiceType,
    pub content: Content,
    pub sdp: String,
    /// Session-Expires in seconds; present when the sender supports timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expires: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresher: Option<Refresher>,
    #[serde(default)]
    pub feature_tags: Vec<String>,
}

/// Response we send for an inbound invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingResponse {
    pub call_id: String,
    pub local_tag: String,
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expires: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresher: Option<Refresher>,
    #[serde(default)]
    pub feature_tags: Vec<String>,
}

impl SignalingResponse {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, status: StatusCode) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            status,
            sdp: None,
            session_expires: None,
            refresher: None,
            feature_tags: Vec::new(),
        }
    }

    pub fn with_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.sdp = Some(sdp.into());
        self
    }

    pub fn with_session_timer(mut self, expires: u32, refresher: Refresher) -> Self {
        self.session_expires = Some(expires);
        self.refresher = Some(refresher);
        self
    }

    pub fn with_feature_tags(mut self, tags: Vec<String>) -> Self {
        self.feature_tags = tags;
        self
    }
}

/// Response received for an invitation we sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteResponse {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_expires: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresher: Option<Refresher>,
}

impl InviteResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            remote_tag: None,
            sdp: None,
            session_expires: None,
            refresher: None,
        }
    }

    pub fn with_sdp(mut self, remote_tag: impl Into<String>, sdp: impl Into<String>) -> Self {
        self.remote_tag = Some(remote_tag.into());
        self.sdp = Some(sdp.into());
        self
    }

    pub fn with_session_timer(mut self, expires: u32, refresher: Refresher) -> Self {
        self.session_expires = Some(expires);
        self.refresher = Some(refresher);
        self
    }
}
