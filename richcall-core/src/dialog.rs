//! SIP-level identity of one session.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{RichcallError, RichcallResult};
use crate::message::InviteRequest;

/// Generate a random dialog tag.
pub fn generate_tag() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Addressing, tags and SDP bodies of one dialog, plus its lifecycle flags.
///
/// Owned by exactly one session. Local and remote SDP can each be written
/// once.
#[derive(Debug, Clone)]
pub struct DialogPath {
    call_id: String,
    local_party: String,
    remote_party: String,
    local_tag: String,
    remote_tag: Option<String>,
    local_content: Option<String>,
    remote_content: Option<String>,
    signaling_established: bool,
    session_established: bool,
    session_terminated: bool,
    session_expires: Option<Duration>,
}

impl DialogPath {
    /// Dialog for an invitation we are about to send.
    pub fn originating(local_party: impl Into<String>, remote_party: impl Into<String>) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            local_tag: generate_tag(),
            remote_tag: None,
            local_content: None,
            remote_content: None,
            signaling_established: false,
            session_established: false,
            session_terminated: false,
            session_expires: None,
        }
    }

    /// Dialog for a received invitation; the offer becomes the remote content.
    pub fn terminating(invite: &InviteRequest) -> Self {
        Self {
            call_id: invite.call_id.clone(),
            local_party: invite.to.clone(),
            remote_party: invite.from.clone(),
            local_tag: generate_tag(),
            remote_tag: Some(invite.from_tag.clone()),
            local_content: None,
            remote_content: Some(invite.sdp.clone()),
            signaling_established: false,
            session_established: false,
            session_terminated: false,
            session_expires: invite.session_expires.map(|s| Duration::from_secs(s as u64)),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn remote_party(&self) -> &str {
        &self.remote_party
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        self.remote_tag = Some(tag.into());
    }

    pub fn local_content(&self) -> Option<&str> {
        self.local_content.as_deref()
    }

    pub fn remote_content(&self) -> Option<&str> {
        self.remote_content.as_deref()
    }

    /// Set our SDP. Fails if already set.
    pub fn set_local_content(&mut self, sdp: impl Into<String>) -> RichcallResult<()> {
        if self.local_content.is_some() {
            return Err(RichcallError::Protocol(format!(
                "local SDP of dialog {} already set",
                self.call_id
            )));
        }
        self.local_content = Some(sdp.into());
        Ok(())
    }

    /// Set the peer's SDP. Fails if already set.
    pub fn set_remote_content(&mut self, sdp: impl Into<String>) -> RichcallResult<()> {
        if self.remote_content.is_some() {
            return Err(RichcallError::Protocol(format!(
                "remote SDP of dialog {} already set",
                self.call_id
            )));
        }
        self.remote_content = Some(sdp.into());
        Ok(())
    }

    /// Mark the signaling handshake complete. Returns `false` if it already was.
    pub fn establish_signaling(&mut self) -> bool {
        if self.signaling_established {
            return false;
        }
        self.signaling_established = true;
        true
    }

    /// Mark the media-level session usable. Returns `false` if it already was.
    pub fn establish_session(&mut self) -> bool {
        if self.session_established {
            return false;
        }
        self.session_established = true;
        true
    }

    /// Mark the dialog terminated. Returns `false` if it already was.
    pub fn terminate(&mut self) -> bool {
        if self.session_terminated {
            return false;
        }
        self.session_terminated = true;
        true
    }

    pub fn is_signaling_established(&self) -> bool {
        self.signaling_established
    }

    pub fn is_session_established(&self) -> bool {
        self.session_established
    }

    pub fn is_session_terminated(&self) -> bool {
        self.session_terminated
    }

    pub fn session_expires(&self) -> Option<Duration> {
        self.session_expires
    }

    pub fn set_session_expires(&mut self, expires: Option<Duration>) {
        self.session_expires = expires;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Content;
    use crate::state::ServiceType;

    fn sample_invite() -> InviteRequest {
        InviteRequest {
            call_id: "call-42".to_string(),
            from: "tel:+33600000001".to_string(),
            from_tag: "remote-tag".to_string(),
            to: "tel:+33600000002".to_string(),
            service: ServiceType::VideoSharing,
            content: Content::live_video(),
            sdp: "v=0\r\n".to_string(),
            session_expires: Some(1800),
            refresher: None,
            feature_tags: vec![],
        }
    }

    #[test]
    fn terminating_dialog_takes_identity_from_invite() {
        let dialog = DialogPath::terminating(&sample_invite());
        assert_eq!(dialog.call_id(), "call-42");
        assert_eq!(dialog.remote_party(), "tel:+33600000001");
        assert_eq!(dialog.remote_tag(), Some("remote-tag"));
        assert_eq!(dialog.remote_content(), Some("v=0\r\n"));
        assert_eq!(dialog.session_expires(), Some(Duration::from_secs(1800)));
        assert_eq!(dialog.local_tag().len(), 10);
    }

    #[test]
    fn contents_are_write_once() {
        let mut dialog = DialogPath::originating("tel:+1", "tel:+2");
        dialog.set_local_content("offer").unwrap();
        assert!(dialog.set_local_content("second offer").is_err());
        assert_eq!(dialog.local_content(), Some("offer"));

        dialog.set_remote_content("answer").unwrap();
        assert!(dialog.set_remote_content("other").is_err());
        assert_eq!(dialog.remote_content(), Some("answer"));

        let mut answered = DialogPath::terminating(&sample_invite());
        assert!(answered.set_remote_content("second offer").is_err());
        answered.set_local_content("answer").unwrap();
    }

    #[test]
    fn establishment_flags_are_guarded() {
        let mut dialog = DialogPath::originating("tel:+1", "tel:+2");
        assert!(dialog.establish_signaling());
        assert!(!dialog.establish_signaling());
        assert!(dialog.is_signaling_established());

        assert!(dialog.establish_session());
        assert!(!dialog.establish_session());

        assert!(dialog.terminate());
        assert!(!dialog.terminate());
    }

    #[test]
    fn originating_dialogs_get_fresh_ids() {
        let a = DialogPath::originating("tel:+1", "tel:+2");
        let b = DialogPath::originating("tel:+1", "tel:+2");
        assert_ne!(a.call_id(), b.call_id());
        assert_ne!(a.local_tag(), b.local_tag());
    }
}
