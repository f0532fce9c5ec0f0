//! Engine configuration.

use std::time::Duration;

use richcall_core::{Capabilities, RichcallResult};
use serde::Deserialize;

/// Smallest Session-Expires a peer may be asked for (RFC 4028 Min-SE).
pub const MIN_SESSION_EXPIRES: Duration = Duration::from_secs(90);

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address advertised in SDP `o=`/`c=` lines.
    pub local_ip: String,
    /// Our own public identity, used as the From of outgoing invitations.
    pub local_identity: String,
    /// How long an invitation may stay undecided.
    #[serde(with = "duration_secs")]
    pub ringing_timeout: Duration,
    /// Upper bound on waiting for the ACK of a final response.
    #[serde(with = "duration_secs")]
    pub ack_timeout: Duration,
    /// Age after which cached capabilities are revalidated.
    #[serde(with = "duration_secs")]
    pub capability_expiry: Duration,
    /// Concurrent capability queries in a batch request.
    pub capability_request_concurrency: usize,
    pub session_timer_enabled: bool,
    #[serde(with = "duration_secs")]
    pub session_expires: Duration,
    /// Extmap id offered for the video orientation extension.
    pub video_orientation_extension_id: Option<u16>,
    /// Capabilities advertised to other contacts.
    pub my_capabilities: Capabilities,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut my_capabilities = Capabilities::new();
        my_capabilities.image_sharing = true;
        my_capabilities.video_sharing = true;
        my_capabilities.geoloc_push = true;
        my_capabilities.sip_automata = true;

        Self {
            local_ip: "127.0.0.1".to_string(),
            local_identity: "sip:anonymous@localhost".to_string(),
            ringing_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(32),
            capability_expiry: Duration::from_secs(3600),
            capability_request_concurrency: 8,
            session_timer_enabled: true,
            session_expires: Duration::from_secs(1800),
            video_orientation_extension_id: Some(1),
            my_capabilities,
        }
    }
}

impl EngineConfig {
    /// Create a config with our identity and address.
    pub fn with_identity(local_identity: impl Into<String>, local_ip: impl Into<String>) -> Self {
        Self {
            local_identity: local_identity.into(),
            local_ip: local_ip.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> RichcallResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Set the ringing timeout.
    pub fn with_ringing_timeout(mut self, timeout: Duration) -> Self {
        self.ringing_timeout = timeout;
        self
    }

    /// Set the ACK wait bound.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the capability expiry window.
    pub fn with_capability_expiry(mut self, expiry: Duration) -> Self {
        self.capability_expiry = expiry;
        self
    }

    /// Enable session timers with the given interval, clamped to the minimum.
    pub fn with_session_timer(mut self, expires: Duration) -> Self {
        self.session_timer_enabled = true;
        self.session_expires = expires.max(MIN_SESSION_EXPIRES);
        self
    }

    /// Disable session timers.
    pub fn without_session_timer(mut self) -> Self {
        self.session_timer_enabled = false;
        self
    }

    /// Set our advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.my_capabilities = capabilities;
        self
    }

    fn normalized(mut self) -> Self {
        self.session_expires = self.session_expires.max(MIN_SESSION_EXPIRES);
        self.capability_request_concurrency = self.capability_request_concurrency.max(1);
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
