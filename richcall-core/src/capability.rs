//! Per-contact capability record and its feature-tag encoding.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::ServiceType;

pub const TAG_IMAGE_SHARE: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.gsma-is\"";
pub const TAG_VIDEO_SHARE: &str = "+g.3gpp.cs-voice";
pub const TAG_IM: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.rcse.im\"";
pub const TAG_FILE_TRANSFER: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.rcse.ft\"";
pub const TAG_GEOLOC_PUSH: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.rcs.geopush\"";
pub const TAG_IP_VOICE_CALL: &str = "+g.3gpp.icsi-ref=\"urn%3Aurn-7%3A3gpp-service.ims.icsi.mmtel\"";
pub const TAG_IP_VIDEO_CALL: &str = "video";
pub const TAG_SIP_AUTOMATA: &str = "+sip.automata";

/// Prefix of extension feature tags; the remainder is the extension name.
pub const EXTENSION_TAG_PREFIX: &str = "+g.3gpp.iari-ref=\"urn%3Aurn-7%3A3gpp-application.ims.iari.rcse.ext.";

/// Feature tags announcing a sharing service in its signaling.
pub fn service_feature_tags(service: ServiceType) -> Vec<String> {
    let tag = match service {
        ServiceType::ImageSharing => TAG_IMAGE_SHARE,
        ServiceType::VideoSharing => TAG_VIDEO_SHARE,
        ServiceType::GeolocSharing => TAG_GEOLOC_PUSH,
        ServiceType::GenericSipRtp => TAG_SIP_AUTOMATA,
    };
    vec![tag.to_string()]
}

/// Feature set advertised by one contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub image_sharing: bool,
    pub video_sharing: bool,
    pub im_session: bool,
    pub file_transfer: bool,
    pub geoloc_push: bool,
    pub ip_voice_call: bool,
    pub ip_video_call: bool,
    pub sip_automata: bool,
    #[serde(default)]
    pub extensions: BTreeSet<String>,
    /// When this record was fetched.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            image_sharing: false,
            video_sharing: false,
            im_session: false,
            file_transfer: false,
            geoloc_push: false,
            ip_voice_call: false,
            ip_video_call: false,
            sip_automata: false,
            extensions: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }
}

impl Capabilities {
    /// Create an empty record stamped now.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.insert(extension.into());
        self
    }

    /// A record is fresh while it is younger than `expiry` at `now`. An
    /// expiry reaching past the representable time range never runs out.
    pub fn is_fresh(&self, expiry: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(expiry)
            .ok()
            .and_then(|expiry| now.checked_sub_signed(expiry))
            .map_or(true, |limit| self.timestamp > limit)
    }

    /// Decode the feature tags carried in a capability query or response.
    /// Unknown tags are ignored.
    pub fn from_feature_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut caps = Self::default();
        for tag in tags {
            let tag = tag.as_ref().trim();
            match tag {
                TAG_IMAGE_SHARE => caps.image_sharing = true,
                TAG_VIDEO_SHARE => caps.video_sharing = true,
                TAG_IM => caps.im_session = true,
                TAG_FILE_TRANSFER => caps.file_transfer = true,
                TAG_GEOLOC_PUSH => caps.geoloc_push = true,
                TAG_IP_VOICE_CALL => caps.ip_voice_call = true,
                TAG_IP_VIDEO_CALL => caps.ip_video_call = true,
                TAG_SIP_AUTOMATA => caps.sip_automata = true,
                _ => {
                    if let Some(ext) = tag
                        .strip_prefix(EXTENSION_TAG_PREFIX)
                        .and_then(|rest| rest.strip_suffix('"'))
                    {
                        caps.extensions.insert(ext.to_string());
                    }
                }
            }
        }
        caps
    }

    /// Encode as feature tags, in a stable order.
    pub fn to_feature_tags(&self) -> Vec<String> {
        let flags = [
            (self.image_sharing, TAG_IMAGE_SHARE),
            (self.video_sharing, TAG_VIDEO_SHARE),
            (self.im_session, TAG_IM),
            (self.file_transfer, TAG_FILE_TRANSFER),
            (self.geoloc_push, TAG_GEOLOC_PUSH),
            (self.ip_voice_call, TAG_IP_VOICE_CALL),
            (self.ip_video_call, TAG_IP_VIDEO_CALL),
            (self.sip_automata, TAG_SIP_AUTOMATA),
        ];
        let mut tags: Vec<String> = flags
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, tag)| tag.to_string())
            .collect();
        tags.extend(
            self.extensions
                .iter()
                .map(|ext| format!("{}{}\"", EXTENSION_TAG_PREFIX, ext)),
        );
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_window() {
        let now = Utc::now();
        let caps = Capabilities::new().with_timestamp(now - chrono::Duration::seconds(30));
        assert!(caps.is_fresh(Duration::from_secs(60), now));
        assert!(!caps.is_fresh(Duration::from_secs(10), now));
    }

    #[test]
    fn huge_expiry_keeps_records_fresh() {
        let now = Utc::now();
        let caps = Capabilities::new().with_timestamp(now - chrono::Duration::days(365));
        assert!(caps.is_fresh(Duration::from_secs(10_000_000_000_000), now));
        assert!(caps.is_fresh(Duration::MAX, now));
    }

    #[test]
    fn feature_tags_decode() {
        let tags = vec![
            TAG_VIDEO_SHARE.to_string(),
            TAG_SIP_AUTOMATA.to_string(),
            format!("{}gaming\"", EXTENSION_TAG_PREFIX),
            "+g.unknown".to_string(),
        ];
        let caps = Capabilities::from_feature_tags(&tags);
        assert!(caps.video_sharing);
        assert!(caps.sip_automata);
        assert!(!caps.image_sharing);
        assert!(caps.extensions.contains("gaming"));
        assert_eq!(caps.extensions.len(), 1);
    }

    #[test]
    fn feature_tags_encode_flags_then_extensions() {
        let mut caps = Capabilities::new().with_extension("gaming");
        caps.image_sharing = true;
        caps.ip_video_call = true;

        let tags = caps.to_feature_tags();
        assert_eq!(tags[0], TAG_IMAGE_SHARE);
        assert_eq!(tags[1], TAG_IP_VIDEO_CALL);
        assert!(tags[2].ends_with("ext.gaming\""));

        let decoded = Capabilities::from_feature_tags(&tags);
        assert!(decoded.image_sharing && decoded.ip_video_call);
        assert!(decoded.extensions.contains("gaming"));
    }
}
