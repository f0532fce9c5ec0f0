//! Negotiated media codec description.

use serde::{Deserialize, Serialize};

/// Video frame dimensions advertised with `a=framesize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// RTP media codec. Immutable once selected for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codec {
    /// Encoding name from `a=rtpmap` (e.g. `H264`).
    pub name: String,
    pub clock_rate: u32,
    pub payload_type: u8,
    /// Format parameters from `a=fmtp`, kept verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameters: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<FrameSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<u32>,
}

impl Codec {
    pub fn new(name: impl Into<String>, clock_rate: u32, payload_type: u8) -> Self {
        Self {
            name: name.into(),
            clock_rate,
            payload_type,
            parameters: String::new(),
            frame_size: None,
            frame_rate: None,
        }
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = Some(FrameSize { width, height });
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// H.264 baseline at the dynamic payload type commonly used for sharing.
    pub fn h264() -> Self {
        Self::new("H264", 90000, 96)
            .with_parameters("profile-level-id=42900b;packetization-mode=1")
            .with_frame_size(176, 144)
            .with_frame_rate(15)
    }

    /// H.263 on its static payload type.
    pub fn h263() -> Self {
        Self::new("H263", 90000, 34).with_frame_size(176, 144).with_frame_rate(15)
    }

    /// Two codecs are interchangeable when encoding and clock rate agree.
    /// Payload types are per-offer and never compared.
    pub fn matches(&self, other: &Codec) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.clock_rate == other.clock_rate
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} (pt {})", self.name, self.clock_rate, self.payload_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_ignores_case_and_payload_type() {
        let local = Codec::new("h263", 90000, 34);
        let remote = Codec::new("H263", 90000, 98);
        assert!(local.matches(&remote));
        assert!(!local.matches(&Codec::new("H263", 8000, 34)));
        assert!(!local.matches(&Codec::h264()));
    }

    #[test]
    fn codec_serialization_skips_empty_fields() {
        let json = serde_json::to_string(&Codec::new("VP8", 90000, 100)).unwrap();
        assert!(!json.contains("parameters"));
        assert!(!json.contains("frame_size"));
    }
}
