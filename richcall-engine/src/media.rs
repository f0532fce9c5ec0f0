//! Media endpoint seam: the player or renderer a session drives.

use richcall_core::{Codec, RichcallError, RichcallResult};

/// Remote transport parameters wired into a media endpoint once negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMediaInfo {
    /// Selected codec; `None` for services that do not negotiate one.
    pub codec: Option<Codec>,
    pub host: String,
    pub port: u16,
    /// Extmap id of the video orientation extension, when offered.
    pub orientation_extension_id: Option<u16>,
}

/// Media source or sink attached to a session.
///
/// Hooks run on the session worker and must not block for long.
pub trait MediaEndpoint: Send + Sync {
    /// Codecs this endpoint can handle, in local preference order.
    fn supported_codecs(&self) -> Vec<Codec>;

    /// Local port advertised in SDP.
    fn local_port(&self) -> u16;

    fn set_remote_info(&self, info: &RemoteMediaInfo) -> RichcallResult<()>;

    fn open(&self) -> RichcallResult<()> {
        Ok(())
    }

    fn start(&self) -> RichcallResult<()> {
        Ok(())
    }

    fn close(&self) {}

    /// Push one payload on the stream (generic streaming only).
    fn send_payload(&self, _payload: &[u8]) -> RichcallResult<()> {
        Err(RichcallError::Validation(
            "media endpoint does not carry payloads".to_string(),
        ))
    }
}
