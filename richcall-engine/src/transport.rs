//! Signaling transport seam.
//!
//! The engine never touches sockets. Requests, responses and their
//! transaction-level retransmissions are delegated to a [`SignalingTransport`].

use async_trait::async_trait;
use richcall_core::{InviteRequest, InviteResponse, RichcallResult, SignalingResponse};
use tokio::sync::mpsc;

/// Reliable message delivery provided by the underlying SIP stack.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Send a response that needs no acknowledgment (provisional or reject).
    async fn send_response(&self, response: SignalingResponse) -> RichcallResult<()>;

    /// Send a final success response and wait for its ACK within the
    /// transport's retransmission budget. `Ok(false)` means no ACK arrived.
    async fn send_final_and_await_ack(&self, response: SignalingResponse) -> RichcallResult<bool>;

    /// Send an invitation. Every response matched to it is delivered on the
    /// returned channel, which closes once the transaction ends.
    async fn send_invite(&self, invite: InviteRequest) -> RichcallResult<mpsc::Receiver<InviteResponse>>;

    async fn send_ack(&self, call_id: &str) -> RichcallResult<()>;

    async fn send_cancel(&self, call_id: &str) -> RichcallResult<()>;

    async fn send_bye(&self, call_id: &str) -> RichcallResult<()>;

    /// Send a session refresh (re-INVITE or UPDATE) for a running dialog.
    async fn send_session_refresh(&self, call_id: &str) -> RichcallResult<()>;

    /// Send a capability query carrying our feature tags and return the
    /// feature tags of the answer.
    async fn query_capabilities(&self, contact: &str, feature_tags: &[String]) -> RichcallResult<Vec<String>>;
}
