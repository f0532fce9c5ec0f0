//! Per-session workers driving the invitation lifecycle.
//!
//! Each session runs on its own task. The task owns the control receiver of
//! its [`SessionHandle`]; every state change of the session is made here, so
//! events for one session reach a listener in the order they were emitted.
//!
//! A worker returns `RichcallResult<()>`. The supervisor around it turns an
//! error, or a panic, into a FAILED state with the matching sharing code.

use std::sync::Arc;
use std::time::Duration;

use richcall_core::capability::service_feature_tags;
use richcall_core::sdp::{self, MediaDescription, MediaDirection, VIDEO_ORIENTATION_URI};
use richcall_core::{
    Codec, InviteRequest, InviteResponse, ReasonCode, Refresher, RichcallError, RichcallResult,
    ServiceType, SessionState, SharingErrorCode, SignalingResponse, StatusCode, TerminationReason,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::broadcaster::{EventBroadcaster, SharingEvent};
use crate::config::{EngineConfig, MIN_SESSION_EXPIRES};
use crate::media::{MediaEndpoint, RemoteMediaInfo};
use crate::registry::SessionRegistry;
use crate::session::{SessionControl, SessionHandle};
use crate::session_timer::{SessionTimer, TimerRole};
use crate::transport::SignalingTransport;

/// Shared collaborators of the workers of one service.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Arc<SessionRegistry>,
    pub events: Arc<EventBroadcaster<SharingEvent>>,
    pub transport: Arc<dyn SignalingTransport>,
    pub config: Arc<EngineConfig>,
}

/// Outcome of the ringing period of an incoming invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvitationAnswer {
    Accepted,
    Rejected,
    Timeout,
    Canceled,
    RejectedBySystem,
    Deleted,
}

/// Media section of the peer's SDP, reduced to what negotiation needs.
#[derive(Debug, Clone)]
struct RemoteMedia {
    media: MediaDescription,
    host: String,
    port: u16,
    codecs: Vec<Codec>,
    orientation_extension_id: Option<u16>,
}

fn parse_remote_media(ctx: &WorkerContext, body: &str) -> RichcallResult<RemoteMedia> {
    let media_type = ctx.registry.service().media_type();
    let parsed = sdp::parse(body)?;
    let media = parsed
        .media_description(media_type)
        .ok_or_else(|| RichcallError::MalformedSdp(format!("no {} media description", media_type)))?
        .clone();
    let host = parsed
        .remote_host(&media)
        .ok_or_else(|| RichcallError::MalformedSdp("no connection address".to_string()))?
        .to_string();
    let codecs = if ctx.registry.service().negotiates_codecs() {
        sdp::extract_codecs(&parsed.media_descriptions(media_type))
    } else {
        Vec::new()
    };
    let orientation_extension_id = media.extension_map(VIDEO_ORIENTATION_URI).map(|e| e.id);

    Ok(RemoteMedia {
        port: media.port,
        media,
        host,
        codecs,
        orientation_extension_id,
    })
}

/// Session-Expires header value, saturated at the header's range.
fn expires_secs(expires: Duration) -> u32 {
    u32::try_from(expires.as_secs()).unwrap_or(u32::MAX)
}

fn initiation_failed(reason: impl std::fmt::Display) -> RichcallError {
    RichcallError::sharing(SharingErrorCode::SessionInitiationFailed, reason.to_string())
}

/// Spawn the worker for a received invitation.
pub fn spawn_incoming(
    ctx: WorkerContext,
    handle: Arc<SessionHandle>,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
    invite: InviteRequest,
) -> JoinHandle<()> {
    let worker = SessionWorker::new(ctx.clone(), handle.clone(), control_rx);
    supervise(ctx, handle, async move {
        let mut worker = worker;
        worker.run_incoming(invite).await
    })
}

/// Spawn the worker for an invitation we send.
pub fn spawn_outgoing(
    ctx: WorkerContext,
    handle: Arc<SessionHandle>,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
) -> JoinHandle<()> {
    let worker = SessionWorker::new(ctx.clone(), handle.clone(), control_rx);
    supervise(ctx, handle, async move {
        let mut worker = worker;
        worker.run_outgoing().await
    })
}

/// Run a worker on its own task and recover from whatever it returns.
fn supervise<F>(ctx: WorkerContext, handle: Arc<SessionHandle>, work: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = RichcallResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::spawn(work).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("Session {} error: {}", handle.id(), e);
                handle_error(&ctx, &handle, e.sharing_code()).await;
            }
            Err(join_error) if join_error.is_panic() => {
                tracing::error!("Session {} worker panicked", handle.id());
                handle_error(&ctx, &handle, SharingErrorCode::SessionInitiationFailed).await;
            }
            Err(_) => {
                tracing::debug!("Session {} worker cancelled", handle.id());
                handle_error(&ctx, &handle, SharingErrorCode::SessionInitiationFailed).await;
            }
        }
    })
}

/// End a session in FAILED. Ignored if it already ended.
async fn handle_error(ctx: &WorkerContext, handle: &Arc<SessionHandle>, code: SharingErrorCode) {
    if handle.state().is_terminal() {
        return;
    }
    tracing::info!("Session {} error: {}", handle.id(), code);

    let needs_bye = handle.with_dialog(|d| d.is_session_established() && !d.is_session_terminated());
    if needs_bye {
        if let Err(e) = ctx.transport.send_bye(&handle.call_id()).await {
            tracing::warn!("BYE for failed session {} not sent: {}", handle.id(), e);
        }
    }
    finish(ctx, handle, SessionState::Failed, ReasonCode::from(code), true);
}

/// Move a session to a terminal state, release it and notify listeners.
fn finish(ctx: &WorkerContext, handle: &Arc<SessionHandle>, state: SessionState, reason: ReasonCode, notify: bool) {
    let from = match handle.transition(state, reason) {
        Ok(from) => from,
        Err(e) => {
            tracing::debug!("Session {} not finished as {:?}: {}", handle.id(), state, e);
            return;
        }
    };
    tracing::debug!("State transition: {:?} -> {:?}", from, state);

    ctx.registry.remove(handle.id());
    if let Some(media) = handle.media() {
        media.close();
    }
    handle.with_dialog(|d| d.terminate());
    handle.cancellation().cancel();

    if let Err(e) = handle.persisted().set_state_and_reason_code(state, reason) {
        tracing::warn!("History not updated for {}: {}", handle.id(), e);
    }
    if notify {
        ctx.events.broadcast_state_changed(handle.service(), handle.contact(), handle.id(), state, reason);
    }
}

struct SessionWorker {
    ctx: WorkerContext,
    handle: Arc<SessionHandle>,
    control_rx: mpsc::UnboundedReceiver<SessionControl>,
    timer: Option<SessionTimer>,
}

impl SessionWorker {
    fn new(
        ctx: WorkerContext,
        handle: Arc<SessionHandle>,
        control_rx: mpsc::UnboundedReceiver<SessionControl>,
    ) -> Self {
        Self {
            ctx,
            handle,
            control_rx,
            timer: None,
        }
    }

    fn service_name(&self) -> String {
        self.handle.service().to_string()
    }

    /// Non-terminal transition with persistence and notification.
    fn advance(&self, state: SessionState) -> RichcallResult<()> {
        let from = self.handle.transition(state, ReasonCode::Unspecified)?;
        tracing::debug!("State transition: {:?} -> {:?}", from, state);
        if let Err(e) = self
            .handle
            .persisted()
            .set_state_and_reason_code(state, ReasonCode::Unspecified)
        {
            tracing::warn!("History not updated for {}: {}", self.handle.id(), e);
        }
        self.ctx.events.broadcast_state_changed(
            self.handle.service(),
            self.handle.contact(),
            self.handle.id(),
            state,
            ReasonCode::Unspecified,
        );
        Ok(())
    }

    fn finish(&mut self, state: SessionState, reason: ReasonCode, notify: bool) {
        self.timer = None;
        finish(&self.ctx, &self.handle, state, reason, notify);
    }

    fn dialog_ids(&self) -> (String, String) {
        self.handle
            .with_dialog(|d| (d.call_id().to_string(), d.local_tag().to_string()))
    }

    fn require_media(&self) -> RichcallResult<Arc<dyn MediaEndpoint>> {
        self.handle.media().ok_or_else(|| {
            RichcallError::sharing(
                SharingErrorCode::MediaPlayerNotInitialized,
                "no media endpoint attached to the session",
            )
        })
    }

    async fn send_status(&self, status: StatusCode) -> RichcallResult<()> {
        let (call_id, local_tag) = self.dialog_ids();
        self.ctx
            .transport
            .send_response(SignalingResponse::new(call_id, local_tag, status))
            .await
    }

    async fn send_bye(&self) {
        if let Err(e) = self.ctx.transport.send_bye(&self.handle.call_id()).await {
            tracing::warn!("BYE for session {} not sent: {}", self.handle.id(), e);
        }
    }

    /// A pending abort or delete request, checked before committing to a
    /// final response.
    fn pending_abort(&mut self) -> Option<TerminationReason> {
        while let Ok(control) = self.control_rx.try_recv() {
            match control {
                SessionControl::Abort(reason) => return Some(reason),
                SessionControl::Delete => return Some(TerminationReason::TerminationByUser),
                SessionControl::RemoteCancel => return Some(TerminationReason::TerminationByRemote),
                other => tracing::debug!("Ignoring {:?} before final response", other),
            }
        }
        None
    }

    // ---- incoming -------------------------------------------------------

    async fn run_incoming(&mut self, invite: InviteRequest) -> RichcallResult<()> {
        tracing::info!(
            "Initiate a new {} session as terminating: {}",
            self.service_name(),
            self.handle.id()
        );

        self.send_status(StatusCode::Ringing).await?;
        self.advance(SessionState::Invited)?;
        self.ctx.events.broadcast_invitation(
            self.handle.service(),
            self.handle.contact(),
            self.handle.id(),
            self.handle.content(),
        );

        let remote = parse_remote_media(&self.ctx, &invite.sdp)
            .map_err(|e| initiation_failed(format!("remote SDP rejected: {}", e)))?;

        match self.wait_invitation_answer().await {
            InvitationAnswer::Accepted => {}
            InvitationAnswer::Rejected => {
                tracing::debug!("Session has been rejected by user");
                self.send_status(StatusCode::Decline).await?;
                self.finish(
                    SessionState::Rejected,
                    ReasonCode::rejected(TerminationReason::TerminationByUser),
                    true,
                );
                return Ok(());
            }
            InvitationAnswer::Timeout => {
                tracing::debug!("Session has been rejected on timeout");
                self.send_status(StatusCode::BusyHere).await?;
                self.finish(
                    SessionState::Timeout,
                    ReasonCode::rejected(TerminationReason::TerminationByTimeout),
                    true,
                );
                return Ok(());
            }
            InvitationAnswer::Canceled => {
                tracing::debug!("Session has been canceled by remote");
                self.finish(
                    SessionState::Canceled,
                    ReasonCode::rejected(TerminationReason::TerminationByRemote),
                    true,
                );
                return Ok(());
            }
            InvitationAnswer::RejectedBySystem => {
                tracing::debug!("Session has been rejected by system");
                self.finish(SessionState::RejectedBySystem, ReasonCode::RejectedBySystem, false);
                return Ok(());
            }
            InvitationAnswer::Deleted => {
                tracing::debug!("Session has been deleted");
                self.send_status(StatusCode::Decline).await?;
                self.finish(SessionState::Deleted, ReasonCode::Unspecified, true);
                return Ok(());
            }
        }

        self.advance(SessionState::Accepted)?;
        self.negotiate_incoming(invite, remote).await
    }

    async fn wait_invitation_answer(&mut self) -> InvitationAnswer {
        let deadline = Instant::now() + self.ctx.config.ringing_timeout;
        loop {
            let control = match tokio::time::timeout_at(deadline, self.control_rx.recv()).await {
                Err(_) => return InvitationAnswer::Timeout,
                Ok(None) => return InvitationAnswer::RejectedBySystem,
                Ok(Some(control)) => control,
            };
            match control {
                SessionControl::Accept => return InvitationAnswer::Accepted,
                SessionControl::Reject | SessionControl::Abort(TerminationReason::TerminationByUser) => {
                    return InvitationAnswer::Rejected
                }
                SessionControl::RemoteCancel => return InvitationAnswer::Canceled,
                SessionControl::Abort(_) => return InvitationAnswer::RejectedBySystem,
                SessionControl::Delete => return InvitationAnswer::Deleted,
                other => tracing::debug!("Ignoring {:?} while ringing", other),
            }
        }
    }

    async fn negotiate_incoming(&mut self, invite: InviteRequest, remote: RemoteMedia) -> RichcallResult<()> {
        let media = self.require_media()?;
        let service = self.handle.service();

        let (media_sdp, codec) = if service.negotiates_codecs() {
            match sdp::select_codec(&media.supported_codecs(), &remote.codecs) {
                Some(codec) => (sdp::build_answer(&codec, media.local_port(), &remote.media), Some(codec)),
                None => {
                    tracing::debug!("Proposed codecs are not supported");
                    self.send_status(StatusCode::UnsupportedMediaType).await?;
                    return Err(RichcallError::sharing(
                        SharingErrorCode::UnsupportedMediaType,
                        "no proposed codec is supported",
                    ));
                }
            }
        } else {
            (sdp::build_passthrough_answer(media.local_port(), &remote.media), None)
        };

        let direction = match service {
            ServiceType::GenericSipRtp => MediaDirection::SendRecv,
            _ => MediaDirection::RecvOnly,
        };
        let local_sdp = sdp::build_session(&self.ctx.config.local_ip, &media_sdp, direction);
        self.handle.with_dialog(|d| d.set_local_content(local_sdp.clone()))?;

        if let Some(reason) = self.pending_abort() {
            tracing::debug!("Session has been interrupted before final response");
            self.send_status(StatusCode::Decline).await?;
            self.finish(SessionState::Aborted, ReasonCode::aborted(reason), true);
            return Ok(());
        }

        let (call_id, local_tag) = self.dialog_ids();
        let mut response = SignalingResponse::new(call_id, local_tag, StatusCode::Ok)
            .with_sdp(local_sdp)
            .with_feature_tags(service_feature_tags(service));
        let timer = match (self.ctx.config.session_timer_enabled, invite.session_expires) {
            (true, Some(expires)) => {
                let refresher = invite.refresher.unwrap_or(Refresher::Uac);
                let expires = Duration::from_secs(expires as u64).max(MIN_SESSION_EXPIRES);
                response = response.with_session_timer(expires_secs(expires), refresher);
                Some((TimerRole::as_uas(refresher), expires))
            }
            _ => None,
        };

        tracing::info!("Send 200 OK for session {}", self.handle.id());
        self.handle.with_dialog(|d| d.establish_signaling());
        self.advance(SessionState::Establishing)?;

        let acked = match tokio::time::timeout(
            self.ctx.config.ack_timeout,
            self.ctx.transport.send_final_and_await_ack(response),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => false,
        };
        if !acked {
            tracing::debug!("No ACK received for INVITE");
            return Err(RichcallError::sharing(
                SharingErrorCode::SendResponseFailed,
                "final response was not acknowledged",
            ));
        }

        tracing::info!("ACK request received");
        self.start_media_session(media, codec, &remote, timer)?;
        self.run_established().await
    }

    // ---- outgoing -------------------------------------------------------

    async fn run_outgoing(&mut self) -> RichcallResult<()> {
        tracing::info!(
            "Initiate a new {} session as originating: {}",
            self.service_name(),
            self.handle.id()
        );

        let media = self.require_media()?;
        let service = self.handle.service();
        let config = self.ctx.config.clone();

        let (media_sdp, direction) = if service.negotiates_codecs() {
            let orientation = match service {
                ServiceType::VideoSharing => config.video_orientation_extension_id,
                _ => None,
            };
            let direction = match service {
                ServiceType::GenericSipRtp => MediaDirection::SendRecv,
                _ => MediaDirection::SendOnly,
            };
            let offer = sdp::build_offer(
                service.media_type(),
                &media.supported_codecs(),
                media.local_port(),
                orientation,
            );
            (offer, direction)
        } else {
            let content = self.handle.content();
            let selector = format!(
                "name:\"{}\" type:{} size:{}",
                content.name, content.mime_type, content.size
            );
            let offer = sdp::build_message_offer(media.local_port(), &content.mime_type, Some(&selector));
            (offer, MediaDirection::SendOnly)
        };
        let local_sdp = sdp::build_session(&config.local_ip, &media_sdp, direction);
        self.handle.with_dialog(|d| d.set_local_content(local_sdp.clone()))?;

        let invite = self.handle.with_dialog(|d| InviteRequest {
            call_id: d.call_id().to_string(),
            from: d.local_party().to_string(),
            from_tag: d.local_tag().to_string(),
            to: d.remote_party().to_string(),
            service,
            content: self.handle.content().clone(),
            sdp: local_sdp,
            session_expires: config
                .session_timer_enabled
                .then(|| expires_secs(config.session_expires)),
            refresher: None,
            feature_tags: service_feature_tags(service),
        });

        let mut responses = self
            .ctx
            .transport
            .send_invite(invite)
            .await
            .map_err(|e| initiation_failed(format!("invitation not sent: {}", e)))?;

        let answer = match self.wait_final_response(&mut responses).await? {
            Some(answer) => answer,
            None => return Ok(()),
        };
        self.complete_outgoing(media, answer).await
    }

    /// Wait for the 200 OK. `None` means the session already ended.
    async fn wait_final_response(
        &mut self,
        responses: &mut mpsc::Receiver<InviteResponse>,
    ) -> RichcallResult<Option<InviteResponse>> {
        let deadline = Instant::now() + self.ctx.config.ringing_timeout;
        let call_id = self.handle.call_id();

        loop {
            tokio::select! {
                response = tokio::time::timeout_at(deadline, responses.recv()) => {
                    let response = match response {
                        Err(_) => {
                            tracing::debug!("No answer to invitation, cancel it");
                            if let Err(e) = self.ctx.transport.send_cancel(&call_id).await {
                                tracing::warn!("CANCEL not sent: {}", e);
                            }
                            self.finish(
                                SessionState::Timeout,
                                ReasonCode::rejected(TerminationReason::TerminationByTimeout),
                                true,
                            );
                            return Ok(None);
                        }
                        Ok(None) => {
                            return Err(initiation_failed("invitation ended without a final response"));
                        }
                        Ok(Some(response)) => response,
                    };

                    match response.status {
                        StatusCode::Ringing => {
                            if self.handle.state() == SessionState::Initiating {
                                self.advance(SessionState::Ringing)?;
                            }
                        }
                        StatusCode::Ok => return Ok(Some(response)),
                        StatusCode::BusyHere | StatusCode::Decline | StatusCode::RequestTerminated => {
                            tracing::debug!("Invitation rejected by remote: {}", response.status);
                            self.finish(
                                SessionState::Rejected,
                                ReasonCode::rejected(TerminationReason::TerminationByRemote),
                                true,
                            );
                            return Ok(None);
                        }
                        StatusCode::RequestTimeout => {
                            self.finish(
                                SessionState::Timeout,
                                ReasonCode::rejected(TerminationReason::TerminationByTimeout),
                                true,
                            );
                            return Ok(None);
                        }
                        StatusCode::UnsupportedMediaType => {
                            return Err(RichcallError::sharing(
                                SharingErrorCode::UnsupportedMediaType,
                                "remote does not support the offered media",
                            ));
                        }
                        status if status.is_provisional() => {
                            tracing::debug!("Provisional response {}", status);
                        }
                        status => {
                            return Err(initiation_failed(format!("unexpected response {}", status)));
                        }
                    }
                }
                control = self.control_rx.recv() => {
                    match control {
                        Some(SessionControl::Abort(reason)) => {
                            self.cancel_invitation(&call_id, ReasonCode::aborted(reason)).await;
                            return Ok(None);
                        }
                        Some(SessionControl::Delete) => {
                            self.cancel_invitation(&call_id, ReasonCode::AbortedByUser).await;
                            return Ok(None);
                        }
                        Some(other) => tracing::debug!("Ignoring {:?} while inviting", other),
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    async fn cancel_invitation(&mut self, call_id: &str, reason: ReasonCode) {
        if let Err(e) = self.ctx.transport.send_cancel(call_id).await {
            tracing::warn!("CANCEL not sent: {}", e);
        }
        self.finish(SessionState::Aborted, reason, true);
    }

    /// Acknowledge the 200 OK, then check its answer. The peer holds a
    /// confirmed dialog from here on, so every failure needs a BYE.
    async fn confirm_answer(
        &self,
        media: &Arc<dyn MediaEndpoint>,
        answer: &InviteResponse,
    ) -> RichcallResult<(Option<Codec>, RemoteMedia)> {
        self.ctx.transport.send_ack(&self.handle.call_id()).await?;

        let body = answer
            .sdp
            .clone()
            .ok_or_else(|| initiation_failed("200 OK without SDP answer"))?;
        self.handle.with_dialog(|d| -> RichcallResult<()> {
            if let Some(tag) = &answer.remote_tag {
                d.set_remote_tag(tag.clone());
            }
            d.set_remote_content(body.clone())?;
            d.establish_signaling();
            Ok(())
        })?;

        let remote = parse_remote_media(&self.ctx, &body)
            .map_err(|e| initiation_failed(format!("remote SDP rejected: {}", e)))?;
        let codec = if self.handle.service().negotiates_codecs() {
            let codec = sdp::select_codec(&media.supported_codecs(), &remote.codecs).ok_or_else(|| {
                RichcallError::sharing(
                    SharingErrorCode::UnsupportedMediaType,
                    "answer selected no supported codec",
                )
            })?;
            Some(codec)
        } else {
            None
        };
        Ok((codec, remote))
    }

    async fn complete_outgoing(&mut self, media: Arc<dyn MediaEndpoint>, answer: InviteResponse) -> RichcallResult<()> {
        let (codec, remote) = match self.confirm_answer(&media, &answer).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                tracing::debug!("Answer of session {} not usable, hang up", self.handle.id());
                self.send_bye().await;
                return Err(e);
            }
        };
        self.advance(SessionState::Establishing)?;

        let timer = match (self.ctx.config.session_timer_enabled, answer.session_expires) {
            (true, Some(expires)) => Some((
                TimerRole::as_uac(answer.refresher.unwrap_or(Refresher::Uac)),
                Duration::from_secs(expires as u64).max(MIN_SESSION_EXPIRES),
            )),
            _ => None,
        };
        self.start_media_session(media, codec, &remote, timer)?;
        self.run_established().await
    }

    // ---- established ----------------------------------------------------

    fn start_media_session(
        &mut self,
        media: Arc<dyn MediaEndpoint>,
        codec: Option<Codec>,
        remote: &RemoteMedia,
        timer: Option<(TimerRole, Duration)>,
    ) -> RichcallResult<()> {
        self.handle.with_dialog(|d| {
            d.establish_session();
            d.set_session_expires(timer.map(|(_, expires)| expires));
        });

        if let Some((role, expires)) = timer {
            self.timer = Some(SessionTimer::start(
                role,
                expires,
                self.handle.clone(),
                self.ctx.transport.clone(),
            ));
        }

        let info = RemoteMediaInfo {
            codec,
            host: remote.host.clone(),
            port: remote.port,
            orientation_extension_id: remote.orientation_extension_id,
        };
        media
            .set_remote_info(&info)
            .map_err(|e| initiation_failed(format!("failed to set remote info: {}", e)))?;
        media.open().map_err(initiation_failed)?;
        media.start().map_err(initiation_failed)?;

        self.advance(SessionState::Started)
    }

    async fn run_established(&mut self) -> RichcallResult<()> {
        while let Some(control) = self.control_rx.recv().await {
            match control {
                SessionControl::Abort(reason) => {
                    tracing::info!("Abort session {}: {}", self.handle.id(), reason);
                    self.send_bye().await;
                    self.finish(SessionState::Aborted, ReasonCode::aborted(reason), true);
                    return Ok(());
                }
                SessionControl::Delete => {
                    self.send_bye().await;
                    self.finish(
                        SessionState::Aborted,
                        ReasonCode::aborted(TerminationReason::TerminationByUser),
                        true,
                    );
                    return Ok(());
                }
                SessionControl::RemoteBye => {
                    tracing::info!("Session {} ended by remote", self.handle.id());
                    self.finish(
                        SessionState::Terminated,
                        ReasonCode::aborted(TerminationReason::TerminationByRemote),
                        true,
                    );
                    return Ok(());
                }
                SessionControl::TransferCompleted(result) => {
                    if let Err(e) = self.handle.persisted().set_transferred(&result) {
                        tracing::warn!("Transfer result not recorded for {}: {}", self.handle.id(), e);
                    }
                    self.send_bye().await;
                    self.finish(SessionState::Terminated, ReasonCode::Unspecified, true);
                    return Ok(());
                }
                SessionControl::RefreshReceived => {
                    if let Some(timer) = &self.timer {
                        timer.refreshed();
                    }
                }
                other => tracing::debug!("Ignoring {:?} on a started session", other),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("service", &self.registry.service())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expires_saturates() {
        assert_eq!(expires_secs(Duration::from_secs(1800)), 1800);
        assert_eq!(expires_secs(Duration::from_secs(u64::from(u32::MAX) + 1)), u32::MAX);
        assert_eq!(expires_secs(Duration::MAX), u32::MAX);
    }
}
