//! Demo driver: runs one incoming and one outgoing video share against an
//! in-process peer, then queries the peer's capabilities and shuts down.
//!
//! Usage: `richcall-engine [config.json]`. Set `RUST_LOG` to adjust logging.

use std::sync::Arc;

use async_trait::async_trait;
use richcall_core::capability::{TAG_IMAGE_SHARE, TAG_VIDEO_SHARE};
use richcall_core::sdp::{self, MediaDirection};
use richcall_core::{
    Codec, Content, InviteRequest, InviteResponse, RichcallError, RichcallResult, ServiceType,
    SessionState, SignalingResponse, StatusCode,
};
use richcall_engine::{
    ChannelListener, EngineConfig, InMemoryHistory, MediaEndpoint, RemoteMediaInfo, SharingEngine,
    SharingEvent, SignalingTransport,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const PEER: &str = "tel:+15550100";
const PEER_IP: &str = "198.51.100.7";

/// Peer that rings, then accepts every invitation with its first codec.
struct LoopbackTransport;

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send_response(&self, response: SignalingResponse) -> RichcallResult<()> {
        tracing::info!("--> {} ({})", response.status, response.call_id);
        Ok(())
    }

    async fn send_final_and_await_ack(&self, response: SignalingResponse) -> RichcallResult<bool> {
        tracing::info!("--> {} with answer, peer acknowledges", response.status);
        Ok(true)
    }

    async fn send_invite(&self, invite: InviteRequest) -> RichcallResult<mpsc::Receiver<InviteResponse>> {
        tracing::info!("--> INVITE {} to {}", invite.call_id, invite.to);
        let offer = sdp::parse(&invite.sdp)?;
        let media = offer
            .media_description(invite.service.media_type())
            .ok_or_else(|| RichcallError::MalformedSdp("offer has no usable media".to_string()))?;
        let codec = media
            .codecs()
            .into_iter()
            .next()
            .ok_or_else(|| RichcallError::MalformedSdp("offer has no codec".to_string()))?;
        let answer = sdp::build_session(
            PEER_IP,
            &sdp::build_answer(&codec, 42000, media),
            MediaDirection::RecvOnly,
        );

        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            let responses = [
                InviteResponse::new(StatusCode::Ringing),
                InviteResponse::new(StatusCode::Ok).with_sdp("peer-tag", answer),
            ];
            for response in responses {
                if tx.send(response).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn send_ack(&self, call_id: &str) -> RichcallResult<()> {
        tracing::info!("--> ACK ({})", call_id);
        Ok(())
    }

    async fn send_cancel(&self, call_id: &str) -> RichcallResult<()> {
        tracing::info!("--> CANCEL ({})", call_id);
        Ok(())
    }

    async fn send_bye(&self, call_id: &str) -> RichcallResult<()> {
        tracing::info!("--> BYE ({})", call_id);
        Ok(())
    }

    async fn send_session_refresh(&self, call_id: &str) -> RichcallResult<()> {
        tracing::info!("--> session refresh ({})", call_id);
        Ok(())
    }

    async fn query_capabilities(&self, contact: &str, _feature_tags: &[String]) -> RichcallResult<Vec<String>> {
        tracing::info!("--> OPTIONS {}", contact);
        Ok(vec![TAG_IMAGE_SHARE.to_string(), TAG_VIDEO_SHARE.to_string()])
    }
}

/// Player that only logs what it is told.
struct LoggingPlayer {
    port: u16,
}

impl MediaEndpoint for LoggingPlayer {
    fn supported_codecs(&self) -> Vec<Codec> {
        vec![Codec::h264(), Codec::h263()]
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    fn set_remote_info(&self, info: &RemoteMediaInfo) -> RichcallResult<()> {
        let codec = info
            .codec
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        tracing::info!("Player {} streams {} to {}:{}", self.port, codec, info.host, info.port);
        Ok(())
    }
}

fn load_config() -> RichcallResult<EngineConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| RichcallError::Validation(format!("cannot read {}: {}", path, e)))?;
            EngineConfig::from_json_str(&json)
        }
        None => Ok(EngineConfig::with_identity("sip:alice@example.com", "192.0.2.1")),
    }
}

/// Log events until `session_id` reaches `target`.
async fn wait_for_state(
    events: &mut mpsc::UnboundedReceiver<SharingEvent>,
    session_id: &str,
    target: SessionState,
) -> RichcallResult<()> {
    while let Some(event) = events.recv().await {
        tracing::info!("<-- event {}", serde_json::to_string(&event)?);
        if let SharingEvent::StateChanged { session_id: id, state, .. } = &event {
            if id == session_id && *state == target {
                return Ok(());
            }
        }
    }
    Err(RichcallError::Protocol("event stream closed".to_string()))
}

#[tokio::main]
async fn main() -> RichcallResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config()?;
    let local_ip = config.local_ip.clone();
    tracing::info!("richcall-engine {} as {}", richcall_core::VERSION, config.local_identity);

    let engine = SharingEngine::new(config, Arc::new(LoopbackTransport), Arc::new(InMemoryHistory::new()));
    let (listener, mut events) = ChannelListener::<SharingEvent>::new();
    engine.add_listener(ServiceType::VideoSharing, listener, None);

    // Incoming: the peer offers H.264 and H.263.
    let offer = sdp::build_session(
        PEER_IP,
        &sdp::build_offer("video", &[Codec::h264(), Codec::h263()], 40000, Some(7)),
        MediaDirection::SendOnly,
    );
    let invite = InviteRequest {
        call_id: uuid::Uuid::new_v4().to_string(),
        from: PEER.to_string(),
        from_tag: richcall_core::dialog::generate_tag(),
        to: format!("sip:alice@{}", local_ip),
        service: ServiceType::VideoSharing,
        content: Content::live_video(),
        sdp: offer,
        session_expires: None,
        refresher: None,
        feature_tags: vec![TAG_VIDEO_SHARE.to_string()],
    };
    let incoming = engine.on_invite(invite)?;
    wait_for_state(&mut events, &incoming, SessionState::Invited).await?;
    engine.set_media_endpoint(&incoming, Arc::new(LoggingPlayer { port: 50000 }))?;
    engine.accept_invitation(&incoming)?;
    wait_for_state(&mut events, &incoming, SessionState::Started).await?;

    // Outgoing.
    let outgoing = engine.share_outgoing(
        ServiceType::VideoSharing,
        PEER,
        Content::live_video(),
        Arc::new(LoggingPlayer { port: 50002 }),
    )?;
    wait_for_state(&mut events, &outgoing, SessionState::Started).await?;

    if let Some(query) = engine.request_capabilities(PEER) {
        if let Err(e) = query.await {
            tracing::warn!("Capability query task failed: {}", e);
        }
    }
    if let Some(caps) = engine.capabilities().contact_capabilities(PEER) {
        tracing::info!("Capabilities of {}: {}", PEER, serde_json::to_string(&caps)?);
    }

    for session in engine.list_sessions() {
        tracing::info!("Live session {}", serde_json::to_string(&session)?);
    }

    engine.shutdown().await;
    while let Ok(event) = events.try_recv() {
        tracing::info!("<-- event {}", serde_json::to_string(&event)?);
    }
    Ok(())
}
