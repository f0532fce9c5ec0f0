//! Test doubles shared by the module tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use richcall_core::sdp::{self, MediaDirection};
use richcall_core::{
    Codec, Content, DialogPath, Direction, InviteRequest, InviteResponse, RichcallError, RichcallResult,
    ServiceType, SignalingResponse,
};
use tokio::sync::{mpsc, Notify};

use crate::broadcaster::{EventListener, ListenerError, SharingEvent};
use crate::history::{InMemoryHistory, PersistedSharing};
use crate::media::{MediaEndpoint, RemoteMediaInfo};
use crate::session::{SessionControl, SessionHandle};
use crate::transport::SignalingTransport;

pub fn new_handle(
    id: &str,
    contact: &str,
    service: ServiceType,
) -> (Arc<SessionHandle>, mpsc::UnboundedReceiver<SessionControl>) {
    SessionHandle::new(
        id,
        service,
        Direction::Outgoing,
        Content::live_video(),
        DialogPath::originating("sip:me@test", contact),
        PersistedSharing::new(id, Arc::new(InMemoryHistory::new())),
    )
}

/// How the transport answers `send_final_and_await_ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckBehavior {
    Ack,
    NoAck,
    /// Never returns; exercises the engine's own ACK timeout.
    Hang,
}

/// Transport recording everything the engine sends.
pub struct MockTransport {
    responses: Mutex<Vec<SignalingResponse>>,
    invites: Mutex<Vec<InviteRequest>>,
    acks: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
    byes: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
    fail_refresh: AtomicBool,
    ack: Mutex<AckBehavior>,
    scripted: Mutex<Vec<InviteResponse>>,
    invite_senders: Mutex<Vec<mpsc::Sender<InviteResponse>>>,
    capability_answer: Mutex<Vec<String>>,
    capability_queries: AtomicUsize,
    fail_capability: AtomicBool,
    changed: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(Vec::new()),
            invites: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            byes: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            ack: Mutex::new(AckBehavior::Ack),
            scripted: Mutex::new(Vec::new()),
            invite_senders: Mutex::new(Vec::new()),
            capability_answer: Mutex::new(Vec::new()),
            capability_queries: AtomicUsize::new(0),
            fail_capability: AtomicBool::new(false),
            changed: Notify::new(),
        })
    }

    pub fn set_ack(&self, behavior: AckBehavior) {
        *self.ack.lock() = behavior;
    }

    /// Responses delivered as soon as the next invitation is sent.
    pub fn script_invite_responses(&self, responses: Vec<InviteResponse>) {
        *self.scripted.lock() = responses;
    }

    pub fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn set_capability_answer(&self, tags: Vec<String>) {
        *self.capability_answer.lock() = tags;
    }

    pub fn fail_capability_queries(&self) {
        self.fail_capability.store(true, Ordering::SeqCst);
    }

    pub fn capability_queries(&self) -> usize {
        self.capability_queries.load(Ordering::SeqCst)
    }

    pub fn responses(&self) -> Vec<SignalingResponse> {
        self.responses.lock().clone()
    }

    pub fn statuses(&self) -> Vec<u16> {
        self.responses.lock().iter().map(|r| r.status.code()).collect()
    }

    pub fn invites(&self) -> Vec<InviteRequest> {
        self.invites.lock().clone()
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    pub fn byes(&self) -> Vec<String> {
        self.byes.lock().clone()
    }

    /// Wait until `check` holds, re-evaluated on every recorded message.
    pub async fn wait_for(&self, check: impl Fn(&Self) -> bool) {
        let wait = async {
            loop {
                let changed = self.changed.notified();
                if check(self) {
                    return;
                }
                changed.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("transport condition not reached");
    }

    fn record<T>(&self, list: &Mutex<Vec<T>>, item: T) {
        list.lock().push(item);
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn send_response(&self, response: SignalingResponse) -> RichcallResult<()> {
        self.record(&self.responses, response);
        Ok(())
    }

    async fn send_final_and_await_ack(&self, response: SignalingResponse) -> RichcallResult<bool> {
        self.record(&self.responses, response);
        let behavior = *self.ack.lock();
        match behavior {
            AckBehavior::Ack => Ok(true),
            AckBehavior::NoAck => Ok(false),
            AckBehavior::Hang => std::future::pending().await,
        }
    }

    async fn send_invite(&self, invite: InviteRequest) -> RichcallResult<mpsc::Receiver<InviteResponse>> {
        self.record(&self.invites, invite);
        let (tx, rx) = mpsc::channel(16);
        let scripted: Vec<InviteResponse> = self.scripted.lock().drain(..).collect();
        for response in scripted {
            tx.try_send(response)
                .map_err(|e| RichcallError::Transport(e.to_string()))?;
        }
        // Keep the transaction open until the test ends.
        self.invite_senders.lock().push(tx);
        Ok(rx)
    }

    async fn send_ack(&self, call_id: &str) -> RichcallResult<()> {
        self.record(&self.acks, call_id.to_string());
        Ok(())
    }

    async fn send_cancel(&self, call_id: &str) -> RichcallResult<()> {
        self.record(&self.cancels, call_id.to_string());
        Ok(())
    }

    async fn send_bye(&self, call_id: &str) -> RichcallResult<()> {
        self.record(&self.byes, call_id.to_string());
        Ok(())
    }

    async fn send_session_refresh(&self, _call_id: &str) -> RichcallResult<()> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(RichcallError::Transport("refresh rejected".to_string()));
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_capabilities(&self, _contact: &str, _feature_tags: &[String]) -> RichcallResult<Vec<String>> {
        self.capability_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_capability.load(Ordering::SeqCst) {
            return Err(RichcallError::Transport("no response".to_string()));
        }
        Ok(self.capability_answer.lock().clone())
    }
}

/// Media player recording what the engine wires into it.
pub struct MockPlayer {
    codecs: Vec<Codec>,
    port: u16,
    panic_on_remote_info: bool,
    remote: Mutex<Option<RemoteMediaInfo>>,
    started: AtomicBool,
    closed: AtomicBool,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl MockPlayer {
    pub fn new(codecs: Vec<Codec>) -> Arc<Self> {
        Self::build(codecs, false)
    }

    /// Player whose `set_remote_info` panics.
    pub fn faulty(codecs: Vec<Codec>) -> Arc<Self> {
        Self::build(codecs, true)
    }

    fn build(codecs: Vec<Codec>, panic_on_remote_info: bool) -> Arc<Self> {
        Arc::new(Self {
            codecs,
            port: 50000,
            panic_on_remote_info,
            remote: Mutex::new(None),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub fn remote_info(&self) -> Option<RemoteMediaInfo> {
        self.remote.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }
}

impl MediaEndpoint for MockPlayer {
    fn supported_codecs(&self) -> Vec<Codec> {
        self.codecs.clone()
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    fn set_remote_info(&self, info: &RemoteMediaInfo) -> RichcallResult<()> {
        if self.panic_on_remote_info {
            panic!("player crashed");
        }
        *self.remote.lock() = Some(info.clone());
        Ok(())
    }

    fn start(&self) -> RichcallResult<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn send_payload(&self, payload: &[u8]) -> RichcallResult<()> {
        self.payloads.lock().push(payload.to_vec());
        Ok(())
    }
}

/// Listener keeping every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<SharingEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SharingEvent> {
        self.events.lock().clone()
    }
}

impl EventListener<SharingEvent> for RecordingListener {
    fn on_event(&self, event: &SharingEvent) -> Result<(), ListenerError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// SDP offer of a peer at 10.0.0.5:40000 proposing `codecs` in order.
pub fn video_offer(codecs: &[Codec], orientation_extension_id: Option<u16>) -> String {
    let media = sdp::build_offer("video", codecs, 40000, orientation_extension_id);
    sdp::build_session("10.0.0.5", &media, MediaDirection::SendOnly)
}

pub fn invite(service: ServiceType, from: &str, body: String) -> InviteRequest {
    InviteRequest {
        call_id: uuid::Uuid::new_v4().to_string(),
        from: from.to_string(),
        from_tag: "remote-tag".to_string(),
        to: "sip:me@test".to_string(),
        service,
        content: Content::live_video(),
        sdp: body,
        session_expires: None,
        refresher: None,
        feature_tags: Vec::new(),
    }
}
