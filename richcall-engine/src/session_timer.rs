//! RFC 4028 session keep-alive.
//!
//! The refresher sends a refresh every half interval. The other side expects
//! one before the interval runs out, less a safety margin of
//! `min(32s, interval / 3)`. A failed refresh or a missed one aborts the
//! session through its control channel, the same path as a local abort.

use std::sync::Arc;
use std::time::Duration;

use richcall_core::{Refresher, TerminationReason};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::session::SessionHandle;
use crate::transport::SignalingTransport;

/// Which side of the dialog sends refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerRole {
    /// We send refreshes.
    Refresher,
    /// The peer sends refreshes; we watch for them.
    Refreshee,
}

impl TimerRole {
    /// Role for the UAS (we answered the invitation).
    pub fn as_uas(refresher: Refresher) -> Self {
        match refresher {
            Refresher::Uas => Self::Refresher,
            Refresher::Uac => Self::Refreshee,
        }
    }

    /// Role for the UAC (we sent the invitation).
    pub fn as_uac(refresher: Refresher) -> Self {
        match refresher {
            Refresher::Uac => Self::Refresher,
            Refresher::Uas => Self::Refreshee,
        }
    }
}

/// Interval after which a refreshee gives up on the session.
pub fn expiry_deadline(expires: Duration) -> Duration {
    expires - (expires / 3).min(Duration::from_secs(32))
}

/// Running keep-alive for one session. Stops when dropped.
pub struct SessionTimer {
    refreshed: Arc<Notify>,
    cancel: CancellationToken,
}

impl SessionTimer {
    pub fn start(
        role: TimerRole,
        expires: Duration,
        session: Arc<SessionHandle>,
        transport: Arc<dyn SignalingTransport>,
    ) -> Self {
        let refreshed = Arc::new(Notify::new());
        let cancel = session.cancellation().child_token();
        tracing::debug!(
            "Start session timer for {} as {:?}, expires in {:?}",
            session.id(),
            role,
            expires
        );

        match role {
            TimerRole::Refresher => tokio::spawn(run_refresher(expires, session, transport, cancel.clone())),
            TimerRole::Refreshee => tokio::spawn(run_refreshee(expires, session, refreshed.clone(), cancel.clone())),
        };

        Self { refreshed, cancel }
    }

    /// The peer refreshed the session; restart the expiry countdown.
    pub fn refreshed(&self) {
        self.refreshed.notify_one();
    }

}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_refresher(
    expires: Duration,
    session: Arc<SessionHandle>,
    transport: Arc<dyn SignalingTransport>,
    cancel: CancellationToken,
) {
    let call_id = session.call_id();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(expires / 2) => {}
        }
        tracing::debug!("Refresh session {}", session.id());
        if let Err(e) = transport.send_session_refresh(&call_id).await {
            tracing::warn!("Session refresh failed for {}: {}", session.id(), e);
            session.abort(TerminationReason::TerminationBySystem);
            return;
        }
    }
}

async fn run_refreshee(
    expires: Duration,
    session: Arc<SessionHandle>,
    refreshed: Arc<Notify>,
    cancel: CancellationToken,
) {
    let deadline = expiry_deadline(expires);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = refreshed.notified() => continue,
            _ = tokio::time::sleep(deadline) => {
                tracing::info!("Session {} expired without refresh", session.id());
                session.abort(TerminationReason::TerminationBySystem);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionControl;
    use crate::test_support::{new_handle, MockTransport};
    use richcall_core::ServiceType;

    #[test]
    fn roles_by_side() {
        assert_eq!(TimerRole::as_uas(Refresher::Uas), TimerRole::Refresher);
        assert_eq!(TimerRole::as_uas(Refresher::Uac), TimerRole::Refreshee);
        assert_eq!(TimerRole::as_uac(Refresher::Uac), TimerRole::Refresher);
    }

    #[test]
    fn expiry_margin() {
        assert_eq!(expiry_deadline(Duration::from_secs(90)), Duration::from_secs(60));
        assert_eq!(expiry_deadline(Duration::from_secs(1800)), Duration::from_secs(1768));
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_sends_at_half_interval() {
        let (session, _rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        let transport = MockTransport::new();
        let timer = SessionTimer::start(
            TimerRole::Refresher,
            Duration::from_secs(90),
            session.clone(),
            transport.clone(),
        );

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(transport.refresh_count(), 2);
        drop(timer);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(transport.refresh_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_aborts_session() {
        let (session, mut rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        let transport = MockTransport::new();
        transport.fail_refresh();
        let _timer = SessionTimer::start(
            TimerRole::Refresher,
            Duration::from_secs(90),
            session.clone(),
            transport.clone(),
        );

        assert_eq!(
            rx.recv().await,
            Some(SessionControl::Abort(TerminationReason::TerminationBySystem))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refreshee_expires_without_refresh() {
        let (session, mut rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        let timer = SessionTimer::start(
            TimerRole::Refreshee,
            Duration::from_secs(90),
            session.clone(),
            MockTransport::new(),
        );

        tokio::time::sleep(Duration::from_secs(50)).await;
        timer.refreshed();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(rx.try_recv().is_err());

        assert_eq!(
            rx.recv().await,
            Some(SessionControl::Abort(TerminationReason::TerminationBySystem))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_timer_stops() {
        let (session, mut rx) = new_handle("s1", "tel:+1", ServiceType::VideoSharing);
        let timer = SessionTimer::start(
            TimerRole::Refreshee,
            Duration::from_secs(90),
            session.clone(),
            MockTransport::new(),
        );
        drop(timer);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(rx.try_recv().is_err());
    }
}
