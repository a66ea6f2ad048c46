//! Inactivity guard.
//!
//! Logs the user out after a period without interaction. Several tabs of
//! the same login share an [`ActivityChannel`]; a tab whose own countdown
//! runs out defers to a sibling that saw activity more recently.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use palaver_shared::protocol::{Action, Empty};

use crate::activity::{ActivityChannel, ActivityRecord};
use crate::api::{call, ChatApi};
use crate::config::InactivitySettings;
use crate::events::{NoticeKind, RedirectTarget, ViewEvent, ViewSink};
use crate::session::{StopHandle, StopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interaction {
    Pointer,
    Key,
    Scroll,
    Touch,
    Input,
    VisibilityRegained,
}

pub struct InactivityGuard {
    tab_id: Uuid,
    channel: Arc<dyn ActivityChannel>,
    settings: InactivitySettings,
    deadline: Mutex<Instant>,
    reset: Notify,
    api: Arc<dyn ChatApi>,
    view: Arc<dyn ViewSink>,
    stop: StopHandle,
}

impl InactivityGuard {
    pub fn new(
        channel: Arc<dyn ActivityChannel>,
        settings: InactivitySettings,
        api: Arc<dyn ChatApi>,
        view: Arc<dyn ViewSink>,
        stop: StopHandle,
    ) -> Arc<Self> {
        Arc::new(Self {
            tab_id: Uuid::new_v4(),
            channel,
            settings,
            deadline: Mutex::new(Instant::now() + settings.threshold),
            reset: Notify::new(),
            api,
            view,
            stop,
        })
    }

    pub fn tab_id(&self) -> Uuid {
        self.tab_id
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn extend_to(&self, at: Instant) {
        let mut deadline = self.deadline.lock().unwrap_or_else(|p| p.into_inner());
        if at > *deadline {
            *deadline = at;
        }
    }

    /// Restart the countdown and tell sibling tabs.
    pub fn record(&self, kind: Interaction) {
        if self.stop.is_stopped() {
            return;
        }
        let now = Instant::now();
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner()) = now + self.settings.threshold;
        self.channel.publish(ActivityRecord {
            tab_id: self.tab_id,
            at: now,
        });
        self.reset.notify_one();
        trace!(kind = ?kind, "Activity");
    }

    /// Deadline of a sibling tab that was active within the threshold.
    fn sibling_deadline(&self, now: Instant) -> Option<Instant> {
        self.channel
            .latest()
            .filter(|r| r.tab_id != self.tab_id)
            .filter(|r| now.saturating_duration_since(r.at) < self.settings.threshold)
            .map(|r| r.at + self.settings.threshold)
    }

    pub async fn run(self: Arc<Self>) {
        let mut siblings = self.channel.subscribe();
        let mut listening = true;

        loop {
            let deadline = self.deadline();
            tokio::select! {
                _ = self.stop.stopped() => return,
                _ = self.reset.notified() => {}
                record = siblings.recv(), if listening => match record {
                    Ok(r) if r.tab_id != self.tab_id => self.extend_to(r.at + self.settings.threshold),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => listening = false,
                },
                _ = sleep_until(deadline) => {
                    let now = Instant::now();
                    if self.deadline() > now {
                        continue;
                    }
                    if let Some(later) = self.sibling_deadline(now) {
                        debug!(tab = %self.tab_id, "Another tab is active, deferring logout");
                        self.extend_to(later);
                        continue;
                    }
                    self.expire().await;
                    return;
                }
            }
        }
    }

    async fn expire(&self) {
        if !self.stop.stop(StopReason::Inactivity) {
            return;
        }
        info!(tab = %self.tab_id, "Logged out for inactivity");
        self.view.emit(ViewEvent::notice(
            NoticeKind::Inactivity,
            "You have been logged out due to inactivity",
        ));

        sleep(self.settings.redirect_delay).await;

        let reason = StopReason::Inactivity.as_str().to_string();
        if let Err(e) = call::<Empty>(&*self.api, Action::Logout { reason: Some(reason) }).await {
            warn!(error = %e, "Logout request failed");
        }
        self.view.emit(ViewEvent::redirect(
            RedirectTarget::Logout,
            StopReason::Inactivity.as_str(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::SharedActivityBoard;
    use crate::testing::{FakeApi, RecordingView};
    use std::time::Duration;

    struct Tab {
        guard: Arc<InactivityGuard>,
        stop: StopHandle,
        view: Arc<RecordingView>,
    }

    fn open_tab(board: &Arc<SharedActivityBoard>, api: &Arc<FakeApi>) -> Tab {
        let stop = StopHandle::new();
        let view = Arc::new(RecordingView::default());
        let guard = InactivityGuard::new(
            board.clone(),
            InactivitySettings::default(),
            api.clone(),
            view.clone(),
            stop.clone(),
        );
        tokio::spawn(guard.clone().run());
        Tab { guard, stop, view }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_tab_expires_after_threshold() {
        let board = Arc::new(SharedActivityBoard::new());
        let api = FakeApi::new();
        let tab = open_tab(&board, &api);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(!tab.stop.is_stopped());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(tab.stop.reason(), Some(StopReason::Inactivity));
        assert_eq!(tab.view.notices(NoticeKind::Inactivity), 1);
        assert!(tab.view.redirects().is_empty());
        assert_eq!(api.count("logout"), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(api.count("logout"), 1);
        assert!(api.calls().contains(&Action::Logout {
            reason: Some("inactivity".into())
        }));
        assert_eq!(
            tab.view.redirects(),
            vec![(RedirectTarget::Logout, "inactivity".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_resets_countdown() {
        let board = Arc::new(SharedActivityBoard::new());
        let api = FakeApi::new();
        let tab = open_tab(&board, &api);

        tokio::time::sleep(Duration::from_secs(250)).await;
        tab.guard.record(Interaction::Key);
        tokio::time::sleep(Duration::from_secs(250)).await;
        assert!(!tab.stop.is_stopped());

        tokio::time::sleep(Duration::from_secs(51)).await;
        assert!(tab.stop.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sibling_tab_activity_defers_logout() {
        let board = Arc::new(SharedActivityBoard::new());
        let api = FakeApi::new();
        let a = open_tab(&board, &api);
        let b = open_tab(&board, &api);

        a.guard.record(Interaction::Pointer);
        tokio::time::sleep(Duration::from_secs(200)).await;
        b.guard.record(Interaction::Key);

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!a.stop.is_stopped(), "tab A must defer to tab B");
        assert!(!b.stop.is_stopped());

        tokio::time::sleep(Duration::from_secs(151)).await;
        assert_eq!(a.stop.reason(), Some(StopReason::Inactivity));
        assert_eq!(b.stop.reason(), Some(StopReason::Inactivity));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            a.view.redirects(),
            vec![(RedirectTarget::Logout, "inactivity".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_sibling_does_not_defer() {
        let board = Arc::new(SharedActivityBoard::new());
        let api = FakeApi::new();
        let tab = open_tab(&board, &api);

        // A sibling that was last active before this tab opened.
        board.publish(ActivityRecord {
            tab_id: Uuid::new_v4(),
            at: Instant::now() - Duration::from_secs(10),
        });

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(tab.stop.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_activity_recorded_after_stop() {
        let board = Arc::new(SharedActivityBoard::new());
        let api = FakeApi::new();
        let tab = open_tab(&board, &api);

        tab.stop.stop(StopReason::Logout);
        tab.guard.record(Interaction::Touch);
        assert!(board.latest().is_none());
    }
}
