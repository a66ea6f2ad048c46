//! Session liveness monitor.
//!
//! Sends a heartbeat on a fixed interval. The server answers by touching
//! presence after checking the session token, so a heartbeat both keeps the
//! user online and detects a login from elsewhere.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use palaver_shared::protocol::{Action, HeartbeatAck};
use palaver_shared::ChatError;

use crate::api::{call, ChatApi};
use crate::config::LivenessSettings;
use crate::events::{NoticeKind, ViewEvent, ViewSink};
use crate::session::{end_for_auth_failure, StopHandle};
use crate::sync::PresenceSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Alive,
    /// The server rejected the session; the session has been stopped.
    Terminated,
    /// Transport or server failure; the session is kept.
    Failed,
}

#[derive(Debug, Default)]
struct LivenessState {
    consecutive_failures: u32,
    /// Warning currently on screen.
    warning: Option<NoticeKind>,
    retry_pending: bool,
}

pub struct SessionLivenessMonitor {
    api: Arc<dyn ChatApi>,
    view: Arc<dyn ViewSink>,
    presence: Arc<dyn PresenceSource>,
    stop: StopHandle,
    settings: LivenessSettings,
    state: Mutex<LivenessState>,
}

impl SessionLivenessMonitor {
    pub fn new(
        api: Arc<dyn ChatApi>,
        view: Arc<dyn ViewSink>,
        presence: Arc<dyn PresenceSource>,
        stop: StopHandle,
        settings: LivenessSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            view,
            presence,
            stop,
            settings,
            state: Mutex::new(LivenessState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, LivenessState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    pub async fn heartbeat(self: &Arc<Self>) -> HeartbeatOutcome {
        match call::<HeartbeatAck>(&*self.api, Action::Heartbeat).await {
            Ok(ack) => {
                debug!(server_time = %ack.server_time, "Heartbeat ok");
                self.on_success();
                HeartbeatOutcome::Alive
            }
            Err(e) if end_for_auth_failure(&self.stop, &*self.view, &e) => {
                HeartbeatOutcome::Terminated
            }
            Err(e) => {
                self.on_failure(&e);
                HeartbeatOutcome::Failed
            }
        }
    }

    fn on_success(&self) {
        let restored = {
            let mut state = self.state();
            state.consecutive_failures = 0;
            state.warning.take().is_some()
        };
        if restored {
            info!("Connectivity restored");
            self.view.emit(ViewEvent::notice(
                NoticeKind::ConnectivityRestored,
                "Connection restored",
            ));
        }
    }

    fn on_failure(self: &Arc<Self>, err: &ChatError) {
        let (failures, notice, schedule_retry) = {
            let mut state = self.state();
            state.consecutive_failures += 1;
            let level = if state.consecutive_failures >= self.settings.failure_threshold {
                NoticeKind::ConnectivityLost
            } else {
                NoticeKind::ConnectivityWarning
            };
            let notice = (state.warning != Some(level)).then_some(level);
            state.warning = Some(level);
            let schedule_retry = !state.retry_pending;
            state.retry_pending = true;
            (state.consecutive_failures, notice, schedule_retry)
        };

        warn!(failures, error = %err, "Heartbeat failed");
        match notice {
            Some(NoticeKind::ConnectivityLost) => self.view.emit(ViewEvent::notice(
                NoticeKind::ConnectivityLost,
                format!("Connection lost after {failures} failed heartbeats"),
            )),
            Some(kind) => self.view.emit(ViewEvent::notice(
                kind,
                "Connection problem, retrying",
            )),
            None => {}
        }

        if schedule_retry {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.retry_presence().await });
        }
    }

    async fn retry_presence(self: Arc<Self>) {
        tokio::select! {
            _ = self.stop.stopped() => return,
            _ = sleep(self.settings.presence_retry_delay) => {}
        }
        self.state().retry_pending = false;
        if let Err(e) = self.presence.refresh_presence().await {
            if !end_for_auth_failure(&self.stop, &*self.view, &e) {
                debug!(error = %e, "Presence retry failed");
            }
        }
    }

    fn went_offline(&self) {
        let show = {
            let mut state = self.state();
            let show = state.warning.is_none();
            if show {
                state.warning = Some(NoticeKind::ConnectivityWarning);
            }
            show
        };
        warn!("Network went offline");
        if show {
            self.view.emit(ViewEvent::notice(
                NoticeKind::ConnectivityWarning,
                "You are offline",
            ));
        }
    }

    /// Heartbeat until the session stops, reacting to connectivity changes
    /// reported on `online`.
    pub async fn run(self: Arc<Self>, mut online: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = ticker.tick() => {
                    self.heartbeat().await;
                }
                changed = online.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let is_online = *online.borrow_and_update();
                    if !is_online {
                        self.went_offline();
                        continue;
                    }
                    info!("Network back online");
                    if self.heartbeat().await == HeartbeatOutcome::Alive {
                        if let Err(e) = self.presence.refresh_presence().await {
                            end_for_auth_failure(&self.stop, &*self.view, &e);
                        }
                    }
                    ticker.reset();
                }
            }
        }
        debug!("Liveness monitor stopped");
    }
}
