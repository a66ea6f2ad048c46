//! The client session: one login, its background tasks and its stop signal.
//!
//! [`ClientSession`] owns the API handle, the view sink and the shared view
//! state, and hands each component only the slices it uses. All components
//! watch the same [`StopHandle`]; whichever stops it first decides why the
//! session ended.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use palaver_shared::protocol::{Action, Empty};
use palaver_shared::{ChatError, Handle, MessageBody};

use crate::activity::ActivityChannel;
use crate::api::{call, ChatApi};
use crate::config::ClientConfig;
use crate::events::{RedirectTarget, ViewEvent, ViewSink};
use crate::inactivity::{InactivityGuard, Interaction};
use crate::liveness::SessionLivenessMonitor;
use crate::state::{lock, ClientViewState, SharedViewState};
use crate::sync::PollingSyncEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Logout,
    Inactivity,
    SessionSuperseded,
    Unauthenticated,
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Logout => "user",
            StopReason::Inactivity => "inactivity",
            StopReason::SessionSuperseded => "session_superseded",
            StopReason::Unauthenticated => "unauthenticated",
            StopReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stop signal shared by every task of a session. Only the first stop
/// counts.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` if this call stopped the session.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the session is stopped.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return self.reason().unwrap_or(StopReason::Shutdown);
            }
        }
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// End the session if `err` means the credential is no longer valid.
///
/// Returns whether `err` was an authentication failure. The redirect to
/// the login view is emitted only by the call that actually stopped the
/// session.
pub fn end_for_auth_failure(stop: &StopHandle, view: &dyn ViewSink, err: &ChatError) -> bool {
    let reason = match err {
        ChatError::SessionSuperseded => StopReason::SessionSuperseded,
        ChatError::Unauthenticated(_) => StopReason::Unauthenticated,
        _ => return false,
    };
    if stop.stop(reason) {
        warn!(reason = %reason, "Session ended by server");
        view.emit(ViewEvent::redirect(RedirectTarget::Login, reason.as_str()));
    }
    true
}

pub struct ClientSession {
    handle: Handle,
    api: Arc<dyn ChatApi>,
    view: Arc<dyn ViewSink>,
    state: SharedViewState,
    stop: StopHandle,
    sync: Arc<PollingSyncEngine>,
    guard: Arc<InactivityGuard>,
    online: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientSession {
    /// Start every background task of a logged-in session.
    pub fn start(
        handle: Handle,
        api: Arc<dyn ChatApi>,
        view: Arc<dyn ViewSink>,
        activity: Arc<dyn ActivityChannel>,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let state = ClientViewState::shared();
        let stop = StopHandle::new();
        let (online, online_rx) = watch::channel(true);

        let sync = PollingSyncEngine::new(
            handle.clone(),
            api.clone(),
            view.clone(),
            state.clone(),
            stop.clone(),
            config.sync,
        );
        let liveness = SessionLivenessMonitor::new(
            api.clone(),
            view.clone(),
            sync.clone(),
            stop.clone(),
            config.liveness,
        );
        let guard = InactivityGuard::new(
            activity,
            config.inactivity,
            api.clone(),
            view.clone(),
            stop.clone(),
        );

        let mut tasks = sync.spawn();
        tasks.push(tokio::spawn(liveness.run(online_rx)));
        tasks.push(tokio::spawn(guard.clone().run()));

        info!(handle = %handle, tasks = tasks.len(), "Session started");

        Arc::new(Self {
            handle,
            api,
            view,
            state,
            stop,
            sync,
            guard,
            online,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn stop_handle(&self) -> &StopHandle {
        &self.stop
    }

    /// A user interaction in this tab.
    pub fn interaction(&self, kind: Interaction) {
        self.guard.record(kind);
    }

    /// Connectivity signal from the platform.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }

    /// Whether the message view is scrolled to the bottom.
    pub fn set_at_bottom(&self, at_bottom: bool) {
        lock(&self.state).at_bottom = at_bottom;
    }

    pub async fn open_private(&self, peer: Handle) {
        self.sync.open_private(peer).await;
    }

    pub fn close_private(&self) {
        lock(&self.state).close_private();
    }

    pub async fn send_room(&self, body: MessageBody) -> Result<i64, ChatError> {
        self.sync.send_room(body).await
    }

    pub async fn send_private(&self, body: MessageBody) -> Result<i64, ChatError> {
        self.sync.send_private(body).await
    }

    pub async fn typing(&self) {
        self.sync.note_typing().await;
    }

    /// Upload a file and return the body to send.
    pub async fn attach(
        &self,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<MessageBody, ChatError> {
        match self.api.upload(file_name, content_type, data).await {
            Ok(body) => Ok(body),
            Err(e) => {
                end_for_auth_failure(&self.stop, &*self.view, &e);
                Err(e)
            }
        }
    }

    /// User-initiated logout.
    pub async fn logout(&self) {
        if !self.stop.stop(StopReason::Logout) {
            return;
        }
        let reason = StopReason::Logout.as_str().to_string();
        if let Err(e) = call::<Empty>(&*self.api, Action::Logout { reason: Some(reason) }).await {
            warn!(error = %e, "Logout request failed");
        }
        self.view
            .emit(ViewEvent::redirect(RedirectTarget::Logout, StopReason::Logout.as_str()));
        info!(handle = %self.handle, "Logged out");
    }

    /// Wait for the session to end and for its tasks to finish.
    pub async fn wait(&self) -> StopReason {
        let reason = self.stop.stopped().await;
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task panicked");
            }
        }
        reason
    }
}
