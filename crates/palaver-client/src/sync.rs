//! Polling sync engine.
//!
//! One independent interval loop per data kind. Each tick fetches a
//! snapshot, merges it into the shared view state and emits view events
//! for whatever changed. A failed fetch is reported and retried on the next
//! tick at the same cadence; an authentication failure ends the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use palaver_shared::protocol::{
    Action, Conversations, Empty, MarkedRead, PrivateMessages, RoomMessages, Sent, UnreadCount,
    UserInfoPayload, Users,
};
use palaver_shared::{ChatError, Handle, MessageBody};

use crate::api::{call, ChatApi};
use crate::config::SyncIntervals;
use crate::events::{NoticeKind, ViewEvent, ViewSink};
use crate::session::{end_for_auth_failure, StopHandle};
use crate::state::{lock, SharedViewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Room,
    Private,
    Presence,
    Unread,
    Conversations,
    Profile,
}

impl DataKind {
    pub const ALL: [DataKind; 6] = [
        DataKind::Room,
        DataKind::Private,
        DataKind::Presence,
        DataKind::Unread,
        DataKind::Conversations,
        DataKind::Profile,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            DataKind::Room => "room messages",
            DataKind::Private => "private messages",
            DataKind::Presence => "online users",
            DataKind::Unread => "unread count",
            DataKind::Conversations => "conversations",
            DataKind::Profile => "profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Fetching,
    Merged,
    FetchFailed,
}

/// Something that can refresh the presence list on demand.
#[async_trait]
pub trait PresenceSource: Send + Sync {
    async fn refresh_presence(&self) -> Result<(), ChatError>;
}

pub struct PollingSyncEngine {
    me: Handle,
    api: Arc<dyn ChatApi>,
    view: Arc<dyn ViewSink>,
    state: SharedViewState,
    stop: StopHandle,
    intervals: SyncIntervals,
    phases: Mutex<HashMap<DataKind, LoopPhase>>,
}

impl PollingSyncEngine {
    pub fn new(
        me: Handle,
        api: Arc<dyn ChatApi>,
        view: Arc<dyn ViewSink>,
        state: SharedViewState,
        stop: StopHandle,
        intervals: SyncIntervals,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            api,
            view,
            state,
            stop,
            intervals,
            phases: Mutex::new(HashMap::new()),
        })
    }

    fn interval_for(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::Room => self.intervals.room,
            DataKind::Private => self.intervals.private,
            DataKind::Presence => self.intervals.presence,
            DataKind::Unread => self.intervals.unread,
            DataKind::Conversations => self.intervals.conversations,
            DataKind::Profile => self.intervals.profile,
        }
    }

    pub fn phase(&self, kind: DataKind) -> LoopPhase {
        self.phases
            .lock()
            .map(|p| p.get(&kind).copied().unwrap_or(LoopPhase::Idle))
            .unwrap_or(LoopPhase::Idle)
    }

    fn set_phase(&self, kind: DataKind, phase: LoopPhase) {
        if let Ok(mut phases) = self.phases.lock() {
            phases.insert(kind, phase);
        }
    }

    /// Spawn one loop per data kind. Every loop exits when the session
    /// stops.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        DataKind::ALL
            .into_iter()
            .map(|kind| tokio::spawn(Arc::clone(self).run_loop(kind)))
            .collect()
    }

    async fn run_loop(self: Arc<Self>, kind: DataKind) {
        let mut ticker = interval(self.interval_for(kind));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.stop.stopped() => break,
                _ = ticker.tick() => {}
            }
            if self.stop.is_stopped() {
                break;
            }
            self.poll_once(kind).await;
        }
        debug!(kind = ?kind, "Sync loop stopped");
    }

    /// Run a single fetch-and-merge for `kind` and return how it ended.
    pub async fn poll_once(&self, kind: DataKind) -> LoopPhase {
        if kind == DataKind::Private && lock(&self.state).open_peer.is_none() {
            return LoopPhase::Idle;
        }

        self.set_phase(kind, LoopPhase::Fetching);
        let result = match kind {
            DataKind::Room => self.fetch_room().await,
            DataKind::Private => self.fetch_private().await,
            DataKind::Presence => self.fetch_presence().await,
            DataKind::Unread => self.fetch_unread().await,
            DataKind::Conversations => self.fetch_conversations().await,
            DataKind::Profile => self.fetch_profile().await,
        };

        let outcome = match result {
            Ok(()) => LoopPhase::Merged,
            Err(e) => {
                self.report_failure(kind, &e);
                LoopPhase::FetchFailed
            }
        };
        self.set_phase(kind, LoopPhase::Idle);
        outcome
    }

    fn report_failure(&self, kind: DataKind, err: &ChatError) {
        if end_for_auth_failure(&self.stop, &*self.view, err) {
            return;
        }
        warn!(kind = ?kind, error = %err, "Fetch failed");
        self.view.emit(ViewEvent::notice(
            NoticeKind::Transient,
            format!("Could not refresh {}: {}", kind.label(), err.detail()),
        ));
    }

    async fn fetch_room(&self) -> Result<(), ChatError> {
        let payload: RoomMessages = call(
            &*self.api,
            Action::GetMessages {
                limit: None,
                offset: None,
            },
        )
        .await?;

        let rerender = {
            let mut state = lock(&self.state);
            let at_bottom = state.at_bottom;
            state.merge_room(&payload.messages).then_some(at_bottom)
        };
        if let Some(scroll_to_bottom) = rerender {
            self.view.emit(ViewEvent::RoomRendered {
                messages: payload.messages,
                scroll_to_bottom,
            });
        }
        Ok(())
    }

    async fn fetch_private(&self) -> Result<(), ChatError> {
        let Some(cursor) = lock(&self.state).private_cursor() else {
            return Ok(());
        };

        let payload: PrivateMessages = call(
            &*self.api,
            Action::GetPrivateMessages {
                peer: cursor.peer.clone(),
                after_id: cursor.after_id,
                limit: None,
            },
        )
        .await?;

        let (fresh, at_bottom) = {
            let mut state = lock(&self.state);
            if !state.is_current(&cursor) {
                debug!(peer = %cursor.peer, "Dropped private response for a reopened view");
                return Ok(());
            }
            let at_bottom = state.at_bottom;
            (state.merge_private(&cursor, payload.messages), at_bottom)
        };
        if !fresh.is_empty() {
            self.view.emit(ViewEvent::PrivateAppended {
                peer: cursor.peer.clone(),
                messages: fresh,
                scroll_to_bottom: at_bottom,
            });
        }
        self.view.emit(ViewEvent::PeerStatus {
            peer: cursor.peer,
            online: payload.peer_online,
            typing: payload.peer_typing,
        });
        Ok(())
    }

    async fn fetch_presence(&self) -> Result<(), ChatError> {
        let payload: Users = call(&*self.api, Action::GetUsers).await?;
        self.view.emit(ViewEvent::PresenceRendered {
            users: payload.users,
            online_count: payload.online_count,
        });
        Ok(())
    }

    async fn fetch_unread(&self) -> Result<(), ChatError> {
        let payload: UnreadCount = call(&*self.api, Action::GetUnreadPrivateCount).await?;
        if lock(&self.state).merge_unread(payload.count) {
            self.view.emit(ViewEvent::UnreadChanged {
                count: payload.count,
            });
        }
        Ok(())
    }

    async fn fetch_conversations(&self) -> Result<(), ChatError> {
        let payload: Conversations = call(&*self.api, Action::GetPrivateChatUsers).await?;
        self.view.emit(ViewEvent::ConversationsRendered {
            conversations: payload.conversations,
        });
        Ok(())
    }

    async fn fetch_profile(&self) -> Result<(), ChatError> {
        let payload: UserInfoPayload = call(
            &*self.api,
            Action::GetUserInfo {
                handle: self.me.clone(),
            },
        )
        .await?;
        self.view.emit(ViewEvent::ProfileRendered { user: payload.user });
        Ok(())
    }

    /// Open the private conversation with `peer`: mark it read on the
    /// server, then load it right away instead of waiting for the next tick.
    pub async fn open_private(&self, peer: Handle) {
        lock(&self.state).open_private(peer.clone());
        debug!(peer = %peer, "Opened private conversation");
        self.view.emit(ViewEvent::PrivateOpened { peer: peer.clone() });

        match call::<MarkedRead>(&*self.api, Action::MarkPrivateRead { peer }).await {
            Ok(marked) => debug!(marked = marked.marked, "Marked conversation read"),
            Err(e) => self.report_failure(DataKind::Private, &e),
        }
        if self.stop.is_stopped() {
            return;
        }
        self.poll_once(DataKind::Private).await;
        self.poll_once(DataKind::Unread).await;
    }

    pub async fn send_room(&self, body: MessageBody) -> Result<i64, ChatError> {
        body.validate()?;
        let sent: Sent = call(&*self.api, Action::SendMessage { body })
            .await
            .map_err(|e| {
                end_for_auth_failure(&self.stop, &*self.view, &e);
                e
            })?;
        self.poll_once(DataKind::Room).await;
        Ok(sent.id)
    }

    pub async fn send_private(&self, body: MessageBody) -> Result<i64, ChatError> {
        body.validate()?;
        let receiver = lock(&self.state)
            .open_peer
            .clone()
            .ok_or_else(|| ChatError::Validation("no private conversation is open".into()))?;

        let sent: Sent = call(&*self.api, Action::SendPrivateMessage { receiver, body })
            .await
            .map_err(|e| {
                end_for_auth_failure(&self.stop, &*self.view, &e);
                e
            })?;
        lock(&self.state).clear_typing();
        self.poll_once(DataKind::Private).await;
        Ok(sent.id)
    }

    /// A keystroke in the private composer.
    pub async fn note_typing(&self) {
        let peer = {
            let mut state = lock(&self.state);
            let Some(peer) = state.open_peer.clone() else {
                return;
            };
            if !state.note_typing(Instant::now()) {
                return;
            }
            peer
        };

        if let Err(e) = call::<Empty>(&*self.api, Action::Typing { peer }).await {
            if !end_for_auth_failure(&self.stop, &*self.view, &e) {
                debug!(error = %e, "Typing update failed");
            }
        }
    }
}

#[async_trait]
impl PresenceSource for PollingSyncEngine {
    async fn refresh_presence(&self) -> Result<(), ChatError> {
        self.fetch_presence().await
    }
}
