//! Per-session view state.
//!
//! [`ClientViewState`] is wrapped in `Arc<Mutex<>>` and shared by the
//! polling loops; every lock is held for a single merge, never across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;

use palaver_shared::constants::TYPING_EXPIRY;
use palaver_shared::protocol::{PrivateMessage, RoomMessage};
use palaver_shared::Handle;

pub type SharedViewState = Arc<Mutex<ClientViewState>>;

/// What a private fetch was issued against. A response is merged only if
/// the conversation has not been reopened or switched since.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateCursor {
    pub peer: Handle,
    pub generation: u64,
    pub after_id: Option<i64>,
}

/// Lock the shared state, recovering from a poisoned lock. The state is
/// plain data that every merge leaves consistent.
pub fn lock(state: &SharedViewState) -> MutexGuard<'_, ClientViewState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct ClientViewState {
    /// Number of room messages currently on screen.
    pub rendered_room_count: usize,
    /// Id of the newest rendered room message.
    pub rendered_room_last_id: Option<i64>,

    /// Private conversation currently open.
    pub open_peer: Option<Handle>,
    /// Highest private message id already appended to the open view.
    pub last_seen_private_id: i64,
    /// Bumped on every open or close of a private view.
    pub private_generation: u64,

    /// Whether the message view was scrolled to the bottom.
    pub at_bottom: bool,

    /// Local "typing" flag; lapses at this instant.
    pub typing_until: Option<Instant>,
    /// When the typing flag was last published to the server.
    pub typing_published_at: Option<Instant>,

    /// Last unread count shown.
    pub unread_count: Option<u64>,
}

impl Default for ClientViewState {
    fn default() -> Self {
        Self {
            rendered_room_count: 0,
            rendered_room_last_id: None,
            open_peer: None,
            last_seen_private_id: 0,
            private_generation: 0,
            at_bottom: true,
            typing_until: None,
            typing_published_at: None,
            unread_count: None,
        }
    }
}

impl ClientViewState {
    pub fn shared() -> SharedViewState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Whether a room snapshot differs from what is rendered. Records the
    /// snapshot as rendered when it does.
    pub fn merge_room(&mut self, snapshot: &[RoomMessage]) -> bool {
        let last_id = snapshot.last().map(|m| m.id);
        if snapshot.len() == self.rendered_room_count && last_id == self.rendered_room_last_id {
            return false;
        }
        self.rendered_room_count = snapshot.len();
        self.rendered_room_last_id = last_id;
        true
    }

    /// Switch the private view to `peer`, forgetting what was appended.
    pub fn open_private(&mut self, peer: Handle) {
        self.open_peer = Some(peer);
        self.last_seen_private_id = 0;
        self.private_generation += 1;
        self.at_bottom = true;
    }

    pub fn close_private(&mut self) {
        self.open_peer = None;
        self.last_seen_private_id = 0;
        self.private_generation += 1;
    }

    /// Cursor for the next fetch of the open conversation.
    pub fn private_cursor(&self) -> Option<PrivateCursor> {
        let peer = self.open_peer.clone()?;
        let last_seen = self.last_seen_private_id;
        Some(PrivateCursor {
            peer,
            generation: self.private_generation,
            after_id: (last_seen > 0).then_some(last_seen),
        })
    }

    /// Whether `cursor` still describes the open conversation.
    pub fn is_current(&self, cursor: &PrivateCursor) -> bool {
        cursor.generation == self.private_generation && self.open_peer.as_ref() == Some(&cursor.peer)
    }

    /// Keep only messages newer than the last seen id and advance it.
    ///
    /// A response fetched before the view was reopened or switched yields
    /// nothing, and so does a duplicated one.
    pub fn merge_private(
        &mut self,
        cursor: &PrivateCursor,
        fetched: Vec<PrivateMessage>,
    ) -> Vec<PrivateMessage> {
        if !self.is_current(cursor) {
            return Vec::new();
        }
        let fresh: Vec<PrivateMessage> = fetched
            .into_iter()
            .filter(|m| m.id > self.last_seen_private_id)
            .collect();
        if let Some(max) = fresh.iter().map(|m| m.id).max() {
            self.last_seen_private_id = max;
        }
        fresh
    }

    /// Note a local keystroke. Returns whether the flag should be published
    /// now: at most once per expiry period.
    pub fn note_typing(&mut self, now: Instant) -> bool {
        self.typing_until = Some(now + TYPING_EXPIRY);
        let due = self
            .typing_published_at
            .map_or(true, |at| now.saturating_duration_since(at) >= TYPING_EXPIRY);
        if due {
            self.typing_published_at = Some(now);
        }
        due
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.typing_until.is_some_and(|until| until > now)
    }

    pub fn clear_typing(&mut self) {
        self.typing_until = None;
        self.typing_published_at = None;
    }

    /// Record the unread count; returns whether it changed.
    pub fn merge_unread(&mut self, count: u64) -> bool {
        let changed = self.unread_count != Some(count);
        self.unread_count = Some(count);
        changed
    }
}
