use serde::Serialize;

use palaver_shared::protocol::{ConversationSummary, PrivateMessage, RoomMessage, UserInfo};
use palaver_shared::{Handle, PresenceView};

pub const EVENT_ROOM_RENDERED: &str = "room-rendered";
pub const EVENT_PRIVATE_OPENED: &str = "private-opened";
pub const EVENT_PRIVATE_APPENDED: &str = "private-appended";
pub const EVENT_PEER_STATUS: &str = "peer-status";
pub const EVENT_PRESENCE_RENDERED: &str = "presence-rendered";
pub const EVENT_UNREAD_CHANGED: &str = "unread-changed";
pub const EVENT_CONVERSATIONS_RENDERED: &str = "conversations-rendered";
pub const EVENT_PROFILE_RENDERED: &str = "profile-rendered";
pub const EVENT_NOTICE: &str = "notice";
pub const EVENT_REDIRECT: &str = "redirect";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A single fetch failed; the loop keeps going.
    Transient,
    /// A heartbeat failed or the network went away.
    ConnectivityWarning,
    /// Several heartbeats in a row failed. Stays until one succeeds.
    ConnectivityLost,
    ConnectivityRestored,
    Inactivity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectTarget {
    Login,
    Logout,
}

/// Everything the client asks its view to show.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    RoomRendered {
        messages: Vec<RoomMessage>,
        scroll_to_bottom: bool,
    },
    /// A private conversation was opened; clear the private view.
    PrivateOpened {
        peer: Handle,
    },
    PrivateAppended {
        peer: Handle,
        messages: Vec<PrivateMessage>,
        scroll_to_bottom: bool,
    },
    PeerStatus {
        peer: Handle,
        online: bool,
        typing: bool,
    },
    PresenceRendered {
        users: Vec<PresenceView>,
        online_count: usize,
    },
    UnreadChanged {
        count: u64,
    },
    ConversationsRendered {
        conversations: Vec<ConversationSummary>,
    },
    ProfileRendered {
        user: UserInfo,
    },
    Notice {
        kind: NoticeKind,
        message: String,
    },
    Redirect {
        target: RedirectTarget,
        reason: String,
    },
}

impl ViewEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ViewEvent::RoomRendered { .. } => EVENT_ROOM_RENDERED,
            ViewEvent::PrivateOpened { .. } => EVENT_PRIVATE_OPENED,
            ViewEvent::PrivateAppended { .. } => EVENT_PRIVATE_APPENDED,
            ViewEvent::PeerStatus { .. } => EVENT_PEER_STATUS,
            ViewEvent::PresenceRendered { .. } => EVENT_PRESENCE_RENDERED,
            ViewEvent::UnreadChanged { .. } => EVENT_UNREAD_CHANGED,
            ViewEvent::ConversationsRendered { .. } => EVENT_CONVERSATIONS_RENDERED,
            ViewEvent::ProfileRendered { .. } => EVENT_PROFILE_RENDERED,
            ViewEvent::Notice { .. } => EVENT_NOTICE,
            ViewEvent::Redirect { .. } => EVENT_REDIRECT,
        }
    }

    pub fn notice(kind: NoticeKind, message: impl Into<String>) -> Self {
        ViewEvent::Notice {
            kind,
            message: message.into(),
        }
    }

    pub fn redirect(target: RedirectTarget, reason: impl Into<String>) -> Self {
        ViewEvent::Redirect {
            target,
            reason: reason.into(),
        }
    }
}

/// Where view events go. A browser front-end would render them; the
/// headless client logs them.
pub trait ViewSink: Send + Sync {
    fn emit(&self, event: ViewEvent);
}

/// View that writes every event to the log.
#[derive(Debug, Default)]
pub struct LogView;

impl ViewSink for LogView {
    fn emit(&self, event: ViewEvent) {
        match &event {
            ViewEvent::RoomRendered { messages, .. } => {
                for m in messages {
                    tracing::info!(id = m.id, author = %m.author, "{}", m.body.plain_text());
                }
            }
            ViewEvent::PrivateAppended { peer, messages, .. } => {
                for m in messages {
                    tracing::info!(id = m.id, peer = %peer, from = %m.sender, "{}", m.body.plain_text());
                }
            }
            ViewEvent::Notice { kind, message } => {
                tracing::warn!(kind = ?kind, "{message}");
            }
            ViewEvent::Redirect { target, reason } => {
                tracing::warn!(to = ?target, reason = %reason, "redirect");
            }
            other => match serde_json::to_string(other) {
                Ok(json) => tracing::debug!(event = other.name(), "{json}"),
                Err(e) => tracing::error!(event = other.name(), error = %e, "Failed to encode event"),
            },
        }
    }
}
