//! The action protocol spoken between client and server.
//!
//! Every request is a JSON object carrying an `action` tag plus the fields
//! of that action. Every response is an envelope `{ "status": "ok", ... }`
//! with the payload flattened in, or `{ "status": "error", "code", "message" }`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ErrorCode};
use crate::message::MessageBody;
use crate::types::{Handle, PresenceView, Role};

/// All actions accepted by the dispatch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Register {
        handle: String,
        password: String,
    },
    Login {
        handle: String,
        password: String,
    },
    Logout {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Heartbeat,

    GetMessages {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offset: Option<u32>,
    },
    SendMessage {
        body: MessageBody,
    },
    DeleteMessage {
        id: i64,
    },

    GetUsers,
    GetUserInfo {
        handle: Handle,
    },

    SendPrivateMessage {
        receiver: Handle,
        body: MessageBody,
    },
    GetPrivateMessages {
        peer: Handle,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    GetPrivateChatUsers,
    GetUnreadPrivateCount,
    MarkPrivateRead {
        peer: Handle,
    },
    DeletePrivateMessage {
        id: i64,
    },
    DeletePrivateChatHistory {
        peer: Handle,
    },
    Typing {
        peer: Handle,
    },

    UpdateSignature {
        #[serde(default)]
        signature: Option<String>,
    },
    ChangePassword {
        current_password: String,
        new_password: String,
    },
    DeleteUser {
        handle: Handle,
    },
}

impl Action {
    /// The wire name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Register { .. } => "register",
            Action::Login { .. } => "login",
            Action::Logout { .. } => "logout",
            Action::Heartbeat => "heartbeat",
            Action::GetMessages { .. } => "get_messages",
            Action::SendMessage { .. } => "send_message",
            Action::DeleteMessage { .. } => "delete_message",
            Action::GetUsers => "get_users",
            Action::GetUserInfo { .. } => "get_user_info",
            Action::SendPrivateMessage { .. } => "send_private_message",
            Action::GetPrivateMessages { .. } => "get_private_messages",
            Action::GetPrivateChatUsers => "get_private_chat_users",
            Action::GetUnreadPrivateCount => "get_unread_private_count",
            Action::MarkPrivateRead { .. } => "mark_private_read",
            Action::DeletePrivateMessage { .. } => "delete_private_message",
            Action::DeletePrivateChatHistory { .. } => "delete_private_chat_history",
            Action::Typing { .. } => "typing",
            Action::UpdateSignature { .. } => "update_signature",
            Action::ChangePassword { .. } => "change_password",
            Action::DeleteUser { .. } => "delete_user",
        }
    }

    /// Whether the action needs a resolved identity.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Action::Register { .. } | Action::Login { .. })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A message broadcast to the shared room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    pub id: i64,
    pub author: Handle,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
}

/// A message directed from one identity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub id: i64,
    pub sender: Handle,
    pub receiver: Handle,
    pub body: MessageBody,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// One entry of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer: Handle,
    pub last_message_at: DateTime<Utc>,
    pub unread: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub handle: Handle,
    pub role: Role,
    pub signature: Option<String>,
    pub online: bool,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionGrant {
    pub handle: Handle,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessages {
    pub messages: Vec<RoomMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMessages {
    pub messages: Vec<PrivateMessage>,
    pub peer_online: bool,
    #[serde(default)]
    pub peer_typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sent {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Users {
    pub users: Vec<PresenceView>,
    pub online_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfoPayload {
    pub user: UserInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversations {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkedRead {
    pub marked: u64,
}

/// Response of `POST /upload`: a body ready to be sent as a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uploaded {
    pub body: MessageBody,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: Status,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn ok(payload: T) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ChatError> for Envelope<ErrorBody> {
    fn from(err: &ChatError) -> Self {
        Self {
            status: Status::Error,
            payload: ErrorBody {
                code: err.code(),
                message: err.detail(),
            },
        }
    }
}

/// Decode a response envelope into its payload or the error it carries.
pub fn decode_envelope<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ChatError> {
    let status = value
        .get("status")
        .cloned()
        .ok_or_else(|| ChatError::Transient("response without status".into()))?;
    let status: Status = serde_json::from_value(status)
        .map_err(|e| ChatError::Transient(format!("bad status field: {e}")))?;

    match status {
        Status::Ok => serde_json::from_value(value)
            .map_err(|e| ChatError::Transient(format!("unexpected payload: {e}"))),
        Status::Error => {
            let body: ErrorBody = serde_json::from_value(value)
                .map_err(|e| ChatError::Transient(format!("unreadable error body: {e}")))?;
            Err(ChatError::from_code(body.code, body.message))
        }
    }
}
