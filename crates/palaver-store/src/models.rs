//! Domain model structs persisted in the SQLite database.
//!
//! The message records are the wire types from `palaver-shared`, so the
//! server can hand them straight to the client.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use palaver_shared::{Handle, Role};

pub use palaver_shared::protocol::{ConversationSummary, PrivateMessage, RoomMessage, UserInfo};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered identity together with its presence record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    pub handle: Handle,
    /// Argon2 PHC string. Never serialized.
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    /// Last heartbeat, send or login.
    pub last_active: Option<DateTime<Utc>>,
    /// Flag set by heartbeats, cleared by logout and by the stale sweep.
    pub is_online: bool,
    /// Token of the latest login. Older tokens are superseded.
    #[serde(skip)]
    pub session_token: Option<String>,
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Outcome of checking a presented session token against the one on record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    /// The token is the latest one issued.
    Valid,
    /// A newer login replaced this token.
    Superseded,
    /// No session is on record (never logged in, or logged out).
    Absent,
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

/// What a delete removed, so the caller can clean up uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removed {
    /// Number of rows deleted.
    pub rows: u64,
    /// Uploaded blobs referenced by the deleted rows.
    pub blob_ids: Vec<Uuid>,
}
