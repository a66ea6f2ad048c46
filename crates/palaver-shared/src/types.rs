use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_HANDLE_LEN, MIN_HANDLE_LEN};
use crate::error::ChatError;

/// A user's unique handle. Validated on construction, so a `Handle` in hand
/// is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
    pub fn parse(raw: &str) -> Result<Self, ChatError> {
        let raw = raw.trim();
        if raw.len() < MIN_HANDLE_LEN || raw.len() > MAX_HANDLE_LEN {
            return Err(ChatError::Validation(format!(
                "handle must be {MIN_HANDLE_LEN}-{MAX_HANDLE_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ChatError::Validation(
                "handle may only contain letters, digits, '_' and '-'".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Handle {
    type Error = ChatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Handle::parse(&value)
    }
}

impl From<Handle> for String {
    fn from(h: Handle) -> Self {
        h.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// A conversation boundary: the shared room, or one unordered pair of
/// identities for directed messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConversationScope {
    Room,
    Direct { low: Handle, high: Handle },
}

impl ConversationScope {
    /// Build the pair scope for `a` and `b`. The pair is normalised, so
    /// `direct(a, b) == direct(b, a)`.
    pub fn direct(a: &Handle, b: &Handle) -> Result<Self, ChatError> {
        if a == b {
            return Err(ChatError::Validation(
                "cannot open a private conversation with yourself".into(),
            ));
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        Ok(ConversationScope::Direct {
            low: low.clone(),
            high: high.clone(),
        })
    }

    pub fn includes(&self, who: &Handle) -> bool {
        match self {
            ConversationScope::Room => true,
            ConversationScope::Direct { low, high } => low == who || high == who,
        }
    }

    /// The other participant of a pair scope, seen from `me`.
    pub fn peer_of(&self, me: &Handle) -> Option<&Handle> {
        match self {
            ConversationScope::Room => None,
            ConversationScope::Direct { low, high } if low == me => Some(high),
            ConversationScope::Direct { low, high } if high == me => Some(low),
            ConversationScope::Direct { .. } => None,
        }
    }
}

impl std::fmt::Display for ConversationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationScope::Room => f.write_str("room"),
            ConversationScope::Direct { low, high } => write!(f, "dm:{low}:{high}"),
        }
    }
}

/// Resolved presence of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    pub handle: Handle,
    pub role: Role,
    pub online: bool,
    pub last_active: Option<DateTime<Utc>>,
}
