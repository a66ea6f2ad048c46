use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request-level error taxonomy shared by the server and the client.
///
/// Every failure crossing the action endpoint is one of these. The server
/// turns them into an error envelope with an HTTP-equivalent status; the
/// client decodes the envelope back into the same variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Empty or malformed input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Missing or invalid session.
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// A newer login for the same identity exists elsewhere.
    #[error("Session replaced by a newer login")]
    SessionSuperseded,

    /// Role or ownership mismatch.
    #[error("Forbidden: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,

    /// Network or store unavailable. Retryable.
    #[error("Temporarily unavailable: {0}")]
    Transient(String),
}

/// Stable machine-readable code carried in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    Unauthenticated,
    SessionSuperseded,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Transient,
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Validation(_) => ErrorCode::Validation,
            ChatError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            ChatError::SessionSuperseded => ErrorCode::SessionSuperseded,
            ChatError::PermissionDenied(_) => ErrorCode::Forbidden,
            ChatError::NotFound(_) => ErrorCode::NotFound,
            ChatError::Conflict(_) => ErrorCode::Conflict,
            ChatError::RateLimited => ErrorCode::RateLimited,
            ChatError::Transient(_) => ErrorCode::Transient,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self.code() {
            ErrorCode::Validation => 400,
            ErrorCode::Unauthenticated | ErrorCode::SessionSuperseded => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::RateLimited => 429,
            ErrorCode::Transient => 500,
        }
    }

    /// Whether the polling loops may simply try again on their next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transient(_) | ChatError::RateLimited)
    }

    /// Whether the failure invalidates the local session.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ChatError::Unauthenticated(_) | ChatError::SessionSuperseded
        )
    }

    /// Rebuild an error from a decoded envelope.
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Validation => ChatError::Validation(message),
            ErrorCode::Unauthenticated => ChatError::Unauthenticated(message),
            ErrorCode::SessionSuperseded => ChatError::SessionSuperseded,
            ErrorCode::Forbidden => ChatError::PermissionDenied(message),
            ErrorCode::NotFound => ChatError::NotFound(message),
            ErrorCode::Conflict => ChatError::Conflict(message),
            ErrorCode::RateLimited => ChatError::RateLimited,
            ErrorCode::Transient => ChatError::Transient(message),
        }
    }

    /// The message without the variant prefix, as sent in the envelope.
    pub fn detail(&self) -> String {
        match self {
            ChatError::Validation(m)
            | ChatError::Unauthenticated(m)
            | ChatError::PermissionDenied(m)
            | ChatError::NotFound(m)
            | ChatError::Conflict(m)
            | ChatError::Transient(m) => m.clone(),
            ChatError::SessionSuperseded | ChatError::RateLimited => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ChatError::Validation("x".into()).status_code(), 400);
        assert_eq!(ChatError::SessionSuperseded.status_code(), 401);
        assert_eq!(ChatError::PermissionDenied("x".into()).status_code(), 403);
        assert_eq!(ChatError::NotFound("x".into()).status_code(), 404);
        assert_eq!(ChatError::Conflict("x".into()).status_code(), 409);
        assert_eq!(ChatError::RateLimited.status_code(), 429);
        assert_eq!(ChatError::Transient("x".into()).status_code(), 500);
    }

    #[test]
    fn test_code_survives_envelope() {
        let err = ChatError::PermissionDenied("not your message".into());
        let rebuilt = ChatError::from_code(err.code(), err.detail());
        assert_eq!(err, rebuilt);
    }

    #[test]
    fn test_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::SessionSuperseded).unwrap();
        assert_eq!(json, "\"session_superseded\"");
    }
}
