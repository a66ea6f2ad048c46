use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use palaver_shared::protocol::{Envelope, ErrorBody};
use palaver_shared::ChatError;
use palaver_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Upload not found: {0}")]
    UploadNotFound(Uuid),

    #[error("Upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: usize, max: usize },

    #[error("Upload storage error: {0}")]
    UploadStorage(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        ServerError::Chat(err.into())
    }
}

impl ServerError {
    /// The wire error this maps to. Storage details stay in the log.
    fn to_chat(&self) -> ChatError {
        match self {
            ServerError::Chat(ChatError::Transient(detail)) => {
                tracing::error!(error = %detail, "request failed");
                ChatError::Transient("temporarily unavailable".into())
            }
            ServerError::Chat(e) => e.clone(),
            ServerError::UploadNotFound(_) => ChatError::NotFound(self.to_string()),
            ServerError::UploadTooLarge { .. } => ChatError::Validation(self.to_string()),
            ServerError::UploadStorage(detail) => {
                tracing::error!(error = %detail, "upload storage failed");
                ChatError::Transient("upload storage error".into())
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let err = self.to_chat();
        let status = match &self {
            ServerError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };

        (status, axum::Json(Envelope::<ErrorBody>::from(&err))).into_response()
    }
}
