//! Transport to the palaver server.
//!
//! [`ChatApi`] is the seam every client component talks through: one call
//! per action, answered with the raw response envelope. [`HttpChatApi`] is
//! the production implementation over reqwest; tests substitute a fake.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use palaver_shared::protocol::{decode_envelope, Action, SessionGrant, Uploaded};
use palaver_shared::{ChatError, Handle, MessageBody};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Send one action and return the response envelope.
    async fn request(&self, action: Action) -> Result<Value, ChatError>;

    /// Upload a file and return a message body referencing it.
    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<MessageBody, ChatError>;
}

/// Send `action` and decode the payload of a successful envelope.
pub async fn call<T: DeserializeOwned>(api: &dyn ChatApi, action: Action) -> Result<T, ChatError> {
    decode_envelope(api.request(action).await?)
}

/// A login's credential, presented as `Bearer <handle>:<token>`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub handle: Handle,
    pub token: String,
}

impl Credential {
    fn bearer(&self) -> String {
        format!("{}:{}", self.handle, self.token)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("handle", &self.handle)
            .field("token", &"<redacted>")
            .finish()
    }
}

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    credential: RwLock<Option<Credential>>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential: RwLock::new(None),
        })
    }

    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().ok().and_then(|c| c.clone())
    }

    fn set_credential(&self, grant: &SessionGrant) {
        if let Ok(mut slot) = self.credential.write() {
            *slot = Some(Credential {
                handle: grant.handle.clone(),
                token: grant.token.clone(),
            });
        }
    }

    pub async fn login(&self, handle: &str, password: &str) -> Result<SessionGrant, ChatError> {
        let grant: SessionGrant = call(
            self,
            Action::Login {
                handle: handle.to_string(),
                password: password.to_string(),
            },
        )
        .await?;
        self.set_credential(&grant);
        Ok(grant)
    }

    pub async fn register(&self, handle: &str, password: &str) -> Result<SessionGrant, ChatError> {
        let grant: SessionGrant = call(
            self,
            Action::Register {
                handle: handle.to_string(),
                password: password.to_string(),
            },
        )
        .await?;
        self.set_credential(&grant);
        Ok(grant)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credential() {
            Some(credential) => req.bearer_auth(credential.bearer()),
            None => req,
        }
    }

    async fn read_envelope(resp: reqwest::Response) -> Result<Value, ChatError> {
        let status = resp.status();
        match resp.json::<Value>().await {
            Ok(value) => Ok(value),
            Err(_) if status == StatusCode::TOO_MANY_REQUESTS => Err(ChatError::RateLimited),
            Err(e) => Err(ChatError::Transient(format!(
                "unreadable response ({status}): {e}"
            ))),
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn request(&self, action: Action) -> Result<Value, ChatError> {
        debug!(action = action.name(), "request");
        let req = self
            .client
            .post(format!("{}/api", self.base_url))
            .json(&action);
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ChatError::Transient(format!("request failed: {e}")))?;
        Self::read_envelope(resp).await
    }

    async fn upload(
        &self,
        file_name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<MessageBody, ChatError> {
        let part = Part::bytes(data)
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .map_err(|e| ChatError::Validation(format!("bad content type: {e}")))?;
        let req = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(Form::new().part("file", part));
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| ChatError::Transient(format!("upload failed: {e}")))?;

        let uploaded: Uploaded = decode_envelope(Self::read_envelope(resp).await?)?;
        Ok(uploaded.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_hides_token() {
        let credential = Credential {
            handle: Handle::parse("alice").unwrap(),
            token: "deadbeef".into(),
        };
        assert_eq!(credential.bearer(), "alice:deadbeef");
        assert!(!format!("{credential:?}").contains("deadbeef"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let api = HttpChatApi::new("http://localhost:8080/").unwrap();
        assert_eq!(api.base_url, "http://localhost:8080");
        assert!(api.credential().is_none());
    }
}
