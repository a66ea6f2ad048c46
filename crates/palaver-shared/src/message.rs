//! Message bodies.
//!
//! A body is decoded exactly once, where it leaves storage. Rows whose type
//! tag is unknown or whose structured payload does not parse become
//! [`MessageBody::Malformed`] and are shown as plain text.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_BODY_CHARS;
use crate::error::ChatError;

/// Reference to an uploaded or external asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Set when the asset lives in the server's upload store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum MessageBody {
    Text(String),
    Image(AssetRef),
    File(AssetRef),
    Sticker(String),
    Malformed { kind: String, raw: String },
}

impl MessageBody {
    pub fn text(s: impl Into<String>) -> Self {
        MessageBody::Text(s.into())
    }

    /// The type tag stored next to the body.
    pub fn kind(&self) -> &str {
        match self {
            MessageBody::Text(_) => "text",
            MessageBody::Image(_) => "image",
            MessageBody::File(_) => "file",
            MessageBody::Sticker(_) => "sticker",
            MessageBody::Malformed { kind, .. } => kind,
        }
    }

    /// Check a body submitted by a client before it is stored.
    pub fn validate(&self) -> Result<(), ChatError> {
        match self {
            MessageBody::Text(text) => {
                if text.trim().is_empty() {
                    return Err(ChatError::Validation("message body is empty".into()));
                }
                if text.chars().count() > MAX_BODY_CHARS {
                    return Err(ChatError::Validation(format!(
                        "message body exceeds {MAX_BODY_CHARS} characters"
                    )));
                }
            }
            MessageBody::Image(asset) | MessageBody::File(asset) => {
                if asset.url.trim().is_empty() {
                    return Err(ChatError::Validation("asset url is empty".into()));
                }
            }
            MessageBody::Sticker(id) => {
                if id.trim().is_empty() {
                    return Err(ChatError::Validation("sticker id is empty".into()));
                }
            }
            MessageBody::Malformed { .. } => {
                return Err(ChatError::Validation("unsupported message type".into()));
            }
        }
        Ok(())
    }

    /// Encode into the `(type, body)` column pair.
    pub fn to_storage(&self) -> (String, String) {
        let body = match self {
            MessageBody::Text(s) | MessageBody::Sticker(s) => s.clone(),
            MessageBody::Image(asset) | MessageBody::File(asset) => {
                serde_json::to_string(asset).unwrap_or_default()
            }
            MessageBody::Malformed { raw, .. } => raw.clone(),
        };
        (self.kind().to_string(), body)
    }

    /// Decode a `(type, body)` column pair. Never fails.
    pub fn from_storage(kind: &str, raw: String) -> Self {
        let malformed = |raw: String| MessageBody::Malformed {
            kind: kind.to_string(),
            raw,
        };
        match kind {
            "text" => MessageBody::Text(raw),
            "sticker" => MessageBody::Sticker(raw),
            "image" => match serde_json::from_str::<AssetRef>(&raw) {
                Ok(asset) => MessageBody::Image(asset),
                Err(_) => malformed(raw),
            },
            "file" => match serde_json::from_str::<AssetRef>(&raw) {
                Ok(asset) => MessageBody::File(asset),
                Err(_) => malformed(raw),
            },
            _ => malformed(raw),
        }
    }

    /// Uploaded blob referenced by this body, if any.
    pub fn blob_id(&self) -> Option<Uuid> {
        match self {
            MessageBody::Image(asset) | MessageBody::File(asset) => asset.blob_id,
            _ => None,
        }
    }

    /// Plain-text rendering used by text-only views and for malformed rows.
    pub fn plain_text(&self) -> String {
        match self {
            MessageBody::Text(s) => s.clone(),
            MessageBody::Image(a) => format!("[image] {}", a.name.as_deref().unwrap_or(&a.url)),
            MessageBody::File(a) => format!("[file] {}", a.name.as_deref().unwrap_or(&a.url)),
            MessageBody::Sticker(id) => format!("[sticker] {id}"),
            MessageBody::Malformed { raw, .. } => raw.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_decode_image() {
        let asset = AssetRef {
            url: "/uploads/abc".into(),
            name: Some("cat.png".into()),
            size: Some(1234),
            blob_id: Some(Uuid::new_v4()),
        };
        let (kind, raw) = MessageBody::Image(asset.clone()).to_storage();
        assert_eq!(kind, "image");
        assert_eq!(MessageBody::from_storage(&kind, raw), MessageBody::Image(asset));
    }

    #[test]
    fn test_broken_payload_becomes_malformed() {
        let body = MessageBody::from_storage("image", "not json".into());
        assert_eq!(
            body,
            MessageBody::Malformed {
                kind: "image".into(),
                raw: "not json".into()
            }
        );
        assert_eq!(body.plain_text(), "not json");
    }

    #[test]
    fn test_unknown_kind_becomes_malformed() {
        let body = MessageBody::from_storage("hologram", "x".into());
        assert_eq!(body.kind(), "hologram");
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_text() {
        assert!(MessageBody::text("   ").validate().is_err());
        assert!(MessageBody::text("hi").validate().is_ok());
        assert!(MessageBody::text("x".repeat(MAX_BODY_CHARS + 1)).validate().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(MessageBody::text("hello")).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "hello");
    }
}
