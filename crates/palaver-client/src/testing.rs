//! Test doubles for the client components.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use palaver_shared::protocol::{Action, Envelope, ErrorBody};
use palaver_shared::{ChatError, MessageBody};

use crate::api::ChatApi;
use crate::events::{NoticeKind, RedirectTarget, ViewEvent, ViewSink};

type Responder = Box<dyn FnMut(&Action) -> Result<Value, ChatError> + Send>;

/// Wrap a payload in an ok envelope.
pub fn okv(payload: Value) -> Result<Value, ChatError> {
    let mut envelope = json!({ "status": "ok" });
    if let (Some(target), Value::Object(fields)) = (envelope.as_object_mut(), payload) {
        target.extend(fields);
    }
    Ok(envelope)
}

/// The error envelope the server sends for `err`.
pub fn errv(err: &ChatError) -> Value {
    serde_json::to_value(Envelope::<ErrorBody>::from(err)).unwrap()
}

/// In-memory [`ChatApi`] that records every action and answers through a
/// replaceable responder.
pub struct FakeApi {
    calls: Mutex<Vec<Action>>,
    responder: Mutex<Responder>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Mutex::new(Box::new(Self::default_response)),
        })
    }

    /// A plausible successful answer to every action.
    pub fn default_response(action: &Action) -> Result<Value, ChatError> {
        match action {
            Action::Heartbeat => okv(json!({ "server_time": Utc::now() })),
            Action::GetMessages { .. } => okv(json!({ "messages": [] })),
            Action::GetPrivateMessages { .. } => {
                okv(json!({ "messages": [], "peer_online": false, "peer_typing": false }))
            }
            Action::GetUsers => okv(json!({ "users": [], "online_count": 0 })),
            Action::GetUnreadPrivateCount => okv(json!({ "count": 0 })),
            Action::GetPrivateChatUsers => okv(json!({ "conversations": [] })),
            Action::GetUserInfo { handle } => okv(json!({
                "user": {
                    "handle": handle,
                    "role": "user",
                    "signature": null,
                    "online": true,
                    "last_active": Utc::now(),
                    "created_at": Utc::now(),
                }
            })),
            Action::SendMessage { .. } | Action::SendPrivateMessage { .. } => {
                okv(json!({ "id": 1 }))
            }
            Action::MarkPrivateRead { .. } => okv(json!({ "marked": 0 })),
            _ => okv(json!({})),
        }
    }

    pub fn respond(
        &self,
        responder: impl FnMut(&Action) -> Result<Value, ChatError> + Send + 'static,
    ) {
        *self.responder.lock().unwrap() = Box::new(responder);
    }

    pub fn calls(&self) -> Vec<Action> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls of the named action.
    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.name() == name)
            .count()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn request(&self, action: Action) -> Result<Value, ChatError> {
        let response = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(&action)
        };
        self.calls.lock().unwrap().push(action);
        response
    }

    async fn upload(
        &self,
        file_name: &str,
        _content_type: &str,
        _data: Vec<u8>,
    ) -> Result<MessageBody, ChatError> {
        Ok(MessageBody::text(file_name))
    }
}

/// View that keeps every event for inspection.
#[derive(Default)]
pub struct RecordingView {
    events: Mutex<Vec<ViewEvent>>,
}

impl RecordingView {
    pub fn events(&self) -> Vec<ViewEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of events with the given serialized tag.
    pub fn count(&self, tag: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| serde_json::to_value(e).unwrap()["event"] == tag)
            .count()
    }

    pub fn notices(&self, kind: NoticeKind) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ViewEvent::Notice { kind: k, .. } if *k == kind))
            .count()
    }

    pub fn redirects(&self) -> Vec<(RedirectTarget, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ViewEvent::Redirect { target, reason } => Some((target, reason)),
                _ => None,
            })
            .collect()
    }
}

impl ViewSink for RecordingView {
    fn emit(&self, event: ViewEvent) {
        self.events.lock().unwrap().push(event);
    }
}
