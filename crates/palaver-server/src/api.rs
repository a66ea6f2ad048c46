use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use palaver_shared::protocol::{Action, Envelope, Uploaded};
use palaver_shared::{AssetRef, ChatError, MessageBody};

use crate::auth::{authenticate, parse_credential};
use crate::error::ServerError;
use crate::handlers;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Multipart framing on top of the raw upload size.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api", post(api_dispatch))
        .route("/upload", post(upload))
        .route("/uploads/:id", get(download))
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_size + MULTIPART_OVERHEAD,
        ))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    registration_open: bool,
    max_upload_size: usize,
    users: u64,
    uptime_secs: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Result<Json<ServerInfoResponse>, ServerError> {
    let users = state.db.with(|db| db.count_users())?;
    Ok(Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        registration_open: state.config.registration_open,
        max_upload_size: state.blob_store.max_size(),
        users,
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

/// `POST /api`: decode `{ "action": ..., ... }` and run it.
async fn api_dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let action: Action = serde_json::from_slice(&body)
        .map_err(|e| ChatError::Validation(format!("unrecognised request: {e}")))?;

    let credential = if action.requires_session() {
        parse_credential(&headers)?
    } else {
        None
    };

    handlers::dispatch(&state, credential, action).await.map(Json)
}

/// `POST /upload`: store the multipart `file` field and hand back a message
/// body that references it.
async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Envelope<Uploaded>>, ServerError> {
    let credential = parse_credential(&headers)?;
    let caller = state
        .db
        .with(|db| authenticate(db, credential.as_ref()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::Validation(format!("multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let name = field.file_name().map(str::to_string);
        let is_image = field
            .content_type()
            .is_some_and(|ct| ct.starts_with("image/"));
        let data = field
            .bytes()
            .await
            .map_err(|e| ChatError::Validation(format!("failed to read upload: {e}")))?;

        let id = state.blob_store.store_blob(&data).await?;
        info!(id = %id, size = data.len(), handle = %caller.handle, "upload stored");

        let asset = AssetRef {
            url: format!("/uploads/{id}"),
            name,
            size: Some(data.len() as u64),
            blob_id: Some(id),
        };
        let body = if is_image {
            MessageBody::Image(asset)
        } else {
            MessageBody::File(asset)
        };
        return Ok(Json(Envelope::ok(Uploaded { body })));
    }

    Err(ChatError::Validation("missing 'file' field in multipart form".into()).into())
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.blob_store.get_blob(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        data,
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use palaver_shared::constants::ONLINE_WINDOW;
    use palaver_shared::{Handle, ManualClock};
    use palaver_store::Database;

    use crate::blob_store::BlobStore;
    use crate::config::ServerConfig;
    use crate::rate_limit::RateLimiter;
    use crate::state::SharedDb;
    use crate::typing::TypingRegistry;

    struct Harness {
        router: Router,
        clock: ManualClock,
        _uploads: TempDir,
    }

    async fn harness_with(config: ServerConfig) -> Harness {
        let clock = ManualClock::default();
        let db = Database::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let uploads = TempDir::new().unwrap();
        let blob_store = BlobStore::new(uploads.path().to_path_buf(), 1024)
            .await
            .unwrap();

        let state = AppState {
            db: SharedDb::new(db),
            blob_store: Arc::new(blob_store),
            typing: TypingRegistry::default(),
            rate_limiter: RateLimiter::default(),
            config: Arc::new(config),
            started_at: Instant::now(),
        };
        Harness {
            router: build_router(state),
            clock,
            _uploads: uploads,
        }
    }

    async fn harness() -> Harness {
        harness_with(ServerConfig {
            admin_handle: Some(Handle::parse("root").unwrap()),
            ..ServerConfig::default()
        })
        .await
    }

    async fn read_json(resp: axum::response::Response) -> (StatusCode, Value) {
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    impl Harness {
        async fn call(&self, auth: Option<&String>, body: Value) -> (StatusCode, Value) {
            let mut req = Request::builder()
                .method("POST")
                .uri("/api")
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(auth) = auth {
                req = req.header(header::AUTHORIZATION, format!("Bearer {auth}"));
            }
            let req = req.body(Body::from(body.to_string())).unwrap();
            read_json(self.router.clone().oneshot(req).await.unwrap()).await
        }

        /// Register and return the `handle:token` credential.
        async fn register(&self, handle: &str) -> String {
            let (status, body) = self
                .call(
                    None,
                    json!({ "action": "register", "handle": handle, "password": "secret-pw" }),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            format!("{handle}:{}", body["token"].as_str().unwrap())
        }

        async fn login(&self, handle: &str) -> String {
            let (status, body) = self
                .call(
                    None,
                    json!({ "action": "login", "handle": handle, "password": "secret-pw" }),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            format!("{handle}:{}", body["token"].as_str().unwrap())
        }
    }

    fn text(s: &str) -> Value {
        json!({ "type": "text", "content": s })
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = read_json(h.router.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_action_and_missing_session() {
        let h = harness().await;

        let (status, body) = h.call(None, json!({ "action": "format_disk" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");

        let (status, body) = h.call(None, json!({ "action": "get_users" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_newer_login_supersedes_older_session() {
        let h = harness().await;
        let first = h.register("alice").await;

        let (status, _) = h.call(Some(&first), json!({ "action": "heartbeat" })).await;
        assert_eq!(status, StatusCode::OK);

        let second = h.login("alice").await;
        let (status, body) = h.call(Some(&first), json!({ "action": "heartbeat" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "session_superseded");

        let (status, _) = h.call(Some(&second), json!({ "action": "heartbeat" })).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let h = harness().await;
        h.register("alice").await;
        let (status, body) = h
            .call(
                None,
                json!({ "action": "login", "handle": "alice", "password": "nope-nope" }),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let h = harness().await;
        h.register("alice").await;
        let (status, body) = h
            .call(
                None,
                json!({ "action": "register", "handle": "alice", "password": "secret-pw" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "conflict");
    }

    #[tokio::test]
    async fn test_registration_closed() {
        let h = harness_with(ServerConfig {
            registration_open: false,
            ..ServerConfig::default()
        })
        .await;
        let (status, _) = h
            .call(
                None,
                json!({ "action": "register", "handle": "alice", "password": "secret-pw" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_room_send_and_read() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let bob = h.register("bob").await;

        for (who, msg) in [(&alice, "one"), (&bob, "two"), (&alice, "three")] {
            let (status, body) = h
                .call(Some(who), json!({ "action": "send_message", "body": text(msg) }))
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
            assert!(body["id"].as_i64().is_some());
        }

        let (status, body) = h
            .call(Some(&bob), json!({ "action": "get_messages", "limit": 50 }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let texts: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"]["content"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);

        let (status, body) = h
            .call(Some(&alice), json!({ "action": "send_message", "body": text("   ") }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_delete_message_permissions() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let bob = h.register("bob").await;
        let root = h.register("root").await;

        let (_, sent) = h
            .call(Some(&alice), json!({ "action": "send_message", "body": text("mine") }))
            .await;
        let id = sent["id"].as_i64().unwrap();

        let (status, body) = h
            .call(Some(&bob), json!({ "action": "delete_message", "id": id }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (status, body) = h
            .call(Some(&root), json!({ "action": "delete_message", "id": id }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 1);

        let (status, body) = h
            .call(Some(&alice), json!({ "action": "delete_message", "id": id }))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_private_exchange_and_unread() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let bob = h.register("bob").await;

        h.call(
            Some(&alice),
            json!({ "action": "send_private_message", "receiver": "bob", "body": text("hi") }),
        )
        .await;
        h.clock.advance(Duration::from_secs(1));
        h.call(
            Some(&bob),
            json!({ "action": "send_private_message", "receiver": "alice", "body": text("yo") }),
        )
        .await;

        let (_, unread) = h
            .call(Some(&alice), json!({ "action": "get_unread_private_count" }))
            .await;
        assert_eq!(unread["count"], 1);

        let (status, body) = h
            .call(Some(&alice), json!({ "action": "get_private_messages", "peer": "bob" }))
            .await;
        assert_eq!(status, StatusCode::OK);
        let texts: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["body"]["content"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["hi", "yo"]);
        assert_eq!(body["peer_online"], true);

        // Opening the conversation read it; marking again changes nothing.
        let (_, unread) = h
            .call(Some(&alice), json!({ "action": "get_unread_private_count" }))
            .await;
        assert_eq!(unread["count"], 0);
        let (_, marked) = h
            .call(Some(&alice), json!({ "action": "mark_private_read", "peer": "bob" }))
            .await;
        assert_eq!(marked["marked"], 0);

        let (_, list) = h
            .call(Some(&bob), json!({ "action": "get_private_chat_users" }))
            .await;
        assert_eq!(list["conversations"][0]["peer"], "alice");
    }

    #[tokio::test]
    async fn test_private_send_to_unknown_or_self() {
        let h = harness().await;
        let alice = h.register("alice").await;

        let (status, _) = h
            .call(
                Some(&alice),
                json!({ "action": "send_private_message", "receiver": "ghost", "body": text("?") }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .call(
                Some(&alice),
                json!({ "action": "send_private_message", "receiver": "alice", "body": text("me") }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_typing_visible_to_peer() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let bob = h.register("bob").await;

        h.call(Some(&alice), json!({ "action": "typing", "peer": "bob" }))
            .await;
        let (_, body) = h
            .call(Some(&bob), json!({ "action": "get_private_messages", "peer": "alice" }))
            .await;
        assert_eq!(body["peer_typing"], true);

        let (_, body) = h
            .call(Some(&alice), json!({ "action": "get_private_messages", "peer": "bob" }))
            .await;
        assert_eq!(body["peer_typing"], false);
    }

    #[tokio::test]
    async fn test_presence_goes_stale() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let bob = h.register("bob").await;

        let (_, body) = h.call(Some(&alice), json!({ "action": "get_users" })).await;
        assert_eq!(body["online_count"], 2);

        h.clock.advance(ONLINE_WINDOW + Duration::from_secs(1));
        h.call(Some(&bob), json!({ "action": "heartbeat" })).await;

        let (_, body) = h.call(Some(&bob), json!({ "action": "get_users" })).await;
        assert_eq!(body["online_count"], 1);
        assert_eq!(body["users"][0]["handle"], "bob");
        assert_eq!(body["users"][1]["online"], false);
    }

    #[tokio::test]
    async fn test_logout_ends_session() {
        let h = harness().await;
        let alice = h.register("alice").await;

        let (status, _) = h
            .call(Some(&alice), json!({ "action": "logout", "reason": "inactivity" }))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = h.call(Some(&alice), json!({ "action": "heartbeat" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthenticated");
    }

    #[tokio::test]
    async fn test_admin_deletes_user() {
        let h = harness().await;
        let alice = h.register("alice").await;
        let root = h.register("root").await;

        let (status, _) = h
            .call(Some(&alice), json!({ "action": "delete_user", "handle": "root" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = h
            .call(Some(&root), json!({ "action": "delete_user", "handle": "alice" }))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, _) = h.call(Some(&alice), json!({ "action": "heartbeat" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signature_and_user_info() {
        let h = harness().await;
        let alice = h.register("alice").await;

        let (status, body) = h
            .call(
                Some(&alice),
                json!({ "action": "update_signature", "signature": "brb" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["signature"], "brb");

        let (_, body) = h
            .call(Some(&alice), json!({ "action": "get_user_info", "handle": "alice" }))
            .await;
        assert_eq!(body["user"]["signature"], "brb");
        assert_eq!(body["user"]["online"], true);
    }

    #[tokio::test]
    async fn test_upload_then_delete_removes_file() {
        let h = harness().await;
        let alice = h.register("alice").await;

        let boundary = "XBOUNDARYX";
        let multipart = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"cat.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             fake-png-bytes\r\n\
             --{boundary}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::AUTHORIZATION, format!("Bearer {alice}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(multipart))
            .unwrap();
        let (status, uploaded) = read_json(h.router.clone().oneshot(req).await.unwrap()).await;
        assert_eq!(status, StatusCode::OK, "{uploaded}");
        assert_eq!(uploaded["body"]["type"], "image");
        let url = uploaded["body"]["content"]["url"].as_str().unwrap().to_string();

        let fetch = |url: String| {
            let router = h.router.clone();
            async move {
                let req = Request::builder().uri(url).body(Body::empty()).unwrap();
                router.oneshot(req).await.unwrap().status()
            }
        };
        assert_eq!(fetch(url.clone()).await, StatusCode::OK);

        let (_, sent) = h
            .call(
                Some(&alice),
                json!({ "action": "send_message", "body": uploaded["body"].clone() }),
            )
            .await;
        let id = sent["id"].as_i64().unwrap();
        h.call(Some(&alice), json!({ "action": "delete_message", "id": id }))
            .await;

        assert_eq!(fetch(url).await, StatusCode::NOT_FOUND);
    }
}
