//! One function per action of the dispatch endpoint.
//!
//! Every handler returns the full `{ "status": "ok", ... }` envelope as a
//! JSON value; failures bubble up as [`ServerError`] and are rendered by its
//! `IntoResponse`.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use palaver_shared::constants::{DEFAULT_ROOM_WINDOW, MAX_WINDOW};
use palaver_shared::protocol::{
    Action, Conversations, Deleted, Empty, Envelope, HeartbeatAck, MarkedRead, PrivateMessages,
    RoomMessages, SessionGrant, Sent, UnreadCount, UserInfoPayload, Users,
};
use palaver_shared::{ChatError, ConversationScope, Handle, Role};
use palaver_store::{Removed, StoreError};

use crate::auth::{self, Caller, Credential};
use crate::error::ServerError;
use crate::state::AppState;

type HandlerResult = Result<Value, ServerError>;

fn ok<T: Serialize>(payload: T) -> HandlerResult {
    serde_json::to_value(Envelope::ok(payload))
        .map_err(|e| ChatError::Transient(format!("failed to encode response: {e}")).into())
}

/// Route a parsed action to its handler.
pub async fn dispatch(
    state: &AppState,
    credential: Option<Credential>,
    action: Action,
) -> HandlerResult {
    let name = action.name();

    let caller = match &action {
        Action::Register { handle, password } => return register(state, handle, password),
        Action::Login { handle, password } => return login(state, handle, password),
        _ => state
            .db
            .with(|db| auth::authenticate(db, credential.as_ref()))?,
    };
    debug!(action = name, handle = %caller.handle, "dispatch");

    match action {
        Action::Register { .. } | Action::Login { .. } => Err(ChatError::Validation(format!(
            "{name} does not take a session"
        ))
        .into()),

        Action::Logout { reason } => {
            state.db.with(|db| db.end_session(&caller.handle))?;
            info!(
                handle = %caller.handle,
                reason = reason.as_deref().unwrap_or("user"),
                "logged out"
            );
            ok(Empty {})
        }

        Action::Heartbeat => {
            let server_time = state.db.with(|db| {
                db.touch(&caller.handle)?;
                Ok::<_, StoreError>(db.now())
            })?;
            ok(HeartbeatAck { server_time })
        }

        Action::GetMessages { limit, offset } => {
            let limit = limit.unwrap_or(DEFAULT_ROOM_WINDOW);
            let offset = offset.unwrap_or(0);
            let messages = state.db.with(|db| db.read_room_window(limit, offset))?;
            ok(RoomMessages { messages })
        }

        Action::SendMessage { body } => {
            let id = state
                .db
                .with(|db| db.append_room_message(&caller.handle, &body))?;
            ok(Sent { id })
        }

        Action::DeleteMessage { id } => {
            let removed = state
                .db
                .with(|db| db.delete_room_message(id, &caller.handle))?;
            finish_delete(state, removed).await
        }

        Action::GetUsers => {
            let users = state.db.with(|db| db.query_presence_all())?;
            let online_count = users.iter().filter(|u| u.online).count();
            ok(Users {
                users,
                online_count,
            })
        }

        Action::GetUserInfo { handle } => {
            let user = state.db.with(|db| db.user_info(&handle))?;
            ok(UserInfoPayload { user })
        }

        Action::SendPrivateMessage { receiver, body } => {
            let id = state
                .db
                .with(|db| db.append_private_message(&caller.handle, &receiver, &body))?;
            state.typing.clear(&caller.handle, &receiver);
            ok(Sent { id })
        }

        Action::GetPrivateMessages {
            peer,
            after_id,
            limit,
        } => get_private_messages(state, &caller, &peer, after_id, limit),

        Action::GetPrivateChatUsers => {
            let conversations = state.db.with(|db| db.distinct_scopes(&caller.handle))?;
            ok(Conversations { conversations })
        }

        Action::GetUnreadPrivateCount => {
            let count = state.db.with(|db| db.unread_count(&caller.handle))?;
            ok(UnreadCount { count })
        }

        Action::MarkPrivateRead { peer } => {
            let scope = ConversationScope::direct(&caller.handle, &peer)?;
            let marked = state.db.with(|db| db.mark_read(&scope, &caller.handle))?;
            ok(MarkedRead {
                marked: marked as u64,
            })
        }

        Action::DeletePrivateMessage { id } => {
            let removed = state
                .db
                .with(|db| db.delete_private_message(id, &caller.handle))?;
            finish_delete(state, removed).await
        }

        Action::DeletePrivateChatHistory { peer } => {
            let scope = ConversationScope::direct(&caller.handle, &peer)?;
            let removed = state
                .db
                .with(|db| db.delete_private_history(&scope, &caller.handle))?;
            finish_delete(state, removed).await
        }

        Action::Typing { peer } => {
            if peer == caller.handle {
                return Err(ChatError::Validation("cannot type to yourself".into()).into());
            }
            state.typing.mark(&caller.handle, &peer);
            ok(Empty {})
        }

        Action::UpdateSignature { signature } => {
            let user = state.db.with(|db| {
                db.set_signature(&caller.handle, signature.as_deref())?;
                db.user_info(&caller.handle)
            })?;
            ok(UserInfoPayload { user })
        }

        Action::ChangePassword {
            current_password,
            new_password,
        } => change_password(state, &caller, &current_password, &new_password),

        Action::DeleteUser { handle } => delete_user(state, &caller, &handle).await,
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

fn register(state: &AppState, handle: &str, password: &str) -> HandlerResult {
    if !state.config.registration_open {
        return Err(ChatError::PermissionDenied("registration is closed".into()).into());
    }
    let handle = Handle::parse(handle)?;
    auth::check_password_strength(password)?;
    let hash = auth::hash_password(password)?;

    let role = if state.config.admin_handle.as_ref() == Some(&handle) {
        Role::Admin
    } else {
        Role::User
    };

    let token = state.db.with(|db| {
        db.create_user(&handle, &hash, role)?;
        db.start_session(&handle)
    })?;

    ok(SessionGrant {
        handle,
        role,
        token,
    })
}

fn login(state: &AppState, handle: &str, password: &str) -> HandlerResult {
    let rejected = || ChatError::Unauthenticated("invalid handle or password".into());

    let handle = Handle::parse(handle).map_err(|_| rejected())?;
    let user = match state.db.with(|db| db.get_user(&handle)) {
        Ok(user) => user,
        Err(ChatError::NotFound(_)) => return Err(rejected().into()),
        Err(e) => return Err(e.into()),
    };
    if !auth::verify_password(password, &user.password_hash)? {
        info!(handle = %handle, "failed login");
        return Err(rejected().into());
    }

    let token = state.db.with(|db| db.start_session(&handle))?;
    info!(handle = %handle, "logged in");
    ok(SessionGrant {
        handle,
        role: user.role,
        token,
    })
}

fn change_password(state: &AppState, caller: &Caller, current: &str, new: &str) -> HandlerResult {
    let user = state.db.with(|db| db.get_user(&caller.handle))?;
    if !auth::verify_password(current, &user.password_hash)? {
        return Err(ChatError::PermissionDenied("current password is incorrect".into()).into());
    }
    auth::check_password_strength(new)?;
    let hash = auth::hash_password(new)?;
    state
        .db
        .with(|db| db.set_password_hash(&caller.handle, &hash))?;
    info!(handle = %caller.handle, "password changed");
    ok(Empty {})
}

async fn delete_user(state: &AppState, caller: &Caller, target: &Handle) -> HandlerResult {
    if !caller.is_admin() {
        return Err(ChatError::PermissionDenied("admin role required".into()).into());
    }
    if target == &caller.handle {
        return Err(ChatError::Validation("admins cannot delete themselves".into()).into());
    }
    let removed = state.db.with(|db| db.delete_user(target))?;
    info!(admin = %caller.handle, target = %target, "user deleted");
    finish_delete(state, removed).await
}

// ---------------------------------------------------------------------------
// Private messages
// ---------------------------------------------------------------------------

/// Read a pair scope. Fetching the conversation also marks the caller's
/// inbound messages read, as the view is open.
fn get_private_messages(
    state: &AppState,
    caller: &Caller,
    peer: &Handle,
    after_id: Option<i64>,
    limit: Option<u32>,
) -> HandlerResult {
    let scope = ConversationScope::direct(&caller.handle, peer)?;
    let limit = limit.unwrap_or(MAX_WINDOW);

    let (messages, peer_online) = state.db.with(|db| {
        let presence = db.query_presence(peer)?;
        let messages = match after_id {
            Some(after) => db.read_private_since(&scope, after, limit)?,
            None => db.read_private_window(&scope, limit, 0)?,
        };
        db.mark_read(&scope, &caller.handle)?;
        Ok::<_, StoreError>((messages, presence.online))
    })?;

    ok(PrivateMessages {
        messages,
        peer_online,
        peer_typing: state.typing.is_typing(peer, &caller.handle),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn finish_delete(state: &AppState, removed: Removed) -> HandlerResult {
    if !removed.blob_ids.is_empty() {
        state.blob_store.discard(&removed.blob_ids).await;
    }
    ok(Deleted {
        deleted: removed.rows,
    })
}
