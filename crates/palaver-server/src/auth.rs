//! Passwords and session credentials.
//!
//! Clients present `Authorization: Bearer <handle>:<token>`. The token is
//! the one issued by the latest `login`; an older token for the same handle
//! resolves to [`ChatError::SessionSuperseded`].

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::http::{header, HeaderMap};

use palaver_shared::constants::MIN_PASSWORD_LEN;
use palaver_shared::{ChatError, Handle, Role};
use palaver_store::{Database, SessionCheck, StoreError};

/// The identity a request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub handle: Handle,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Credential parsed from the `Authorization` header, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub handle: Handle,
    pub token: String,
}

pub fn hash_password(password: &str) -> Result<String, ChatError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ChatError::Transient(format!("failed to hash password: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, ChatError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| ChatError::Transient(format!("invalid password hash format: {e}")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub fn check_password_strength(password: &str) -> Result<(), ChatError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ChatError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Parse the bearer credential. A missing header is `Ok(None)`; a header
/// that is present but unreadable is an authentication failure.
pub fn parse_credential(headers: &HeaderMap) -> Result<Option<Credential>, ChatError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let bad = || ChatError::Unauthenticated("malformed authorization header".into());

    let value = value.to_str().map_err(|_| bad())?;
    let rest = value.strip_prefix("Bearer ").ok_or_else(bad)?;
    let (handle, token) = rest.trim().split_once(':').ok_or_else(bad)?;
    if token.is_empty() {
        return Err(bad());
    }

    Ok(Some(Credential {
        handle: Handle::parse(handle).map_err(|_| bad())?,
        token: token.to_string(),
    }))
}

/// Resolve a credential against the presence records.
pub fn authenticate(db: &Database, credential: Option<&Credential>) -> Result<Caller, ChatError> {
    let Some(credential) = credential else {
        return Err(ChatError::Unauthenticated("login required".into()));
    };

    let check = match db.verify_session(&credential.handle, &credential.token) {
        Ok(check) => check,
        Err(StoreError::NotFound(_)) => {
            return Err(ChatError::Unauthenticated("unknown identity".into()));
        }
        Err(other) => return Err(other.into()),
    };

    match check {
        SessionCheck::Valid => Ok(Caller {
            role: db.role_of(&credential.handle)?,
            handle: credential.handle.clone(),
        }),
        SessionCheck::Superseded => {
            tracing::info!(handle = %credential.handle, "rejected superseded session");
            Err(ChatError::SessionSuperseded)
        }
        SessionCheck::Absent => Err(ChatError::Unauthenticated("session has ended".into())),
    }
}
