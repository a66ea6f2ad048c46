//! CRUD operations for identities.

use rusqlite::{params, OptionalExtension};

use palaver_shared::constants::{MAX_SIGNATURE_CHARS, ONLINE_WINDOW};
use palaver_shared::{Handle, MessageBody, Role};

use crate::database::{decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{Removed, UserInfo, UserRecord};
use crate::presence::resolve_online;

const USER_COLUMNS: &str =
    "handle, password_hash, role, last_active, is_online, session_token, signature, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Register a new identity. Fails with [`StoreError::Conflict`] if the
    /// handle is taken.
    pub fn create_user(&self, handle: &Handle, password_hash: &str, role: Role) -> Result<UserRecord> {
        let now = self.now();
        let inserted = self.conn().execute(
            "INSERT INTO users (handle, password_hash, role, is_online, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![handle.as_str(), password_hash, role.as_str(), encode_ts(now)],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Conflict(format!(
                    "handle '{handle}' is already registered"
                )));
            }
            Err(other) => return Err(other.into()),
        }

        tracing::info!(handle = %handle, role = role.as_str(), "registered user");
        self.get_user(handle)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, handle: &Handle) -> Result<UserRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE handle = ?1"),
                params![handle.as_str()],
                row_to_user,
            )
            .map_err(not_found(format!("user '{handle}'")))
    }

    pub fn user_exists(&self, handle: &Handle) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM users WHERE handle = ?1",
                params![handle.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn role_of(&self, handle: &Handle) -> Result<Role> {
        Ok(self.get_user(handle)?.role)
    }

    pub fn count_users(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Public profile with resolved presence.
    pub fn user_info(&self, handle: &Handle) -> Result<UserInfo> {
        self.sweep_presence_of(handle)?;
        let user = self.get_user(handle)?;
        let online = resolve_online(user.is_online, user.last_active, self.now(), ONLINE_WINDOW);
        Ok(UserInfo {
            handle: user.handle,
            role: user.role,
            signature: user.signature,
            online,
            last_active: user.last_active,
            created_at: user.created_at,
        })
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_password_hash(&self, handle: &Handle, password_hash: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE handle = ?2",
            params![password_hash, handle.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }
        Ok(())
    }

    /// Set or clear the free-text signature. Blank input clears it.
    pub fn set_signature(&self, handle: &Handle, signature: Option<&str>) -> Result<()> {
        let signature = signature.map(str::trim).filter(|s| !s.is_empty());
        if let Some(s) = signature {
            if s.chars().count() > MAX_SIGNATURE_CHARS {
                return Err(StoreError::Validation(format!(
                    "signature exceeds {MAX_SIGNATURE_CHARS} characters"
                )));
            }
        }

        let affected = self.conn().execute(
            "UPDATE users SET signature = ?1 WHERE handle = ?2",
            params![signature, handle.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove an identity and, through the foreign keys, every message it
    /// authored, sent or received. Returns the uploaded blobs those messages
    /// referenced.
    pub fn delete_user(&self, handle: &Handle) -> Result<Removed> {
        let tx = self.conn().unchecked_transaction()?;

        let mut blob_ids = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT type, body FROM messages
                 WHERE author = ?1 AND type IN ('image', 'file')
                 UNION ALL
                 SELECT type, body FROM private_messages
                 WHERE (sender = ?1 OR receiver = ?1) AND type IN ('image', 'file')",
            )?;
            let rows = stmt.query_map(params![handle.as_str()], |row| {
                let kind: String = row.get(0)?;
                let body: String = row.get(1)?;
                Ok(MessageBody::from_storage(&kind, body).blob_id())
            })?;
            for row in rows {
                if let Some(id) = row? {
                    blob_ids.push(id);
                }
            }
        }

        let affected = tx.execute("DELETE FROM users WHERE handle = ?1", params![handle.as_str()])?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }
        tx.commit()?;

        tracing::info!(handle = %handle, blobs = blob_ids.len(), "deleted user");
        Ok(Removed {
            rows: affected as u64,
            blob_ids,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn decode_handle(raw: String, column: usize) -> rusqlite::Result<Handle> {
    Handle::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn decode_role(raw: &str, column: usize) -> rusqlite::Result<Role> {
    Role::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            format!("unknown role '{raw}'").into(),
        )
    })
}

/// Map a `rusqlite::Row` selected with `USER_COLUMNS` to a [`UserRecord`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    let handle = decode_handle(row.get(0)?, 0)?;
    let password_hash: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let last_active_str: Option<String> = row.get(3)?;
    let is_online: bool = row.get(4)?;
    let session_token: Option<String> = row.get(5)?;
    let signature: Option<String> = row.get(6)?;
    let created_str: String = row.get(7)?;

    let last_active = last_active_str
        .map(|s| decode_ts(&s, 3))
        .transpose()?;

    Ok(UserRecord {
        handle,
        password_hash,
        role: decode_role(&role_str, 2)?,
        last_active,
        is_online,
        session_token,
        signature,
        created_at: decode_ts(&created_str, 7)?,
    })
}
