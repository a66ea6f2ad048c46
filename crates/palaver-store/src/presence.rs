//! Presence tracking.
//!
//! Each identity carries two online signals: the `is_online` flag written
//! by heartbeats, and the `last_active` timestamp. Reads resolve them with
//! [`resolve_online`]: online if the flag is set or activity is fresher than
//! [`ONLINE_WINDOW`]. The flag alone survives a crashed client; the
//! timestamp alone cannot tell "never logged in" from "just logged out".
//!
//! [`Database::sweep_presence`] clears the flag on stale rows and runs
//! before every bulk read; single-identity reads sweep their own row, so no
//! read depends on an external timer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::params;
use subtle::ConstantTimeEq;

use palaver_shared::constants::ONLINE_WINDOW;
use palaver_shared::{Handle, PresenceView};

use crate::database::{encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::SessionCheck;
use crate::users::row_to_user;

/// Merged online rule used by every presence read.
pub fn resolve_online(
    is_online: bool,
    last_active: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    if is_online {
        return true;
    }
    match (last_active, chrono::Duration::from_std(window)) {
        (Some(at), Ok(window)) => now - at < window,
        _ => false,
    }
}

impl Database {
    /// Record activity: `last_active = now`, `is_online = true`.
    pub fn touch(&self, handle: &Handle) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET last_active = ?1, is_online = 1 WHERE handle = ?2",
            params![encode_ts(self.now()), handle.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }
        Ok(())
    }

    /// Force `is_online = false` on every record whose last activity is at
    /// least [`ONLINE_WINDOW`] old. Returns how many rows changed.
    pub fn sweep_presence(&self) -> Result<usize> {
        let changed = self.conn().execute(
            "UPDATE users SET is_online = 0
             WHERE is_online = 1 AND (last_active IS NULL OR last_active <= ?1)",
            params![encode_ts(self.presence_cutoff())],
        )?;
        if changed > 0 {
            tracing::debug!(changed, "swept stale presence");
        }
        Ok(changed)
    }

    /// Same as [`Database::sweep_presence`], limited to one identity.
    pub(crate) fn sweep_presence_of(&self, handle: &Handle) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE users SET is_online = 0
             WHERE handle = ?1 AND is_online = 1
               AND (last_active IS NULL OR last_active <= ?2)",
            params![handle.as_str(), encode_ts(self.presence_cutoff())],
        )?;
        Ok(changed > 0)
    }

    fn presence_cutoff(&self) -> DateTime<Utc> {
        let window =
            chrono::Duration::from_std(ONLINE_WINDOW).unwrap_or_else(|_| chrono::Duration::zero());
        self.now() - window
    }

    /// Every identity with resolved presence, online first then by handle.
    pub fn query_presence_all(&self) -> Result<Vec<PresenceView>> {
        self.sweep_presence()?;

        let now = self.now();
        let mut stmt = self.conn().prepare(
            "SELECT handle, password_hash, role, last_active, is_online, session_token, signature, created_at
             FROM users",
        )?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut views = Vec::new();
        for row in rows {
            let user = row?;
            views.push(PresenceView {
                online: resolve_online(user.is_online, user.last_active, now, ONLINE_WINDOW),
                handle: user.handle,
                role: user.role,
                last_active: user.last_active,
            });
        }

        views.sort_by(|a, b| b.online.cmp(&a.online).then_with(|| a.handle.cmp(&b.handle)));
        Ok(views)
    }

    /// Resolved presence of a single identity.
    pub fn query_presence(&self, handle: &Handle) -> Result<PresenceView> {
        self.sweep_presence_of(handle)?;
        let user = self.get_user(handle)?;
        Ok(PresenceView {
            online: resolve_online(user.is_online, user.last_active, self.now(), ONLINE_WINDOW),
            handle: user.handle,
            role: user.role,
            last_active: user.last_active,
        })
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Issue a fresh session token for a login and mark the identity active.
    /// Any previously issued token is superseded.
    pub fn start_session(&self, handle: &Handle) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let affected = self.conn().execute(
            "UPDATE users SET session_token = ?1, last_active = ?2, is_online = 1
             WHERE handle = ?3",
            params![token, encode_ts(self.now()), handle.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }

        tracing::debug!(handle = %handle, "session started");
        Ok(token)
    }

    /// Clear the session and the online flag.
    ///
    /// `last_active` is kept, so the identity still reads as online until
    /// its window elapses.
    pub fn end_session(&self, handle: &Handle) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET session_token = NULL, is_online = 0 WHERE handle = ?1",
            params![handle.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("user '{handle}'")));
        }
        tracing::debug!(handle = %handle, "session ended");
        Ok(())
    }

    /// Compare a presented token with the latest one on record.
    pub fn verify_session(&self, handle: &Handle, token: &str) -> Result<SessionCheck> {
        let user = self.get_user(handle)?;
        Ok(match user.session_token {
            None => SessionCheck::Absent,
            Some(current) if tokens_match(&current, token) => SessionCheck::Valid,
            Some(_) => SessionCheck::Superseded,
        })
    }
}

fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.ct_eq(b).unwrap_u8() == 1
}
