//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the clock
//! every stored timestamp is read from.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::Connection;

use palaver_shared::{Clock, SystemClock};

use crate::error::{Result, StoreError};
use crate::migrations;

/// How long a writer waits for a competing connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/palaver/palaver.db`
    /// - macOS:   `~/Library/Application Support/org.palaver.palaver/palaver.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\palaver\palaver\data\palaver.db`
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("org", "palaver", "palaver").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("palaver.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets pollers read while a send is being written.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::prepare(conn)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the clock timestamps are taken from.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// Timestamp encoding
// ---------------------------------------------------------------------------

/// Encode a timestamp for storage.
///
/// Fixed-width RFC-3339 with microseconds, so lexical order in SQLite equals
/// chronological order.
pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Map a missing row to [`StoreError::NotFound`].
pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let what = what.into();
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(what),
        other => StoreError::Sqlite(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());

        // Reopening runs no migration twice.
        drop(db);
        Database::open_at(&path).expect("should reopen");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early: DateTime<Utc> = "2024-01-01T00:00:09.5Z".parse().unwrap();
        let late: DateTime<Utc> = "2024-01-01T00:00:10Z".parse().unwrap();
        assert!(encode_ts(early) < encode_ts(late));
        assert_eq!(decode_ts(&encode_ts(late), 0).unwrap(), late);
    }
}
