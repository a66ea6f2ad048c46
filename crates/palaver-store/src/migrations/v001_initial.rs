//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `messages` and `private_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (identity + presence record)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    handle        TEXT PRIMARY KEY NOT NULL,
    password_hash TEXT NOT NULL,                  -- argon2 PHC string
    role          TEXT NOT NULL DEFAULT 'user',   -- 'user' | 'admin'
    last_active   TEXT,                           -- RFC-3339, micros, UTC
    is_online     INTEGER NOT NULL DEFAULT 0,     -- boolean 0/1
    session_token TEXT,                           -- latest login only
    created_at    TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Room messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    author     TEXT NOT NULL,
    body       TEXT NOT NULL,
    type       TEXT NOT NULL DEFAULT 'text',
    created_at TEXT NOT NULL,

    FOREIGN KEY (author) REFERENCES users(handle) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_created
    ON messages(created_at DESC, id DESC);

-- ----------------------------------------------------------------
-- Directed messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS private_messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    sender     TEXT NOT NULL,
    receiver   TEXT NOT NULL,
    body       TEXT NOT NULL,
    type       TEXT NOT NULL DEFAULT 'text',
    is_read    INTEGER NOT NULL DEFAULT 0,        -- boolean 0/1
    created_at TEXT NOT NULL,

    CHECK (sender <> receiver),
    FOREIGN KEY (sender)   REFERENCES users(handle) ON DELETE CASCADE,
    FOREIGN KEY (receiver) REFERENCES users(handle) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_private_pair_created
    ON private_messages(sender, receiver, created_at DESC, id DESC);

CREATE INDEX IF NOT EXISTS idx_private_unread
    ON private_messages(receiver, is_read);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
