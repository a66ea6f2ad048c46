use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Free-text profile signature
ALTER TABLE users ADD COLUMN signature TEXT;

-- Presence sweep scans by freshness
CREATE INDEX IF NOT EXISTS idx_users_last_active ON users(last_active);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
