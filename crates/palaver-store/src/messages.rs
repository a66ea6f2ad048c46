//! The shared room's message log.
//!
//! Reads scan newest-first through `idx_messages_created` and are reversed
//! before returning, so callers always see ascending `(created_at, id)`.

use std::collections::HashSet;

use rusqlite::params;
use uuid::Uuid;

use palaver_shared::constants::MAX_WINDOW;
use palaver_shared::{Handle, MessageBody};

use crate::database::{decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{Removed, RoomMessage};
use crate::users::decode_handle;

impl Database {
    /// Append a message to the room and refresh the author's presence.
    /// Returns the store-assigned id.
    pub fn append_room_message(&self, author: &Handle, body: &MessageBody) -> Result<i64> {
        body.validate()?;
        let (kind, raw) = body.to_storage();
        let now = encode_ts(self.now());

        let tx = self.conn().unchecked_transaction()?;
        let touched = tx.execute(
            "UPDATE users SET last_active = ?1, is_online = 1 WHERE handle = ?2",
            params![now, author.as_str()],
        )?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("user '{author}'")));
        }
        tx.execute(
            "INSERT INTO messages (author, body, type, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![author.as_str(), raw, kind, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, author = %author, kind = %body.kind(), "room message stored");
        Ok(id)
    }

    /// Up to `limit` of the newest messages, skipping the `offset` newest,
    /// in ascending order.
    pub fn read_room_window(&self, limit: u32, offset: u32) -> Result<Vec<RoomMessage>> {
        let limit = limit.min(MAX_WINDOW);
        let mut stmt = self.conn().prepare(
            "SELECT id, author, body, type, created_at
             FROM messages
             ORDER BY created_at DESC, id DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt.query_map(params![limit, offset], row_to_room_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn get_room_message(&self, id: i64) -> Result<RoomMessage> {
        self.conn()
            .query_row(
                "SELECT id, author, body, type, created_at FROM messages WHERE id = ?1",
                params![id],
                row_to_room_message,
            )
            .map_err(not_found(format!("message {id}")))
    }

    pub fn count_room_messages(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Delete a room message. Only its author or an admin may do so.
    ///
    /// Ownership is checked before the delete; if a concurrent request
    /// removes the row in between, this call reports `NotFound`.
    pub fn delete_room_message(&self, id: i64, requester: &Handle) -> Result<Removed> {
        let message = self.get_room_message(id)?;

        if &message.author != requester && !self.role_of(requester)?.is_admin() {
            return Err(StoreError::PermissionDenied(
                "only the author or an admin can delete this message".into(),
            ));
        }

        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }

        tracing::info!(id, requester = %requester, "room message deleted");
        Ok(Removed {
            rows: affected as u64,
            blob_ids: message.body.blob_id().into_iter().collect(),
        })
    }

    /// Every upload still referenced by a room or private message.
    pub fn referenced_blob_ids(&self) -> Result<HashSet<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT type, body FROM messages WHERE type IN ('image', 'file')
             UNION ALL
             SELECT type, body FROM private_messages WHERE type IN ('image', 'file')",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(0)?;
            let body: String = row.get(1)?;
            Ok(MessageBody::from_storage(&kind, body).blob_id())
        })?;

        let mut ids = HashSet::new();
        for row in rows {
            if let Some(id) = row? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}

fn row_to_room_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomMessage> {
    let id: i64 = row.get(0)?;
    let author = decode_handle(row.get(1)?, 1)?;
    let raw: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    Ok(RoomMessage {
        id,
        author,
        body: MessageBody::from_storage(&kind, raw),
        created_at: decode_ts(&ts_str, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use palaver_shared::{AssetRef, ManualClock, Role};

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    fn setup() -> (Database, ManualClock) {
        let clock = ManualClock::default();
        let db = Database::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        db.create_user(&h("alice"), "hash", Role::User).unwrap();
        db.create_user(&h("bob"), "hash", Role::User).unwrap();
        db.create_user(&h("root"), "hash", Role::Admin).unwrap();
        (db, clock)
    }

    #[test]
    fn test_window_is_ascending_and_idempotent() {
        let (db, clock) = setup();
        for i in 0..10 {
            db.append_room_message(&h("alice"), &MessageBody::text(format!("m{i}")))
                .unwrap();
            // Several messages share a timestamp; ids break the tie.
            if i % 3 == 0 {
                clock.advance(Duration::from_millis(10));
            }
        }

        let first = db.read_room_window(50, 0).unwrap();
        assert_eq!(first.len(), 10);
        for pair in first.windows(2) {
            assert!(
                (pair[0].created_at, pair[0].id) < (pair[1].created_at, pair[1].id),
                "window must be strictly ascending"
            );
        }
        let texts: Vec<String> = first.iter().map(|m| m.body.plain_text()).collect();
        assert_eq!(texts.first().map(String::as_str), Some("m0"));
        assert_eq!(texts.last().map(String::as_str), Some("m9"));

        let second = db.read_room_window(50, 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_window_limit_and_offset() {
        let (db, _clock) = setup();
        for i in 0..6 {
            db.append_room_message(&h("alice"), &MessageBody::text(format!("m{i}")))
                .unwrap();
        }

        let newest = db.read_room_window(2, 0).unwrap();
        let texts: Vec<String> = newest.iter().map(|m| m.body.plain_text()).collect();
        assert_eq!(texts, vec!["m4", "m5"]);

        let older = db.read_room_window(2, 2).unwrap();
        let texts: Vec<String> = older.iter().map(|m| m.body.plain_text()).collect();
        assert_eq!(texts, vec!["m2", "m3"]);
    }

    #[test]
    fn test_append_rejects_empty_body() {
        let (db, _clock) = setup();
        let err = db
            .append_room_message(&h("alice"), &MessageBody::text("  "))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(db.count_room_messages().unwrap(), 0);
    }

    #[test]
    fn test_append_touches_author() {
        let (db, _clock) = setup();
        assert!(!db.query_presence(&h("bob")).unwrap().online);
        db.append_room_message(&h("bob"), &MessageBody::text("hi"))
            .unwrap();
        assert!(db.query_presence(&h("bob")).unwrap().online);
    }

    #[test]
    fn test_delete_permissions() {
        let (db, _clock) = setup();
        let id = db
            .append_room_message(&h("alice"), &MessageBody::text("mine"))
            .unwrap();

        let err = db.delete_room_message(id, &h("bob")).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        db.delete_room_message(id, &h("alice")).unwrap();
        let err = db.delete_room_message(id, &h("alice")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_admin_may_delete_and_gets_blob() {
        let (db, _clock) = setup();
        let blob = Uuid::new_v4();
        let id = db
            .append_room_message(
                &h("alice"),
                &MessageBody::Image(AssetRef {
                    url: format!("/uploads/{blob}"),
                    name: None,
                    size: None,
                    blob_id: Some(blob),
                }),
            )
            .unwrap();

        let removed = db.delete_room_message(id, &h("root")).unwrap();
        assert_eq!(removed.blob_ids, vec![blob]);
    }

    #[test]
    fn test_referenced_blobs_cover_both_logs() {
        let (db, _clock) = setup();
        let asset = |blob: Uuid| AssetRef {
            url: format!("/uploads/{blob}"),
            name: Some("a.png".into()),
            size: Some(3),
            blob_id: Some(blob),
        };
        let (room_blob, private_blob) = (Uuid::new_v4(), Uuid::new_v4());
        db.append_room_message(&h("alice"), &MessageBody::Image(asset(room_blob)))
            .unwrap();
        db.append_room_message(&h("alice"), &MessageBody::text("no upload"))
            .unwrap();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::File(asset(private_blob)))
            .unwrap();

        let referenced = db.referenced_blob_ids().unwrap();
        assert_eq!(referenced, HashSet::from([room_blob, private_blob]));
    }

    #[test]
    fn test_malformed_row_is_kept() {
        let (db, _clock) = setup();
        db.conn()
            .execute(
                "INSERT INTO messages (author, body, type, created_at)
                 VALUES ('alice', '{broken', 'image', '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();

        let window = db.read_room_window(10, 0).unwrap();
        assert_eq!(window.len(), 1);
        assert!(matches!(window[0].body, MessageBody::Malformed { .. }));
    }

    #[test]
    fn test_concurrent_appends_keep_every_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concurrent.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.create_user(&h("alice"), "hash", Role::User).unwrap();
            db.create_user(&h("bob"), "hash", Role::User).unwrap();
        }

        let writers: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|name| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = Database::open_at(&path).unwrap();
                    (0..50)
                        .map(|i| {
                            db.append_room_message(&h(name), &MessageBody::text(format!("{name}-{i}")))
                                .unwrap()
                        })
                        .collect::<Vec<i64>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for writer in writers {
            for id in writer.join().unwrap() {
                assert!(ids.insert(id), "duplicate id {id}");
            }
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(ids.len(), 100);
        assert_eq!(db.count_room_messages().unwrap(), 100);
    }
}
