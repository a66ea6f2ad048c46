//! Directed messages between two identities.
//!
//! A pair scope `{A, B}` covers both directions. Reads return ascending
//! `(created_at, id)`; window reads scan newest-first and reverse.

use rusqlite::params;

use palaver_shared::constants::MAX_WINDOW;
use palaver_shared::{ConversationScope, Handle, MessageBody};

use crate::database::{decode_ts, encode_ts, not_found, Database};
use crate::error::{Result, StoreError};
use crate::models::{ConversationSummary, PrivateMessage, Removed};
use crate::users::decode_handle;

const PRIVATE_COLUMNS: &str = "id, sender, receiver, body, type, is_read, created_at";

/// The two participants of a pair scope.
fn pair(scope: &ConversationScope) -> Result<(&Handle, &Handle)> {
    match scope {
        ConversationScope::Direct { low, high } => Ok((low, high)),
        ConversationScope::Room => Err(StoreError::Validation(
            "the room is not a private conversation".into(),
        )),
    }
}

impl Database {
    /// Send a directed message and refresh the sender's presence.
    ///
    /// The receiver must be a known identity different from the sender.
    pub fn append_private_message(
        &self,
        sender: &Handle,
        receiver: &Handle,
        body: &MessageBody,
    ) -> Result<i64> {
        if sender == receiver {
            return Err(StoreError::Validation(
                "cannot send a private message to yourself".into(),
            ));
        }
        body.validate()?;
        if !self.user_exists(receiver)? {
            return Err(StoreError::Validation(format!(
                "unknown receiver '{receiver}'"
            )));
        }

        let (kind, raw) = body.to_storage();
        let now = encode_ts(self.now());

        let tx = self.conn().unchecked_transaction()?;
        let touched = tx.execute(
            "UPDATE users SET last_active = ?1, is_online = 1 WHERE handle = ?2",
            params![now, sender.as_str()],
        )?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("user '{sender}'")));
        }
        tx.execute(
            "INSERT INTO private_messages (sender, receiver, body, type, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![sender.as_str(), receiver.as_str(), raw, kind, now],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::debug!(id, sender = %sender, receiver = %receiver, "private message stored");
        Ok(id)
    }

    /// Bounded snapshot of a pair scope in ascending order.
    pub fn read_private_window(
        &self,
        scope: &ConversationScope,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PrivateMessage>> {
        let (a, b) = pair(scope)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PRIVATE_COLUMNS}
             FROM private_messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY created_at DESC, id DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), limit.min(MAX_WINDOW), offset],
            row_to_private_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Messages of a pair scope with `id > after_id`, oldest first.
    pub fn read_private_since(
        &self,
        scope: &ConversationScope,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<PrivateMessage>> {
        let (a, b) = pair(scope)?;
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PRIVATE_COLUMNS}
             FROM private_messages
             WHERE ((sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1))
               AND id > ?3
             ORDER BY created_at ASC, id ASC
             LIMIT ?4"
        ))?;
        let rows = stmt.query_map(
            params![a.as_str(), b.as_str(), after_id, limit.min(MAX_WINDOW)],
            row_to_private_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_private_message(&self, id: i64) -> Result<PrivateMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {PRIVATE_COLUMNS} FROM private_messages WHERE id = ?1"),
                params![id],
                row_to_private_message,
            )
            .map_err(not_found(format!("private message {id}")))
    }

    /// Mark every unread message addressed to `receiver` within the scope as
    /// read. Returns how many flipped; a second call returns 0.
    pub fn mark_read(&self, scope: &ConversationScope, receiver: &Handle) -> Result<usize> {
        let sender = scope.peer_of(receiver).ok_or_else(|| {
            StoreError::PermissionDenied(format!("'{receiver}' is not part of this conversation"))
        })?;
        let changed = self.conn().execute(
            "UPDATE private_messages SET is_read = 1
             WHERE sender = ?1 AND receiver = ?2 AND is_read = 0",
            params![sender.as_str(), receiver.as_str()],
        )?;
        if changed > 0 {
            tracing::debug!(changed, receiver = %receiver, peer = %sender, "marked read");
        }
        Ok(changed)
    }

    /// Unread directed messages addressed to `receiver`, across all scopes.
    pub fn unread_count(&self, receiver: &Handle) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM private_messages WHERE receiver = ?1 AND is_read = 0",
            params![receiver.as_str()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Every pair scope `identity` has touched, most recent activity first.
    pub fn distinct_scopes(&self, identity: &Handle) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT CASE WHEN sender = ?1 THEN receiver ELSE sender END AS peer,
                    MAX(created_at) AS last_at,
                    SUM(CASE WHEN receiver = ?1 AND is_read = 0 THEN 1 ELSE 0 END) AS unread
             FROM private_messages
             WHERE sender = ?1 OR receiver = ?1
             GROUP BY peer
             ORDER BY last_at DESC, peer ASC",
        )?;
        let rows = stmt.query_map(params![identity.as_str()], |row| {
            let peer = decode_handle(row.get(0)?, 0)?;
            let last_at: String = row.get(1)?;
            let unread: i64 = row.get(2)?;
            Ok(ConversationSummary {
                peer,
                last_message_at: decode_ts(&last_at, 1)?,
                unread: unread as u64,
            })
        })?;

        let mut scopes = Vec::new();
        for row in rows {
            scopes.push(row?);
        }
        Ok(scopes)
    }

    /// Delete a directed message. Only its sender or an admin may do so.
    pub fn delete_private_message(&self, id: i64, requester: &Handle) -> Result<Removed> {
        let message = self.get_private_message(id)?;

        if &message.sender != requester && !self.role_of(requester)?.is_admin() {
            return Err(StoreError::PermissionDenied(
                "only the sender or an admin can delete this message".into(),
            ));
        }

        let affected = self
            .conn()
            .execute("DELETE FROM private_messages WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(StoreError::NotFound(format!("private message {id}")));
        }

        tracing::info!(id, requester = %requester, "private message deleted");
        Ok(Removed {
            rows: affected as u64,
            blob_ids: message.body.blob_id().into_iter().collect(),
        })
    }

    /// Delete every message of a pair scope. The requester must be one of
    /// the pair or an admin.
    pub fn delete_private_history(
        &self,
        scope: &ConversationScope,
        requester: &Handle,
    ) -> Result<Removed> {
        let (a, b) = pair(scope)?;
        if !scope.includes(requester) && !self.role_of(requester)?.is_admin() {
            return Err(StoreError::PermissionDenied(
                "only participants or an admin can clear this conversation".into(),
            ));
        }

        let tx = self.conn().unchecked_transaction()?;
        let mut blob_ids = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT type, body FROM private_messages
                 WHERE ((sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1))
                   AND type IN ('image', 'file')",
            )?;
            let rows = stmt.query_map(params![a.as_str(), b.as_str()], |row| {
                let kind: String = row.get(0)?;
                let raw: String = row.get(1)?;
                Ok(MessageBody::from_storage(&kind, raw).blob_id())
            })?;
            for row in rows {
                if let Some(id) = row? {
                    blob_ids.push(id);
                }
            }
        }
        let affected = tx.execute(
            "DELETE FROM private_messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
            params![a.as_str(), b.as_str()],
        )?;
        tx.commit()?;

        tracing::info!(scope = %scope, requester = %requester, rows = affected, "private history cleared");
        Ok(Removed {
            rows: affected as u64,
            blob_ids,
        })
    }
}

fn row_to_private_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrivateMessage> {
    let id: i64 = row.get(0)?;
    let sender = decode_handle(row.get(1)?, 1)?;
    let receiver = decode_handle(row.get(2)?, 2)?;
    let raw: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let is_read: bool = row.get(5)?;
    let ts_str: String = row.get(6)?;

    Ok(PrivateMessage {
        id,
        sender,
        receiver,
        body: MessageBody::from_storage(&kind, raw),
        is_read,
        created_at: decode_ts(&ts_str, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use palaver_shared::{ManualClock, Role};

    fn h(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    fn setup() -> (Database, ManualClock) {
        let clock = ManualClock::default();
        let db = Database::open_in_memory()
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        for name in ["alice", "bob", "carol"] {
            db.create_user(&h(name), "hash", Role::User).unwrap();
        }
        db.create_user(&h("root"), "hash", Role::Admin).unwrap();
        (db, clock)
    }

    fn scope(a: &str, b: &str) -> ConversationScope {
        ConversationScope::direct(&h(a), &h(b)).unwrap()
    }

    #[test]
    fn test_exchange_is_seen_in_order_by_both_sides() {
        let (db, clock) = setup();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text("hi"))
            .unwrap();
        clock.advance(Duration::from_secs(1));
        db.append_private_message(&h("bob"), &h("alice"), &MessageBody::text("yo"))
            .unwrap();

        let as_alice = db.read_private_window(&scope("alice", "bob"), 50, 0).unwrap();
        let as_bob = db.read_private_window(&scope("bob", "alice"), 50, 0).unwrap();
        assert_eq!(as_alice, as_bob);

        let texts: Vec<String> = as_alice.iter().map(|m| m.body.plain_text()).collect();
        assert_eq!(texts, vec!["hi", "yo"]);
    }

    #[test]
    fn test_scopes_do_not_leak() {
        let (db, _clock) = setup();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text("ab"))
            .unwrap();
        db.append_private_message(&h("alice"), &h("carol"), &MessageBody::text("ac"))
            .unwrap();

        let ab = db.read_private_window(&scope("alice", "bob"), 50, 0).unwrap();
        assert_eq!(ab.len(), 1);
        assert_eq!(ab[0].body.plain_text(), "ab");
    }

    #[test]
    fn test_append_validation() {
        let (db, _clock) = setup();
        let text = MessageBody::text("hi");

        let to_self = db.append_private_message(&h("alice"), &h("alice"), &text);
        assert!(matches!(to_self.unwrap_err(), StoreError::Validation(_)));

        let unknown = db.append_private_message(&h("alice"), &h("ghost"), &text);
        assert!(matches!(unknown.unwrap_err(), StoreError::Validation(_)));

        let empty = db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text(""));
        assert!(matches!(empty.unwrap_err(), StoreError::Validation(_)));
    }

    #[test]
    fn test_read_since_filters_by_id() {
        let (db, _clock) = setup();
        let first = db
            .append_private_message(&h("alice"), &h("bob"), &MessageBody::text("1"))
            .unwrap();
        let second = db
            .append_private_message(&h("bob"), &h("alice"), &MessageBody::text("2"))
            .unwrap();

        let newer = db.read_private_since(&scope("alice", "bob"), first, 50).unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].id, second);

        assert!(db
            .read_private_since(&scope("alice", "bob"), second, 50)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let (db, _clock) = setup();
        for text in ["a", "b", "c"] {
            db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text(text))
                .unwrap();
        }
        db.append_private_message(&h("carol"), &h("bob"), &MessageBody::text("d"))
            .unwrap();
        assert_eq!(db.unread_count(&h("bob")).unwrap(), 4);

        assert_eq!(db.mark_read(&scope("alice", "bob"), &h("bob")).unwrap(), 3);
        let once = db.unread_count(&h("bob")).unwrap();
        assert_eq!(db.mark_read(&scope("alice", "bob"), &h("bob")).unwrap(), 0);
        let twice = db.unread_count(&h("bob")).unwrap();

        assert_eq!(once, 1);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mark_read_does_not_touch_own_messages() {
        let (db, _clock) = setup();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text("a"))
            .unwrap();
        // alice opening the conversation must not mark bob's inbox read
        assert_eq!(db.mark_read(&scope("alice", "bob"), &h("alice")).unwrap(), 0);
        assert_eq!(db.unread_count(&h("bob")).unwrap(), 1);
    }

    #[test]
    fn test_distinct_scopes_most_recent_first() {
        let (db, clock) = setup();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text("1"))
            .unwrap();
        clock.advance(Duration::from_secs(5));
        db.append_private_message(&h("carol"), &h("alice"), &MessageBody::text("2"))
            .unwrap();
        clock.advance(Duration::from_secs(5));
        db.append_private_message(&h("bob"), &h("alice"), &MessageBody::text("3"))
            .unwrap();

        let scopes = db.distinct_scopes(&h("alice")).unwrap();
        let peers: Vec<String> = scopes.iter().map(|s| s.peer.to_string()).collect();
        assert_eq!(peers, vec!["bob", "carol"]);
        assert_eq!(scopes[0].unread, 1);
        assert_eq!(scopes[1].unread, 1);
        assert!(scopes[0].last_message_at > scopes[1].last_message_at);
    }

    #[test]
    fn test_delete_permissions_and_double_delete() {
        let (db, _clock) = setup();
        let id = db
            .append_private_message(&h("alice"), &h("bob"), &MessageBody::text("x"))
            .unwrap();

        // The receiver may not delete the sender's message.
        let err = db.delete_private_message(id, &h("bob")).unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        db.delete_private_message(id, &h("root")).unwrap();
        let err = db.delete_private_message(id, &h("alice")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_history() {
        let (db, _clock) = setup();
        db.append_private_message(&h("alice"), &h("bob"), &MessageBody::text("1"))
            .unwrap();
        db.append_private_message(&h("bob"), &h("alice"), &MessageBody::text("2"))
            .unwrap();
        db.append_private_message(&h("alice"), &h("carol"), &MessageBody::text("3"))
            .unwrap();

        let err = db
            .delete_private_history(&scope("alice", "bob"), &h("carol"))
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied(_)));

        let removed = db
            .delete_private_history(&scope("alice", "bob"), &h("bob"))
            .unwrap();
        assert_eq!(removed.rows, 2);
        assert!(db
            .read_private_window(&scope("alice", "bob"), 50, 0)
            .unwrap()
            .is_empty());
        assert_eq!(
            db.read_private_window(&scope("alice", "carol"), 50, 0)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_room_scope_rejected() {
        let (db, _clock) = setup();
        let err = db
            .read_private_window(&ConversationScope::Room, 10, 0)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
