//! Single-writer SQLite persistence for a node's messages, contacts,
//! routing table, chat keys, outbox, reactions, and typing state.
//!
//! A single connection behind a [`parking_lot::Mutex`] (WAL mode gives us
//! concurrent readers without a connection pool) — the same shape as the
//! desktop client's `DbPool`, minus the encryption-at-rest layer this node
//! doesn't need.

mod models;
mod schema;

pub use models::{Contact, OutboxItem, Reaction, Route, StoredMessage};

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::StoreError;

pub struct Store {
    conn: Mutex<Connection>,
    seen_limit: usize,
}

impl Store {
    pub fn open(db_path: &Path, seen_limit: usize) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Sqlite(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })?;
        }

        let mut conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            seen_limit,
        })
    }

    pub fn save_message(&self, msg: &StoredMessage) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&msg.payload)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO messages
             (msg_id, chat_id, sender, recipient, msg_type, payload, timestamp, reply_to, outgoing)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                msg.msg_id,
                msg.chat_id,
                msg.sender,
                msg.recipient,
                msg.msg_type,
                payload,
                msg.timestamp,
                msg.reply_to,
                msg.outgoing as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_chat_messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT msg_id, chat_id, sender, recipient, msg_type, payload, timestamp, reply_to, outgoing
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(params![chat_id, limit as i64], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn mark_seen(&self, msg_id: &str, seen_at: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO seen_messages (msg_id, seen_at) VALUES (?1, ?2)",
            params![msg_id, seen_at],
        )?;
        conn.execute(
            "DELETE FROM seen_messages
             WHERE msg_id IN (
                SELECT msg_id FROM seen_messages ORDER BY seen_at DESC LIMIT -1 OFFSET ?1
             )",
            params![self.seen_limit as i64],
        )?;
        Ok(())
    }

    pub fn has_seen(&self, msg_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let seen: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM seen_messages WHERE msg_id = ?1",
                params![msg_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(seen.is_some())
    }

    pub fn upsert_contact(&self, node_id: &str, last_seen: f64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO contacts (node_id, last_seen) VALUES (?1, ?2)
             ON CONFLICT(node_id) DO UPDATE SET last_seen = excluded.last_seen",
            params![node_id, last_seen],
        )?;
        Ok(())
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT node_id, alias, last_seen, blocked FROM contacts ORDER BY COALESCE(last_seen, 0) DESC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Contact {
                    node_id: row.get(0)?,
                    alias: row.get(1)?,
                    last_seen: row.get(2)?,
                    blocked: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_blocked(&self, node_id: &str, blocked: bool) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO contacts (node_id, blocked) VALUES (?1, ?2)
             ON CONFLICT(node_id) DO UPDATE SET blocked = excluded.blocked",
            params![node_id, blocked as i64],
        )?;
        Ok(())
    }

    pub fn is_blocked(&self, node_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let blocked: Option<i64> = conn
            .query_row(
                "SELECT blocked FROM contacts WHERE node_id = ?1",
                params![node_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blocked.unwrap_or(0) != 0)
    }

    pub fn update_route(
        &self,
        target: &str,
        via: &str,
        hops: u32,
        ts: f64,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO routing (target_node, via_node, hops, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(target_node) DO UPDATE SET
               via_node = excluded.via_node, hops = excluded.hops, updated_at = excluded.updated_at",
            params![target, via, hops, ts],
        )?;
        Ok(())
    }

    pub fn get_route(&self, target: &str) -> Result<Option<Route>, StoreError> {
        let conn = self.conn.lock();
        let route = conn
            .query_row(
                "SELECT target_node, via_node, hops, updated_at FROM routing WHERE target_node = ?1",
                params![target],
                |row| {
                    Ok(Route {
                        target_node: row.get(0)?,
                        via_node: row.get(1)?,
                        hops: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(route)
    }

    pub fn set_chat_key(
        &self,
        chat_id: &str,
        key_data: &serde_json::Value,
        ts: f64,
    ) -> Result<(), StoreError> {
        let key_json = serde_json::to_string(key_data)?;
        self.conn.lock().execute(
            "INSERT INTO chat_keys (chat_id, key_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET key_json = excluded.key_json, updated_at = excluded.updated_at",
            params![chat_id, key_json, ts],
        )?;
        Ok(())
    }

    pub fn get_chat_key(&self, chat_id: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.conn.lock();
        let key_json: Option<String> = conn
            .query_row(
                "SELECT key_json FROM chat_keys WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match key_json {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        })
    }

    pub fn enqueue_outbox(
        &self,
        recipient: &str,
        envelope: &serde_json::Value,
        ts: f64,
    ) -> Result<(), StoreError> {
        let envelope_json = serde_json::to_string(envelope)?;
        self.conn.lock().execute(
            "INSERT INTO outbox (recipient, envelope_json, created_at) VALUES (?1, ?2, ?3)",
            params![recipient, envelope_json, ts],
        )?;
        Ok(())
    }

    pub fn dequeue_outbox_for(
        &self,
        recipient: &str,
        limit: usize,
    ) -> Result<Vec<OutboxItem>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, envelope_json FROM outbox WHERE recipient = ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![recipient, limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let raw: String = row.get(1)?;
                Ok((id, raw))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, raw)| {
                serde_json::from_str(&raw)
                    .map(|envelope| OutboxItem { id, envelope })
                    .map_err(StoreError::from)
            })
            .collect()
    }

    pub fn delete_outbox_ids(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM outbox WHERE id IN ({placeholders})");
        self.conn
            .lock()
            .execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    pub fn add_reaction(
        &self,
        msg_id: &str,
        reactor: &str,
        reaction: &str,
        ts: f64,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO reactions (msg_id, reactor, reaction, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![msg_id, reactor, reaction, ts],
        )?;
        Ok(())
    }

    pub fn get_reactions(&self, msg_id: &str) -> Result<Vec<Reaction>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT reactor, reaction, timestamp FROM reactions WHERE msg_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![msg_id], |row| {
                Ok(Reaction {
                    reactor: row.get(0)?,
                    reaction: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_typing(
        &self,
        chat_id: &str,
        node_id: &str,
        is_typing: bool,
        ts: f64,
    ) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO typing_state (chat_id, node_id, is_typing, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id) DO UPDATE SET
               node_id = excluded.node_id, is_typing = excluded.is_typing, updated_at = excluded.updated_at",
            params![chat_id, node_id, is_typing as i64, ts],
        )?;
        Ok(())
    }

    pub fn export_chat_json(&self, chat_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT msg_id, chat_id, sender, recipient, msg_type, payload, timestamp, reply_to, outgoing
             FROM messages WHERE chat_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![chat_id], row_to_message)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Clears conversational history only — contacts, routing, and chat
    /// keys survive so the mesh doesn't need to re-handshake.
    pub fn clear_history(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM messages", [])?;
        conn.execute("DELETE FROM reactions", [])?;
        conn.execute("DELETE FROM typing_state", [])?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let payload_raw: String = row.get(5)?;
    let payload = serde_json::from_str(&payload_raw).unwrap_or(serde_json::Value::Null);
    Ok(StoredMessage {
        msg_id: row.get(0)?,
        chat_id: row.get(1)?,
        sender: row.get(2)?,
        recipient: row.get(3)?,
        msg_type: row.get(4)?,
        payload,
        timestamp: row.get(6)?,
        reply_to: row.get(7)?,
        outgoing: row.get::<_, i64>(8)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        let dir = tempfile::tempdir().unwrap();
        Store::open(&dir.path().join("test.db"), 3).unwrap()
    }

    fn msg(msg_id: &str, chat_id: &str, ts: f64) -> StoredMessage {
        StoredMessage {
            msg_id: msg_id.to_string(),
            chat_id: chat_id.to_string(),
            sender: "a".to_string(),
            recipient: "b".to_string(),
            msg_type: "text".to_string(),
            payload: serde_json::json!({"text": "hi"}),
            timestamp: ts,
            reply_to: None,
            outgoing: true,
        }
    }

    #[test]
    fn save_and_fetch_chat_messages_in_timestamp_order() {
        let store = test_store();
        store.save_message(&msg("1", "chat-a", 2.0)).unwrap();
        store.save_message(&msg("2", "chat-a", 1.0)).unwrap();

        let rows = store.get_chat_messages("chat-a", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].msg_id, "2");
        assert_eq!(rows[1].msg_id, "1");
    }

    #[test]
    fn mark_seen_evicts_past_limit() {
        let store = test_store();
        for i in 0..5 {
            store.mark_seen(&format!("m{i}"), i as f64).unwrap();
        }
        assert!(!store.has_seen("m0").unwrap());
        assert!(!store.has_seen("m1").unwrap());
        assert!(store.has_seen("m4").unwrap());
    }

    #[test]
    fn contact_blocking_roundtrips() {
        let store = test_store();
        store.upsert_contact("peer1", 100.0).unwrap();
        assert!(!store.is_blocked("peer1").unwrap());
        store.set_blocked("peer1", true).unwrap();
        assert!(store.is_blocked("peer1").unwrap());
    }

    #[test]
    fn outbox_enqueue_dequeue_and_delete() {
        let store = test_store();
        let envelope = serde_json::json!({"to": "peer2", "kind": "mesh"});
        store.enqueue_outbox("peer2", &envelope, 1.0).unwrap();
        store.enqueue_outbox("peer2", &envelope, 2.0).unwrap();

        let pending = store.dequeue_outbox_for("peer2", 100).unwrap();
        assert_eq!(pending.len(), 2);

        store
            .delete_outbox_ids(&pending.iter().map(|i| i.id).collect::<Vec<_>>())
            .unwrap();
        assert!(store.dequeue_outbox_for("peer2", 100).unwrap().is_empty());
    }

    #[test]
    fn route_upsert_overwrites_prior_hop() {
        let store = test_store();
        store.update_route("peerX", "relay1", 2, 1.0).unwrap();
        store.update_route("peerX", "relay2", 1, 2.0).unwrap();
        let route = store.get_route("peerX").unwrap().unwrap();
        assert_eq!(route.via_node, "relay2");
        assert_eq!(route.hops, 1);
    }

    #[test]
    fn clear_history_spares_contacts_and_routing() {
        let store = test_store();
        store.save_message(&msg("1", "chat-a", 1.0)).unwrap();
        store.upsert_contact("peer1", 1.0).unwrap();
        store.update_route("peer1", "relay", 1, 1.0).unwrap();

        store.clear_history().unwrap();

        assert!(store.get_chat_messages("chat-a", 10).unwrap().is_empty());
        assert_eq!(store.list_contacts().unwrap().len(), 1);
        assert!(store.get_route("peer1").unwrap().is_some());
    }
}
