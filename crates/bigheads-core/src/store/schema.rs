//! Schema migrations for the node's SQLite database.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE messages (
            msg_id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            msg_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp REAL NOT NULL,
            reply_to TEXT,
            outgoing INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX idx_messages_chat_id ON messages(chat_id, timestamp);

        CREATE TABLE contacts (
            node_id TEXT PRIMARY KEY,
            alias TEXT,
            last_seen REAL,
            blocked INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE seen_messages (
            msg_id TEXT PRIMARY KEY,
            seen_at REAL NOT NULL
        );
        CREATE INDEX idx_seen_messages_seen_at ON seen_messages(seen_at);

        CREATE TABLE routing (
            target_node TEXT PRIMARY KEY,
            via_node TEXT NOT NULL,
            hops INTEGER NOT NULL,
            updated_at REAL NOT NULL
        );

        CREATE TABLE chat_keys (
            chat_id TEXT PRIMARY KEY,
            key_json TEXT NOT NULL,
            updated_at REAL NOT NULL
        );

        CREATE TABLE outbox (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient TEXT NOT NULL,
            envelope_json TEXT NOT NULL,
            created_at REAL NOT NULL
        );
        CREATE INDEX idx_outbox_recipient ON outbox(recipient, id);

        CREATE TABLE reactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            msg_id TEXT NOT NULL,
            reactor TEXT NOT NULL,
            reaction TEXT NOT NULL,
            timestamp REAL NOT NULL
        );
        CREATE INDEX idx_reactions_msg_id ON reactions(msg_id);

        CREATE TABLE typing_state (
            chat_id TEXT PRIMARY KEY,
            node_id TEXT NOT NULL,
            is_typing INTEGER NOT NULL,
            updated_at REAL NOT NULL
        );
        "#,
    )])
}

pub fn run_migrations(conn: &mut Connection) -> Result<(), rusqlite_migration::Error> {
    migrations().to_latest(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_cleanly() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 8);
    }
}
