//! Local chat history on SQLite.

use crate::error::{ChatError, Result};
use crate::models::{Direction, StoredMessage};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

pub struct MessageStore(Mutex<Connection>);

impl MessageStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Message store opened");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                remote_id TEXT NOT NULL,
                text TEXT NOT NULL,
                direction TEXT CHECK(direction IN ('outgoing', 'incoming')) NOT NULL,
                encrypted INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
            ",
        )?;
        Ok(Self(Mutex::new(conn)))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.0
            .lock()
            .map_err(|_| ChatError::Storage("store lock poisoned".to_string()))
    }

    pub fn append_message(
        &self,
        remote_id: &str,
        text: &str,
        direction: Direction,
        encrypted: bool,
        created_at: i64,
    ) -> Result<StoredMessage> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            remote_id: remote_id.to_string(),
            text: text.to_string(),
            direction,
            encrypted,
            created_at,
        };

        self.conn()?.execute(
            "INSERT INTO messages (id, remote_id, text, direction, encrypted, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.remote_id,
                message.text,
                message.direction.as_str(),
                message.encrypted as i32,
                message.created_at
            ],
        )?;
        debug!(id = %message.id, direction = %direction, "Message stored");
        Ok(message)
    }

    /// Every stored message, oldest first. Ties keep insertion order.
    pub fn load_all_messages(&self) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, remote_id, text, direction, encrypted, created_at
             FROM messages
             ORDER BY created_at ASC, seq ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            let direction: String = row.get(3)?;
            Ok(StoredMessage {
                id: row.get(0)?,
                remote_id: row.get(1)?,
                text: row.get(2)?,
                direction: Direction::parse(&direction).unwrap_or(Direction::Incoming),
                encrypted: row.get::<_, i32>(4)? != 0,
                created_at: row.get(5)?,
            })
        })?;

        let messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Delete all history. Returns the number of removed messages.
    pub fn clear_all(&self) -> Result<usize> {
        let removed = self.conn()?.execute("DELETE FROM messages", [])?;
        info!(removed, "Message history cleared");
        Ok(removed)
    }
}
