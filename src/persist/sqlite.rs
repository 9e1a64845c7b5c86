//! SQLite-backed snapshot sink.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::core::book::{Book, BookSnapshotV1};

use super::{BookSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: BookSnapshotV1,
}

/// SQLite implementation of [`crate::persist::BookSink`].
pub struct SqliteBookSink {
    conn: Connection,
}

impl SqliteBookSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the latest saved log, or an empty one.
    pub fn load_book(&self) -> PersistResult<Book> {
        match self.load_latest()? {
            Some(snapshot) => Ok(Book::from_snapshot(snapshot)?),
            None => Ok(Book::new()),
        }
    }

    pub fn snapshot_count(&self) -> PersistResult<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Deletes all but the newest `keep` snapshots.
    pub fn prune(&mut self, keep: usize) -> PersistResult<usize> {
        let count = self.conn.execute(
            "DELETE FROM snapshots WHERE id NOT IN \
             (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )?;
        Ok(count)
    }
}

impl BookSink for SqliteBookSink {
    fn save(&mut self, snapshot: &BookSnapshotV1) -> PersistResult<i64> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(ts_ms, records, payload) VALUES (?1, ?2, ?3)",
            params![now_ms() as i64, snapshot.records.len() as i64, payload],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, records = snapshot.records.len(), "snapshot saved");
        Ok(id)
    }

    fn load_latest(&self) -> PersistResult<Option<BookSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Format(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
