pub mod sqlite;

use thiserror::Error;

use crate::core::book::{BookError, BookSnapshotV1};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("stored snapshot rejected: {0}")]
    Book(#[from] BookError),
    #[error("{0}")]
    Format(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for whole-log snapshots.
pub trait BookSink: Send {
    /// Stores `snapshot` and returns its id.
    fn save(&mut self, snapshot: &BookSnapshotV1) -> PersistResult<i64>;
    fn load_latest(&self) -> PersistResult<Option<BookSnapshotV1>>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}
