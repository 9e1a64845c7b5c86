//! Runtime event stream payloads.

use crate::{
    reconcile::{ImportCounters, ImportSource, PendingDecision},
    types::{RecordIndex, Status},
};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The book was replaced from ADIF input.
    Loaded {
        /// Records inserted.
        accepted: usize,
        /// Records refused by the book.
        rejected: usize,
        /// Terminal load status.
        status: Status,
    },
    /// A record was inserted directly.
    Inserted {
        /// Index the record landed at.
        index: RecordIndex,
    },
    /// Existing records were merged into during an import step.
    Updated {
        /// Records merged in this step.
        merged: u64,
    },
    /// Counters after an import step.
    ImportProgress {
        /// Session source.
        source: ImportSource,
        /// Counters so far.
        counters: ImportCounters,
        /// Records still pending.
        remaining: usize,
    },
    /// The import stopped on a question.
    AwaitingDecision(PendingDecision),
    /// The import session ended.
    ImportFinished {
        /// Ok when drained, Cancelled otherwise.
        status: Status,
        /// Final counters.
        counters: ImportCounters,
    },
    /// A snapshot was written to the sink.
    Saved {
        /// Snapshot id assigned by the sink.
        id: i64,
        /// Records in the snapshot.
        records: usize,
    },
}
