//! Import session state that survives between engine calls.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    record::Record,
    types::{RecordIndex, Status},
};

/// Confirmation services whose reports need a decision when unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractiveService {
    /// eQSL-style inbox: reports written from the other station's side.
    EqslLike,
    /// LoTW-style confirmation report.
    LotwLike,
}

/// Where the pending records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportSource {
    /// ADIF file chosen by the operator.
    FileImport,
    /// Live feed from digital-mode software.
    FeedMerge,
    /// Download from a confirmation service.
    InteractiveUpdate(InteractiveService),
}

impl ImportSource {
    /// Feeds replay history; records at or before the watermark are skipped.
    pub fn is_feed(self) -> bool {
        matches!(self, Self::FeedMerge)
    }

    /// File imports carry the operator's own location data, so a location-only
    /// difference is still the same contact.
    pub fn tolerates_location_mismatch(self) -> bool {
        matches!(self, Self::FileImport)
    }

    /// Unmatched records are new contacts rather than questions.
    pub fn inserts_unmatched(self) -> bool {
        matches!(self, Self::FileImport | Self::FeedMerge)
    }
}

/// Running counters of an import session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportCounters {
    /// Records taken from the pending list.
    pub checked: u64,
    /// Records merged or added.
    pub accepted: u64,
    /// Existing records merged into.
    pub updated: u64,
    /// Of `updated`, merges from a probable match.
    pub probable: u64,
    /// Records inserted as new.
    pub added: u64,
    /// Records refused or discarded with notice.
    pub rejected: u64,
}

/// Why the engine stopped to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionKind {
    /// An existing record is a possible match.
    Ambiguous,
    /// Nothing matched and the source does not insert unmatched records.
    PossiblyNew,
}

/// The question put to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDecision {
    /// Why the engine stopped.
    pub kind: DecisionKind,
    /// Incoming record, already rewritten for its source.
    pub candidate: Record,
    /// Existing record the candidate may match.
    pub existing: Option<RecordIndex>,
    /// Fields that differ from `existing`.
    pub conflicts: Vec<String>,
    /// Where the candidate would be inserted.
    pub insert_at: RecordIndex,
}

/// Caller answer to a [`PendingDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Drop the candidate; with `notify` it is counted as rejected.
    Discard {
        /// Count and log the discard.
        notify: bool,
    },
    /// Insert the candidate as a new contact.
    AcceptAsNew,
    /// Merge into the given record, or the one the engine proposed.
    MergeIntoSelected(Option<RecordIndex>),
}

/// Externally visible session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Pending records remain and no question is open.
    Running,
    /// Waiting on a [`Resolution`].
    AwaitingDecision(PendingDecision),
    /// Pending list drained or cancelled.
    Finished(Status),
}

/// Pending records plus everything needed to resume after a decision.
#[derive(Debug, Clone)]
pub struct ImportSession {
    pub(crate) source: ImportSource,
    pub(crate) pending: VecDeque<Record>,
    pub(crate) counters: ImportCounters,
    pub(crate) overwrite: bool,
    pub(crate) head_prepared: bool,
    pub(crate) awaiting: Option<PendingDecision>,
    pub(crate) status: Option<Status>,
}

impl ImportSession {
    /// Starts a session over `records` in the given order.
    pub fn new(source: ImportSource, records: impl IntoIterator<Item = Record>, overwrite: bool) -> Self {
        Self {
            source,
            pending: records.into_iter().collect(),
            counters: ImportCounters::default(),
            overwrite,
            head_prepared: false,
            awaiting: None,
            status: None,
        }
    }

    pub fn source(&self) -> ImportSource {
        self.source
    }

    pub fn counters(&self) -> ImportCounters {
        self.counters
    }

    /// Records not yet resolved, including one awaiting a decision.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_decision(&self) -> Option<&PendingDecision> {
        self.awaiting.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn state(&self) -> SessionState {
        match (&self.status, &self.awaiting) {
            (Some(status), _) => SessionState::Finished(*status),
            (None, Some(pending)) => SessionState::AwaitingDecision(pending.clone()),
            (None, None) => SessionState::Running,
        }
    }

    /// Drops every pending record. The book keeps whatever was already applied.
    pub fn cancel(&mut self) {
        if self.is_finished() {
            return;
        }
        tracing::info!(
            remaining = self.pending.len(),
            counters = ?self.counters,
            "import cancelled"
        );
        self.pending.clear();
        self.awaiting = None;
        self.head_prepared = false;
        self.status = Some(Status::Cancelled);
    }
}
