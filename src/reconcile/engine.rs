use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    catalog::FieldCatalog,
    core::book::{Book, BookError},
    record::Record,
    types::{RecordIndex, Status, Timestamp},
};

use super::{
    matching::{Classification, MatchConfig, MatchResult, classify},
    session::{
        DecisionKind, ImportSession, ImportSource, PendingDecision, Resolution, SessionState,
    },
    transform::prepare_incoming,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("no decision is pending")]
    NoPendingDecision,
    #[error("no record selected to merge into")]
    NothingSelected,
    #[error("record index {0} is out of range")]
    OutOfRange(RecordIndex),
    #[error(transparent)]
    Book(#[from] BookError),
}

enum Step {
    Done,
    Await(PendingDecision),
}

/// Merges imported records into a [`Book`].
///
/// The engine holds no per-session state except the feed watermark, which
/// carries over between feed sessions.
pub struct Reconciler {
    catalog: Arc<dyn FieldCatalog>,
    config: MatchConfig,
    feed_watermark: Option<Timestamp>,
}

impl Reconciler {
    pub fn new(catalog: Arc<dyn FieldCatalog>, config: MatchConfig) -> Self {
        Self {
            catalog,
            config,
            feed_watermark: None,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Latest feed timestamp already processed.
    pub fn feed_watermark(&self) -> Option<Timestamp> {
        self.feed_watermark
    }

    pub fn set_feed_watermark(&mut self, ts: Option<Timestamp>) {
        self.feed_watermark = ts;
    }

    /// Creates a session using the configured overwrite policy.
    pub fn begin(&self, source: ImportSource, records: Vec<Record>) -> ImportSession {
        info!(?source, records = records.len(), "import started");
        ImportSession::new(source, records, self.config.overwrite_existing)
    }

    pub fn classify(&self, existing: &Record, incoming: &Record) -> Classification {
        classify(existing, incoming, self.catalog.as_ref(), &self.config)
    }

    /// Processes pending records until the list drains or a decision is needed.
    pub fn run(&mut self, session: &mut ImportSession, book: &mut Book) -> SessionState {
        if session.is_finished() || session.awaiting.is_some() {
            return session.state();
        }

        while let Some(mut record) = session.pending.pop_front() {
            if !session.head_prepared {
                session.counters.checked += 1;
                if session.source.is_feed() && self.already_seen(&record) {
                    debug!(call = record.get("CALL"), "feed record before watermark");
                    continue;
                }
                prepare_incoming(session.source, &mut record);
                session.head_prepared = true;
            }

            let ts = record.timestamp();
            match self.resolve(session, book, record) {
                Step::Done => {
                    session.head_prepared = false;
                    self.advance_watermark(session, ts);
                }
                Step::Await(pending) => {
                    debug!(
                        kind = ?pending.kind,
                        existing = pending.existing,
                        "import awaiting decision"
                    );
                    session.pending.push_front(pending.candidate.clone());
                    session.awaiting = Some(pending);
                    return session.state();
                }
            }
        }

        session.status = Some(Status::Ok);
        info!(source = ?session.source, counters = ?session.counters, "import finished");
        session.state()
    }

    /// Drops the record awaiting a decision and resumes.
    pub fn discard(
        &mut self,
        session: &mut ImportSession,
        book: &mut Book,
        notify: bool,
    ) -> Result<SessionState, ReconcileError> {
        let pending = self.take_decision(session)?;
        if notify {
            session.counters.rejected += 1;
            info!(call = pending.candidate.get("CALL"), "import record discarded");
        }
        Ok(self.run(session, book))
    }

    /// Inserts the record awaiting a decision as a new contact and resumes.
    pub fn accept_as_new(
        &mut self,
        session: &mut ImportSession,
        book: &mut Book,
    ) -> Result<SessionState, ReconcileError> {
        let pending = self.take_decision(session)?;
        self.add(session, book, pending.candidate);
        Ok(self.run(session, book))
    }

    /// Merges the record awaiting a decision into `selected`, or into the
    /// record the engine proposed, and resumes.
    pub fn merge_into_selected(
        &mut self,
        session: &mut ImportSession,
        book: &mut Book,
        selected: Option<RecordIndex>,
    ) -> Result<SessionState, ReconcileError> {
        let pending = session
            .awaiting
            .as_ref()
            .ok_or(ReconcileError::NoPendingDecision)?;
        let target = selected
            .or(pending.existing)
            .ok_or(ReconcileError::NothingSelected)?;
        if target >= book.len() {
            return Err(ReconcileError::OutOfRange(target));
        }
        let pending = self.take_decision(session)?;
        let overwrite = session.overwrite;
        self.merge(session, book, target, &pending.candidate, overwrite)?;
        Ok(self.run(session, book))
    }

    /// Applies a [`Resolution`].
    pub fn resolve_pending(
        &mut self,
        session: &mut ImportSession,
        book: &mut Book,
        resolution: Resolution,
    ) -> Result<SessionState, ReconcileError> {
        match resolution {
            Resolution::Discard { notify } => self.discard(session, book, notify),
            Resolution::AcceptAsNew => self.accept_as_new(session, book),
            Resolution::MergeIntoSelected(selected) => {
                self.merge_into_selected(session, book, selected)
            }
        }
    }

    fn take_decision(&mut self, session: &mut ImportSession) -> Result<PendingDecision, ReconcileError> {
        let pending = session
            .awaiting
            .take()
            .ok_or(ReconcileError::NoPendingDecision)?;
        session.pending.pop_front();
        session.head_prepared = false;
        self.advance_watermark(session, pending.candidate.timestamp());
        Ok(pending)
    }

    fn already_seen(&self, record: &Record) -> bool {
        match (record.timestamp(), self.feed_watermark) {
            (Some(ts), Some(mark)) => ts <= mark,
            _ => false,
        }
    }

    /// Moves the watermark past a record that has been resolved.
    fn advance_watermark(&mut self, session: &ImportSession, ts: Option<Timestamp>) {
        if !session.source.is_feed() {
            return;
        }
        if let Some(ts) = ts {
            self.feed_watermark = Some(self.feed_watermark.map_or(ts, |m| m.max(ts)));
        }
    }

    fn normalized(&self, record: &Record) -> Record {
        let mut out = Record::new();
        for (name, value) in record.iter() {
            out.set(name, self.catalog.normalize(name, value));
        }
        out
    }

    fn resolve(&mut self, session: &mut ImportSession, book: &mut Book, record: Record) -> Step {
        let Some(key) = record.sort_key() else {
            session.counters.rejected += 1;
            warn!(call = record.get("CALL"), "import record without valid QSO_DATE");
            return Step::Done;
        };

        let insert_at = book.index_for(key, false);
        let mut hit: Option<(RecordIndex, Classification)> = None;
        if !book.is_empty() {
            let lo = insert_at.saturating_sub(2);
            let hi = (insert_at + 2).min(book.len() - 1);
            for idx in lo..=hi {
                let Some(existing) = book.get(idx) else {
                    continue;
                };
                let mut found = self.classify(existing, &record);
                if found.result == MatchResult::LocationMismatch
                    && !session.source.tolerates_location_mismatch()
                {
                    found.result = MatchResult::Possible;
                }
                debug!(idx, result = ?found.result, delta = found.delta_secs, "classified");
                if found.result.is_match() {
                    hit = Some((idx, found));
                    break;
                }
            }
        }

        match hit {
            Some((idx, found)) => match found.result {
                MatchResult::Exact | MatchResult::LocationMismatch => {
                    let overwrite = session.overwrite;
                    if self.merge(session, book, idx, &record, overwrite).is_err() {
                        session.counters.rejected += 1;
                    }
                    Step::Done
                }
                MatchResult::Probable => {
                    let overwrite = session.overwrite;
                    if self.merge(session, book, idx, &record, overwrite).is_ok() {
                        session.counters.probable += 1;
                    } else {
                        session.counters.rejected += 1;
                    }
                    Step::Done
                }
                MatchResult::ListenerMatch => {
                    self.add(session, book, record);
                    Step::Done
                }
                _ => Step::Await(PendingDecision {
                    kind: DecisionKind::Ambiguous,
                    candidate: record,
                    existing: Some(idx),
                    conflicts: found.conflicts,
                    insert_at,
                }),
            },
            None if session.source.inserts_unmatched() => {
                self.add(session, book, record);
                Step::Done
            }
            None => Step::Await(PendingDecision {
                kind: DecisionKind::PossiblyNew,
                candidate: record,
                existing: None,
                conflicts: Vec::new(),
                insert_at,
            }),
        }
    }

    fn merge(
        &self,
        session: &mut ImportSession,
        book: &mut Book,
        idx: RecordIndex,
        incoming: &Record,
        overwrite: bool,
    ) -> Result<RecordIndex, ReconcileError> {
        let incoming = self.normalized(incoming);
        let mut changed = Vec::new();
        let idx = book.modify(idx, |existing| {
            changed = existing.merge_from(&incoming, overwrite);
        })?;
        session.counters.updated += 1;
        session.counters.accepted += 1;
        debug!(idx, ?changed, "merged import record");
        Ok(idx)
    }

    fn add(&self, session: &mut ImportSession, book: &mut Book, record: Record) {
        match book.insert(self.normalized(&record)) {
            Ok(idx) => {
                session.counters.added += 1;
                session.counters.accepted += 1;
                debug!(idx, call = record.get("CALL"), "added import record");
            }
            Err(err) => {
                session.counters.rejected += 1;
                warn!(error = %err, call = record.get("CALL"), "import record rejected");
            }
        }
    }
}
