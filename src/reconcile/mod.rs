//! Merging imported records into an existing log.

/// Reconciler driving import sessions.
pub mod engine;
/// Pairwise record classification.
pub mod matching;
/// Import session state and caller decisions.
pub mod session;
/// Source-specific rewrites of incoming records.
pub mod transform;

pub use engine::{ReconcileError, Reconciler};
pub use matching::{Classification, MatchConfig, MatchResult, classify};
pub use session::{
    DecisionKind, ImportCounters, ImportSession, ImportSource, InteractiveService,
    PendingDecision, Resolution, SessionState,
};
