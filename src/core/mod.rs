//! In-memory chronological log.

/// Timestamp-ordered record store.
pub mod book;
