use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    record::Record,
    types::{RecordIndex, Timestamp},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("record has no valid QSO_DATE")]
    MissingQsoDate,
    #[error("record is not a header")]
    NotHeader,
    #[error("header records cannot be stored as contacts")]
    HeaderInLog,
    #[error("record index {0} is out of range")]
    OutOfRange(RecordIndex),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookSnapshotV1 {
    pub header: Option<Record>,
    pub records: Vec<Record>,
}

/// Records kept in ascending timestamp order, plus at most one header.
///
/// Records with equal timestamps keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Book {
    header: Option<Record>,
    records: Vec<Record>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a book from a snapshot, re-checking every record.
    pub fn from_snapshot(snapshot: BookSnapshotV1) -> Result<Self, BookError> {
        let mut book = Self::new();
        if let Some(header) = snapshot.header {
            book.set_header(header)?;
        }
        for rec in snapshot.records {
            book.insert(rec)?;
        }
        Ok(book)
    }

    pub fn export_snapshot(&self) -> BookSnapshotV1 {
        BookSnapshotV1 {
            header: self.header.clone(),
            records: self.records.clone(),
        }
    }

    /// Inserts `record` after every record with an equal or earlier timestamp.
    pub fn insert(&mut self, record: Record) -> Result<RecordIndex, BookError> {
        if record.is_header() {
            return Err(BookError::HeaderInLog);
        }
        let key = record.sort_key().ok_or(BookError::MissingQsoDate)?;
        let idx = self
            .records
            .partition_point(|r| r.sort_key().is_some_and(|k| k <= key));
        self.records.insert(idx, record);
        Ok(idx)
    }

    /// First index whose timestamp is not before `ts`.
    ///
    /// With `nearest`, and no record exactly at `ts`, returns whichever
    /// neighbouring index is closer in time; ties go to the later index.
    pub fn index_for(&self, ts: Timestamp, nearest: bool) -> RecordIndex {
        let lower = self
            .records
            .partition_point(|r| r.sort_key().is_some_and(|k| k < ts));
        if !nearest || self.records.is_empty() {
            return lower;
        }
        if lower == 0 {
            return 0;
        }
        if lower == self.records.len() {
            return lower - 1;
        }
        let (Some(before), Some(after)) = (
            self.records[lower - 1].sort_key(),
            self.records[lower].sort_key(),
        ) else {
            return lower;
        };
        if after - ts <= ts - before {
            lower
        } else {
            lower - 1
        }
    }

    pub fn header(&self) -> Option<&Record> {
        self.header.as_ref()
    }

    /// Replaces the header, returning the previous one.
    pub fn set_header(&mut self, header: Record) -> Result<Option<Record>, BookError> {
        if !header.is_header() {
            return Err(BookError::NotHeader);
        }
        Ok(self.header.replace(header))
    }

    pub fn take_header(&mut self) -> Option<Record> {
        self.header.take()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: RecordIndex) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Removes and returns the record at `index`.
    pub fn remove(&mut self, index: RecordIndex) -> Result<Record, BookError> {
        if index >= self.records.len() {
            return Err(BookError::OutOfRange(index));
        }
        Ok(self.records.remove(index))
    }

    /// Drops all records and the header.
    pub fn clear(&mut self) {
        self.header = None;
        self.records.clear();
    }

    /// Mutates the record at `index` and moves it if its timestamp changed.
    ///
    /// Returns the record's index afterwards. If `f` leaves the record without a
    /// valid `QSO_DATE` the change is rolled back.
    pub fn modify<F>(&mut self, index: RecordIndex, f: F) -> Result<RecordIndex, BookError>
    where
        F: FnOnce(&mut Record),
    {
        let original = self
            .records
            .get(index)
            .cloned()
            .ok_or(BookError::OutOfRange(index))?;
        let mut rec = self.records.remove(index);
        f(&mut rec);
        rec.set_is_header(false);

        if !rec.has_valid_qso_date() {
            self.records.insert(index, original);
            return Err(BookError::MissingQsoDate);
        }
        if rec.sort_key() == original.sort_key() {
            self.records.insert(index, rec);
            return Ok(index);
        }
        self.insert(rec)
    }
}
