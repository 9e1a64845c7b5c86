//! ADIF record: one QSO or the per-log header pseudo-record.

use chrono::{Duration, NaiveDate, NaiveTime};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{catalog::UserField, types::Timestamp};

/// Fields that identify a contact and are never overwritten by a merge.
pub const IDENTITY_FIELDS: [&str; 3] = ["CALL", "QSO_DATE", "TIME_ON"];

/// Field map keyed by uppercase field name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: HashMap<String, String>,
    is_header: bool,
    header_comment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    user_fields: Vec<UserField>,
}

impl Record {
    /// Creates an empty contact record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty header record.
    pub fn header() -> Self {
        Self {
            is_header: true,
            ..Self::default()
        }
    }

    /// Builds a contact record from `(name, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut rec = Self::new();
        for (name, value) in pairs {
            rec.set(name, value);
        }
        rec
    }

    /// True for the header pseudo-record.
    pub fn is_header(&self) -> bool {
        self.is_header
    }

    pub(crate) fn set_is_header(&mut self, is_header: bool) {
        self.is_header = is_header;
        if !is_header {
            self.user_fields.clear();
        }
    }

    /// Free text preceding the first header tag.
    pub fn header_comment(&self) -> &str {
        &self.header_comment
    }

    /// Replaces the header comment.
    pub fn set_header_comment(&mut self, comment: impl Into<String>) {
        self.header_comment = comment.into();
    }

    /// Appends text to the header comment.
    pub fn append_header_comment(&mut self, text: &str) {
        self.header_comment.push_str(text);
    }

    /// `USERDEF` declarations carried by a header, in declaration order.
    pub fn user_fields(&self) -> &[UserField] {
        &self.user_fields
    }

    /// Adds a `USERDEF` declaration, replacing one with the same name.
    pub fn declare_user_field(&mut self, field: UserField) {
        match self.user_fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.user_fields.push(field),
        }
    }

    /// Looks up a field; `name` is case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(v) => Some(v.as_str()),
            None => self
                .fields
                .get(name.to_ascii_uppercase().as_str())
                .map(String::as_str),
        }
    }

    /// Looks up a field, treating empty values as absent.
    pub fn get_non_empty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    /// Returns true if the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets a field, uppercasing its name. Returns the previous value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        self.fields.insert(name.trim().to_ascii_uppercase(), value.into())
    }

    /// Removes a field.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name.to_ascii_uppercase().as_str())
    }

    /// Renames a field, keeping its value. No-op when `from` is absent.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(v) = self.remove(from) {
            self.set(to, v);
        }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs.into_iter()
    }

    /// Unordered view of the field map.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// True when `QSO_DATE` parses as a calendar date.
    pub fn has_valid_qso_date(&self) -> bool {
        self.get_non_empty("QSO_DATE").and_then(parse_date).is_some()
    }

    /// Contact start; absent until both `QSO_DATE` and `TIME_ON` are valid.
    pub fn timestamp(&self) -> Option<Timestamp> {
        let date = self.get_non_empty("QSO_DATE").and_then(parse_date)?;
        let time = self.get_non_empty("TIME_ON").and_then(parse_time)?;
        Some(date.and_time(time))
    }

    /// Contact end from `QSO_DATE_OFF`/`TIME_OFF`.
    ///
    /// Without `QSO_DATE_OFF` the start date is used, rolling over to the next
    /// day when `TIME_OFF` is earlier than `TIME_ON`.
    pub fn end_timestamp(&self) -> Option<Timestamp> {
        let time_off = self.get_non_empty("TIME_OFF").and_then(parse_time)?;
        if let Some(date_off) = self.get_non_empty("QSO_DATE_OFF").and_then(parse_date) {
            return Some(date_off.and_time(time_off));
        }
        let start = self.timestamp()?;
        let end = start.date().and_time(time_off);
        if end < start {
            Some(end + Duration::days(1))
        } else {
            Some(end)
        }
    }

    /// Ordering key: the timestamp, or midnight of `QSO_DATE` without `TIME_ON`.
    pub fn sort_key(&self) -> Option<Timestamp> {
        self.timestamp().or_else(|| {
            self.get_non_empty("QSO_DATE")
                .and_then(parse_date)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
    }

    /// True when `TIME_ON` carries seconds.
    pub fn has_seconds(&self) -> bool {
        self.get_non_empty("TIME_ON")
            .is_some_and(|t| t.trim().len() >= 6)
    }

    /// Copies fields from `other`. Existing values win unless `overwrite` is set;
    /// identity fields are never overwritten. Returns the names that changed.
    pub fn merge_from(&mut self, other: &Record, overwrite: bool) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in other.iter() {
            if value.is_empty() {
                continue;
            }
            let current = self.fields.get(name);
            let write = match current {
                None => true,
                Some(cur) if cur.is_empty() => true,
                Some(cur) => overwrite && cur != value && !IDENTITY_FIELDS.contains(&name),
            };
            if write {
                self.fields.insert(name.to_string(), value.to_string());
                changed.push(name.to_string());
            }
        }
        changed
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    match s.len() {
        4 => NaiveTime::parse_from_str(s, "%H%M").ok(),
        6 => NaiveTime::parse_from_str(s, "%H%M%S").ok(),
        _ => None,
    }
}
