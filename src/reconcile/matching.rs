//! Classification of an incoming record against one existing record.

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::{catalog::FieldCatalog, record::Record};

/// How an incoming record relates to an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchResult {
    /// Same contact, same fields.
    Exact,
    /// Same contact; only location-derived fields differ.
    LocationMismatch,
    /// Same call/band/mode within the probable window.
    Probable,
    /// Same call/band/mode but too far apart to merge unasked.
    Possible,
    /// Different contact.
    NoMatch,
    /// Listener report matching on band/mode/time.
    ListenerMatch,
    /// Listener report that does not match.
    ListenerNoMatch,
}

impl MatchResult {
    /// True for every outcome other than the two no-match variants.
    pub fn is_match(self) -> bool {
        !matches!(self, Self::NoMatch | Self::ListenerNoMatch)
    }
}

/// Tunables for matching and merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Largest start-time difference that still merges without asking.
    pub probable_window_secs: i64,
    /// Largest start-time difference still worth asking about.
    pub possible_window_secs: i64,
    /// Fields derived from location lookups, which sources compute differently.
    pub location_fields: Vec<String>,
    /// Fields with these prefixes only ever get merged, never compared.
    pub merge_only_prefixes: Vec<String>,
    /// Fields never compared.
    pub ignored_fields: Vec<String>,
    /// Let incoming values replace existing non-empty ones.
    pub overwrite_existing: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            probable_window_secs: 30 * 60,
            possible_window_secs: 6 * 60 * 60,
            location_fields: ["DXCC", "COUNTRY", "CQZ", "ITUZ", "CONT", "STATE", "CNTY", "PFX"]
                .map(String::from)
                .to_vec(),
            merge_only_prefixes: ["QSL", "EQSL_", "LOTW_", "CLUBLOG_", "QRZCOM_", "HRDLOG_", "APP_"]
                .map(String::from)
                .to_vec(),
            ignored_fields: ["TIME_OFF", "QSO_DATE_OFF", "FREQ", "FREQ_RX", "COMMENT", "NOTES"]
                .map(String::from)
                .to_vec(),
            overwrite_existing: false,
        }
    }
}

const MATCH_FIELDS: [&str; 6] = ["CALL", "QSO_DATE", "TIME_ON", "BAND", "MODE", "SUBMODE"];

impl MatchConfig {
    fn is_compared(&self, name: &str) -> bool {
        !MATCH_FIELDS.contains(&name)
            && !self.ignored_fields.iter().any(|f| f == name)
            && !self.merge_only_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    fn is_location(&self, name: &str) -> bool {
        self.location_fields.iter().any(|f| f == name)
    }
}

/// Classification plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Outcome.
    pub result: MatchResult,
    /// Compared fields whose values differ.
    pub conflicts: Vec<String>,
    /// Absolute start-time difference, when both records have one.
    pub delta_secs: Option<i64>,
}

impl Classification {
    fn new(result: MatchResult, delta_secs: Option<i64>) -> Self {
        Self {
            result,
            conflicts: Vec::new(),
            delta_secs,
        }
    }
}

fn same_value(catalog: &dyn FieldCatalog, field: &str, a: &Record, b: &Record) -> bool {
    let norm = |r: &Record| r.get_non_empty(field).map(|v| catalog.normalize(field, v));
    norm(a) == norm(b)
}

fn same_mode(catalog: &dyn FieldCatalog, a: &Record, b: &Record) -> bool {
    if !same_value(catalog, "MODE", a, b) {
        return false;
    }
    match (a.get_non_empty("SUBMODE"), b.get_non_empty("SUBMODE")) {
        (Some(_), Some(_)) => same_value(catalog, "SUBMODE", a, b),
        _ => true,
    }
}

/// Equal start times, compared to the minute when either side lacks seconds.
fn same_start(a: &Record, b: &Record) -> bool {
    let (Some(ta), Some(tb)) = (a.timestamp(), b.timestamp()) else {
        return false;
    };
    if a.has_seconds() && b.has_seconds() {
        return ta == tb;
    }
    ta.with_second(0) == tb.with_second(0)
}

/// Classifies `incoming` against `existing`.
pub fn classify(
    existing: &Record,
    incoming: &Record,
    catalog: &dyn FieldCatalog,
    config: &MatchConfig,
) -> Classification {
    let delta_secs = match (existing.timestamp(), incoming.timestamp()) {
        (Some(a), Some(b)) => Some((b - a).num_seconds().abs()),
        _ => None,
    };
    let same_band = same_value(catalog, "BAND", existing, incoming);
    let same_mode = same_mode(catalog, existing, incoming);

    if catalog.is_listener_report(incoming) {
        let in_window = delta_secs.is_some_and(|d| d <= config.probable_window_secs);
        let result = if same_band && same_mode && in_window {
            MatchResult::ListenerMatch
        } else {
            MatchResult::ListenerNoMatch
        };
        return Classification::new(result, delta_secs);
    }

    if !(same_band && same_mode && same_value(catalog, "CALL", existing, incoming)) {
        return Classification::new(MatchResult::NoMatch, delta_secs);
    }

    let mut conflicts = Vec::new();
    let mut location_only = true;
    for (name, value) in incoming.iter() {
        if !config.is_compared(name) || value.trim().is_empty() {
            continue;
        }
        let Some(current) = existing.get_non_empty(name) else {
            continue;
        };
        if catalog.normalize(name, current) != catalog.normalize(name, value) {
            location_only &= config.is_location(name);
            conflicts.push(name.to_string());
        }
    }

    let result = match delta_secs {
        None if same_value(catalog, "QSO_DATE", existing, incoming) => MatchResult::Possible,
        None => MatchResult::NoMatch,
        Some(_) if same_start(existing, incoming) && conflicts.is_empty() => MatchResult::Exact,
        Some(_) if same_start(existing, incoming) && location_only => MatchResult::LocationMismatch,
        Some(d) if d <= config.probable_window_secs => MatchResult::Probable,
        Some(d) if d <= config.possible_window_secs => MatchResult::Possible,
        Some(_) => MatchResult::NoMatch,
    };

    Classification {
        result,
        conflicts,
        delta_secs,
    }
}
