//! Field-specification lookups consulted by the decoders and the reconciler.
//!
//! The catalog is read-only: user-defined fields declared by a stream live in
//! the decoder for that stream and are layered over the catalog there.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// ADIF data type, keyed by the single-character type indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// `A`: comma separated award list.
    AwardList,
    /// `B`: `Y`/`N`.
    Boolean,
    /// `D`: `YYYYMMDD`.
    Date,
    /// `E`: value from a fixed list.
    Enumeration,
    /// `G`: international multiline string.
    IntlMultiline,
    /// `I`: international string.
    IntlString,
    /// `L`: location (`XDDD MM.MMM`).
    Location,
    /// `M`: multiline string.
    Multiline,
    /// `N`: decimal number.
    Number,
    /// `S`: ASCII string.
    String,
    /// `T`: `HHMM` or `HHMMSS`.
    Time,
}

impl FieldType {
    /// Parses a type indicator. Case-insensitive.
    pub fn from_indicator(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'A' => Self::AwardList,
            'B' => Self::Boolean,
            'D' => Self::Date,
            'E' => Self::Enumeration,
            'G' => Self::IntlMultiline,
            'I' => Self::IntlString,
            'L' => Self::Location,
            'M' => Self::Multiline,
            'N' => Self::Number,
            'S' => Self::String,
            'T' => Self::Time,
            _ => return None,
        })
    }

    /// Single-character indicator used on the wire.
    pub fn indicator(self) -> char {
        match self {
            Self::AwardList => 'A',
            Self::Boolean => 'B',
            Self::Date => 'D',
            Self::Enumeration => 'E',
            Self::IntlMultiline => 'G',
            Self::IntlString => 'I',
            Self::Location => 'L',
            Self::Multiline => 'M',
            Self::Number => 'N',
            Self::String => 'S',
            Self::Time => 'T',
        }
    }
}

/// A field declared by a `USERDEFn` header entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserField {
    /// Uppercase field name.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Allowed values, uppercase.
    pub enumeration: Option<Vec<String>>,
    /// Inclusive numeric range.
    pub range: Option<(f64, f64)>,
}

impl UserField {
    /// Parses the value of a tag-format `USERDEFn` field:
    /// `NAME`, `NAME,{A,B,C}` or `NAME,{lo:hi}`.
    pub fn parse(declaration: &str, field_type: FieldType) -> Option<Self> {
        let (name, suffix) = match declaration.split_once(',') {
            Some((n, s)) => (n, Some(s.trim())),
            None => (declaration, None),
        };
        let name = name.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }
        let mut field = Self {
            name,
            field_type,
            enumeration: None,
            range: None,
        };
        if let Some(suffix) = suffix {
            let inner = suffix.strip_prefix('{')?.strip_suffix('}')?;
            if field_type == FieldType::Number || inner.contains(':') {
                field.range = Some(parse_range(inner)?);
            } else {
                field.enumeration = Some(parse_enumeration(inner));
            }
        }
        Some(field)
    }

    /// Checks `value` against the declared enumeration or range.
    pub fn accepts(&self, value: &str) -> bool {
        if let Some(values) = &self.enumeration {
            let v = value.trim().to_ascii_uppercase();
            if !values.iter().any(|allowed| *allowed == v) {
                return false;
            }
        }
        if let Some((lo, hi)) = self.range {
            match value.trim().parse::<f64>() {
                Ok(n) if n >= lo && n <= hi => {}
                _ => return false,
            }
        }
        true
    }

    /// True when values are drawn from a fixed list.
    pub fn is_enumerated(&self) -> bool {
        self.field_type == FieldType::Enumeration || self.enumeration.is_some()
    }

    /// `{A,B,C}` for an enumerated field.
    pub fn enumeration_text(&self) -> Option<String> {
        self.enumeration
            .as_ref()
            .map(|values| format!("{{{}}}", values.join(",")))
    }

    /// `{lo:hi}` for a ranged field.
    pub fn range_text(&self) -> Option<String> {
        self.range.map(|(lo, hi)| format!("{{{lo}:{hi}}}"))
    }

    /// Tag-format declaration value, the inverse of [`UserField::parse`].
    pub fn declaration(&self) -> String {
        match self.enumeration_text().or_else(|| self.range_text()) {
            Some(suffix) => format!("{},{suffix}", self.name),
            None => self.name.clone(),
        }
    }
}

// `parse_range` never yields NaN bounds.
impl Eq for UserField {}

/// Parses `A,B,C` (braces already stripped) into uppercase values.
pub fn parse_enumeration(inner: &str) -> Vec<String> {
    inner
        .split(',')
        .map(|v| v.trim().to_ascii_uppercase())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Parses `lo:hi` (braces already stripped).
pub fn parse_range(inner: &str) -> Option<(f64, f64)> {
    let (lo, hi) = inner.split_once(':')?;
    let lo = lo.trim().parse::<f64>().ok()?;
    let hi = hi.trim().parse::<f64>().ok()?;
    (lo <= hi).then_some((lo, hi))
}

/// Read-only field specification consulted while decoding and reconciling.
pub trait FieldCatalog: Send + Sync {
    /// Type of a known field, `None` for unknown names.
    fn field_type(&self, name: &str) -> Option<FieldType>;

    /// Canonical form of `value` for comparison and storage.
    fn normalize(&self, field: &str, value: &str) -> String {
        normalize_by_type(field, self.field_type(field), value)
    }

    /// Allowed values of an enumerated field, uppercase. `None` when the
    /// catalog does not list them, in which case any value is kept.
    fn enumeration(&self, _name: &str) -> Option<&[&'static str]> {
        None
    }

    /// True for receive-only (SWL) reports.
    fn is_listener_report(&self, record: &Record) -> bool {
        record
            .get_non_empty("SWL")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("Y"))
    }
}

/// Normalization shared by catalog implementations.
pub fn normalize_by_type(field: &str, field_type: Option<FieldType>, value: &str) -> String {
    let trimmed = value.trim();
    match field_type {
        Some(FieldType::Enumeration) | Some(FieldType::Boolean) => trimmed.to_ascii_uppercase(),
        Some(FieldType::Date) | Some(FieldType::Time) => {
            trimmed.chars().filter(char::is_ascii_digit).collect()
        }
        Some(FieldType::Multiline) | Some(FieldType::IntlMultiline) => value.to_string(),
        _ if is_callsign_field(field) => trimmed.to_ascii_uppercase(),
        _ => trimmed.to_string(),
    }
}

fn is_callsign_field(field: &str) -> bool {
    matches!(
        field.to_ascii_uppercase().as_str(),
        "CALL" | "STATION_CALLSIGN" | "OPERATOR" | "OWNER_CALLSIGN" | "EQ_CALL" | "CONTACTED_OP"
    )
}

const STANDARD_FIELDS: &[(&str, FieldType)] = &[
    ("ADDRESS", FieldType::Multiline),
    ("ADIF_VER", FieldType::String),
    ("AGE", FieldType::Number),
    ("ANT_AZ", FieldType::Number),
    ("ANT_EL", FieldType::Number),
    ("A_INDEX", FieldType::Number),
    ("BAND", FieldType::Enumeration),
    ("BAND_RX", FieldType::Enumeration),
    ("CALL", FieldType::String),
    ("CHECK", FieldType::String),
    ("CLASS", FieldType::String),
    ("CLUBLOG_QSO_UPLOAD_DATE", FieldType::Date),
    ("CLUBLOG_QSO_UPLOAD_STATUS", FieldType::Enumeration),
    ("CNTY", FieldType::Enumeration),
    ("COMMENT", FieldType::String),
    ("CONT", FieldType::Enumeration),
    ("CONTACTED_OP", FieldType::String),
    ("CONTEST_ID", FieldType::String),
    ("COUNTRY", FieldType::String),
    ("CQZ", FieldType::Number),
    ("CREATED_TIMESTAMP", FieldType::String),
    ("DISTANCE", FieldType::Number),
    ("DXCC", FieldType::Enumeration),
    ("EMAIL", FieldType::String),
    ("EQ_CALL", FieldType::String),
    ("EQSL_AG", FieldType::Boolean),
    ("EQSL_QSLRDATE", FieldType::Date),
    ("EQSL_QSLSDATE", FieldType::Date),
    ("EQSL_QSL_RCVD", FieldType::Enumeration),
    ("EQSL_QSL_SENT", FieldType::Enumeration),
    ("FREQ", FieldType::Number),
    ("FREQ_RX", FieldType::Number),
    ("GRIDSQUARE", FieldType::String),
    ("GRIDSQUARE_EXT", FieldType::String),
    ("HRDLOG_QSO_UPLOAD_DATE", FieldType::Date),
    ("HRDLOG_QSO_UPLOAD_STATUS", FieldType::Enumeration),
    ("IOTA", FieldType::String),
    ("ITUZ", FieldType::Number),
    ("K_INDEX", FieldType::Number),
    ("LAT", FieldType::Location),
    ("LON", FieldType::Location),
    ("LOTW_QSLRDATE", FieldType::Date),
    ("LOTW_QSLSDATE", FieldType::Date),
    ("LOTW_QSL_RCVD", FieldType::Enumeration),
    ("LOTW_QSL_SENT", FieldType::Enumeration),
    ("MAX_BURSTS", FieldType::Number),
    ("MODE", FieldType::Enumeration),
    ("MY_ANTENNA", FieldType::String),
    ("MY_CITY", FieldType::String),
    ("MY_CNTY", FieldType::Enumeration),
    ("MY_COUNTRY", FieldType::String),
    ("MY_CQ_ZONE", FieldType::Number),
    ("MY_DXCC", FieldType::Enumeration),
    ("MY_GRIDSQUARE", FieldType::String),
    ("MY_IOTA", FieldType::String),
    ("MY_ITU_ZONE", FieldType::Number),
    ("MY_LAT", FieldType::Location),
    ("MY_LON", FieldType::Location),
    ("MY_NAME", FieldType::String),
    ("MY_POTA_REF", FieldType::String),
    ("MY_RIG", FieldType::String),
    ("MY_SIG", FieldType::String),
    ("MY_SIG_INFO", FieldType::String),
    ("MY_SOTA_REF", FieldType::String),
    ("MY_STATE", FieldType::Enumeration),
    ("MY_WWFF_REF", FieldType::String),
    ("NAME", FieldType::String),
    ("NOTES", FieldType::Multiline),
    ("OPERATOR", FieldType::String),
    ("OWNER_CALLSIGN", FieldType::String),
    ("PFX", FieldType::String),
    ("POTA_REF", FieldType::String),
    ("PRECEDENCE", FieldType::String),
    ("PROGRAMID", FieldType::String),
    ("PROGRAMVERSION", FieldType::String),
    ("PROP_MODE", FieldType::Enumeration),
    ("QSLMSG", FieldType::Multiline),
    ("QSLRDATE", FieldType::Date),
    ("QSLSDATE", FieldType::Date),
    ("QSL_RCVD", FieldType::Enumeration),
    ("QSL_RCVD_VIA", FieldType::Enumeration),
    ("QSL_SENT", FieldType::Enumeration),
    ("QSL_SENT_VIA", FieldType::Enumeration),
    ("QSL_VIA", FieldType::String),
    ("QSO_COMPLETE", FieldType::Enumeration),
    ("QSO_DATE", FieldType::Date),
    ("QSO_DATE_OFF", FieldType::Date),
    ("QSO_RANDOM", FieldType::Boolean),
    ("QTH", FieldType::String),
    ("QRZCOM_QSO_UPLOAD_DATE", FieldType::Date),
    ("QRZCOM_QSO_UPLOAD_STATUS", FieldType::Enumeration),
    ("RIG", FieldType::String),
    ("RST_RCVD", FieldType::String),
    ("RST_SENT", FieldType::String),
    ("RX_PWR", FieldType::Number),
    ("SAT_MODE", FieldType::String),
    ("SAT_NAME", FieldType::String),
    ("SFI", FieldType::Number),
    ("SIG", FieldType::String),
    ("SIG_INFO", FieldType::String),
    ("SOTA_REF", FieldType::String),
    ("SRX", FieldType::Number),
    ("SRX_STRING", FieldType::String),
    ("STATE", FieldType::Enumeration),
    ("STATION_CALLSIGN", FieldType::String),
    ("STX", FieldType::Number),
    ("STX_STRING", FieldType::String),
    ("SUBMODE", FieldType::Enumeration),
    ("SWL", FieldType::Boolean),
    ("TIME_OFF", FieldType::Time),
    ("TIME_ON", FieldType::Time),
    ("TX_PWR", FieldType::Number),
    ("WEB", FieldType::String),
    ("WWFF_REF", FieldType::String),
];

const BANDS: &[&str] = &[
    "2190M", "630M", "560M", "160M", "80M", "60M", "40M", "30M", "20M", "17M", "15M", "12M",
    "10M", "8M", "6M", "5M", "4M", "2M", "1.25M", "70CM", "33CM", "23CM", "13CM", "9CM", "6CM",
    "3CM", "1.25CM", "6MM", "4MM", "2.5MM", "2MM", "1MM", "SUBMM",
];

// Current modes plus the import-only names still common in older logs.
const MODES: &[&str] = &[
    "AM", "ARDOP", "ATV", "C4FM", "CHIP", "CLO", "CONTESTI", "CW", "DIGITALVOICE", "DOMINO",
    "DSTAR", "DYNAMIC", "FAX", "FM", "FSK441", "FT4", "FT8", "HELL", "ISCAT", "JT4", "JT44",
    "JT65", "JT6M", "JT9", "MFSK", "MSK144", "MT63", "OLIVIA", "OPERA", "PAC", "PAX", "PKT",
    "PSK", "PSK2K", "PSK31", "PSK63", "Q15", "QRA64", "ROS", "RTTY", "RTTYM", "SSB", "SSTV",
    "T10", "THOR", "THRB", "TOR", "V4", "VOI", "WINMOR", "WSPR",
];

const QSL_RCVD: &[&str] = &["Y", "N", "R", "I", "V"];
const QSL_SENT: &[&str] = &["Y", "N", "R", "Q", "I"];
const QSL_VIA: &[&str] = &["B", "D", "E", "M"];
const UPLOAD_STATUS: &[&str] = &["Y", "N", "M"];
const QSO_COMPLETE: &[&str] = &["Y", "N", "NIL", "?"];
const CONTINENTS: &[&str] = &["NA", "SA", "EU", "AF", "OC", "AS", "AN"];
const PROP_MODES: &[&str] = &[
    "AS", "AUE", "AUR", "BS", "ECH", "EME", "ES", "F2", "FAI", "GWAVE", "INTERNET", "ION", "IRL",
    "LOS", "MS", "RPT", "RS", "SAT", "TEP", "TR",
];

const STANDARD_ENUMERATIONS: &[(&str, &[&str])] = &[
    ("BAND", BANDS),
    ("BAND_RX", BANDS),
    ("CLUBLOG_QSO_UPLOAD_STATUS", UPLOAD_STATUS),
    ("CONT", CONTINENTS),
    ("EQSL_QSL_RCVD", QSL_RCVD),
    ("EQSL_QSL_SENT", QSL_SENT),
    ("HRDLOG_QSO_UPLOAD_STATUS", UPLOAD_STATUS),
    ("LOTW_QSL_RCVD", QSL_RCVD),
    ("LOTW_QSL_SENT", QSL_SENT),
    ("MODE", MODES),
    ("PROP_MODE", PROP_MODES),
    ("QRZCOM_QSO_UPLOAD_STATUS", UPLOAD_STATUS),
    ("QSL_RCVD", QSL_RCVD),
    ("QSL_RCVD_VIA", QSL_VIA),
    ("QSL_SENT", QSL_SENT),
    ("QSL_SENT_VIA", QSL_VIA),
    ("QSO_COMPLETE", QSO_COMPLETE),
];

/// Catalog of the common ADIF 3 fields.
///
/// Enumerations with short, stable lists (bands, modes, QSL status, continents)
/// are checked; DXCC, subdivision and submode lists are not carried.
#[derive(Debug, Clone)]
pub struct StandardCatalog {
    types: HashMap<String, FieldType>,
    enumerations: HashMap<String, &'static [&'static str]>,
}

impl Default for StandardCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardCatalog {
    /// Builds the built-in table.
    pub fn new() -> Self {
        let types = STANDARD_FIELDS
            .iter()
            .map(|(name, ty)| ((*name).to_string(), *ty))
            .collect();
        let enumerations = STANDARD_ENUMERATIONS
            .iter()
            .map(|(name, values)| ((*name).to_string(), *values))
            .collect();
        Self {
            types,
            enumerations,
        }
    }

    /// Adds or replaces a field definition.
    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        self.types.insert(name.to_ascii_uppercase(), field_type);
        self
    }

    /// Number of known fields.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FieldCatalog for StandardCatalog {
    fn field_type(&self, name: &str) -> Option<FieldType> {
        match self.types.get(name) {
            Some(t) => Some(*t),
            None => self.types.get(name.to_ascii_uppercase().as_str()).copied(),
        }
    }

    fn enumeration(&self, name: &str) -> Option<&[&'static str]> {
        match self.enumerations.get(name) {
            Some(values) => Some(*values),
            None => self
                .enumerations
                .get(name.to_ascii_uppercase().as_str())
                .copied(),
        }
    }
}
