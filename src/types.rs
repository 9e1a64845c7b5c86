//! Shared primitive types used across decoding, storage, and reconciliation.

use serde::{Deserialize, Serialize};

/// Contact start/end instant, UTC without zone information (ADIF carries none).
pub type Timestamp = chrono::NaiveDateTime;

/// Index of a record inside a [`crate::core::book::Book`].
pub type RecordIndex = usize;

/// Terminal status reported by decoders and import sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Completed normally.
    Ok,
    /// Stopped on an error; work done before the error is kept.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

/// ADIF wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdifFormat {
    /// Length-prefixed tag format (`.adi`).
    Tag,
    /// XML variant (`.adx`).
    Xml,
}

impl AdifFormat {
    /// Guesses the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "adi" | "adif" => Some(Self::Tag),
            "adx" | "xml" => Some(Self::Xml),
            _ => None,
        }
    }
}
