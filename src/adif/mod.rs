//! ADIF decoding and encoding.
//!
//! Both wire formats implement [`Decoder`] and yield the same [`Record`] stream,
//! so callers can load a [`Book`] without caring which format the bytes were in.

/// Field resolution shared by both decoders.
pub mod fields;
/// Length-prefixed tag format decoder.
pub mod tag;
/// Tag-format and ADX encoders.
pub mod writer;
/// XML (ADX) decoder.
pub mod xml;

use std::{io::BufRead, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    catalog::FieldCatalog,
    core::book::Book,
    record::Record,
    types::{AdifFormat, Status},
};

/// Only this many warnings are kept verbatim; the rest are only counted.
pub const MAX_KEPT_WARNINGS: usize = 1000;

/// Fatal decode failure for the current call. Records returned earlier stay valid.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Underlying reader failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Input ended inside a tag, value, or element.
    #[error("malformed input at byte {offset}: {reason}")]
    Malformed {
        /// Bytes consumed when the problem was found.
        offset: u64,
        /// What was being read.
        reason: String,
    },
    /// The XML parser rejected the document.
    #[error("xml error at byte {offset}: {message}")]
    Xml {
        /// Parser position.
        offset: u64,
        /// Parser message.
        message: String,
    },
    /// A structural issue was answered with [`Decision::Abort`].
    #[error("decode aborted: {0}")]
    Aborted(Issue),
}

/// Structural problem in an ADX document that the caller may choose to skip.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Issue {
    /// Element name not valid anywhere in an ADX document.
    #[error("unknown element <{name}>")]
    UnknownElement {
        /// Element name.
        name: String,
    },
    /// Known element in the wrong parent.
    #[error("element <{element}> not allowed inside {parent}")]
    OutOfContext {
        /// Element name.
        element: String,
        /// Parent element, or `document` at top level.
        parent: String,
    },
    /// Second `HEADER` in one document.
    #[error("duplicate HEADER")]
    DuplicateHeader,
    /// `RECORD` closed without a `QSO_DATE`.
    #[error("record {record} has no QSO_DATE")]
    MissingQsoDate {
        /// 1-based record ordinal.
        record: u64,
    },
}

/// Caller answer to an [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Skip the offending construct and keep decoding.
    Continue,
    /// Stop decoding with [`DecodeError::Aborted`].
    Abort,
}

/// Resolves structural issues while decoding.
pub trait DecisionHandler {
    /// Returns whether decoding continues past `issue`.
    fn decide(&mut self, issue: &Issue) -> Decision;
}

impl<F> DecisionHandler for F
where
    F: FnMut(&Issue) -> Decision,
{
    fn decide(&mut self, issue: &Issue) -> Decision {
        self(issue)
    }
}

/// Default policy: abort on every structural issue.
#[derive(Debug, Clone, Copy, Default)]
pub struct AbortOnIssue;

impl DecisionHandler for AbortOnIssue {
    fn decide(&mut self, _issue: &Issue) -> Decision {
        Decision::Abort
    }
}

/// Non-fatal, field-level problem. The field is dropped unless noted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// Field name unknown to the catalog and not user-defined.
    UnknownField,
    /// `APP_` field of another program not listed in the header.
    UnsupportedAppField,
    /// `USERDEF` value naming a field the header never declared.
    UndeclaredUserField,
    /// Value outside a user field's enumeration or range.
    UserFieldRejected,
    /// Value missing from a standard field's enumeration.
    NotInEnumeration(String),
    /// `USERDEFn` outside the header.
    UserdefOutsideHeader,
    /// `USERDEFn` declaration that could not be parsed.
    InvalidUserdef,
    /// `APP` element missing `PROGRAMID` or `FIELDNAME`.
    InvalidAppField,
    /// Non-whitespace after a value; the value itself is kept.
    TrailingFragment(String),
    /// Length that is not a decimal number.
    InvalidLength(String),
    /// `EOH` outside the header, or `EOR` closing a header.
    MisplacedTerminator,
    /// Non-whitespace outside any field.
    StrayText(String),
}

/// One field-level warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    /// 1-based ordinal of the record being decoded.
    pub record: u64,
    /// Field or element name.
    pub field: String,
    /// What went wrong.
    pub kind: WarningKind,
}

/// Monotonic counters kept by a decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Bytes consumed so far.
    pub bytes: u64,
    /// Records (including the header) produced so far.
    pub records: u64,
    /// Fields and constructs dropped so far.
    pub ignored: u64,
    /// The first [`MAX_KEPT_WARNINGS`] warnings.
    pub warnings: Vec<DecodeWarning>,
}

impl DecodeStats {
    pub(crate) fn warn(&mut self, field: &str, kind: WarningKind) {
        let record = self.records + 1;
        warn!(record, field, ?kind, "ignoring ADIF field");
        self.ignored += 1;
        if self.warnings.len() < MAX_KEPT_WARNINGS {
            self.warnings.push(DecodeWarning {
                record,
                field: field.to_string(),
                kind,
            });
        }
    }
}

/// Legacy `APP_` field rewritten to a current name before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppFieldAlias {
    /// Legacy field name.
    pub from: String,
    /// Current field name.
    pub to: String,
}

/// Decoder behavior that varies per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderOptions {
    /// `APP_<program_id>_*` fields are always kept.
    pub program_id: String,
    /// Renames applied to `APP_` fields before anything else.
    pub legacy_app_fields: Vec<AppFieldAlias>,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            program_id: "ADIFLOG".to_string(),
            legacy_app_fields: vec![AppFieldAlias {
                from: "APP_EQSL_AG".to_string(),
                to: "EQSL_AG".to_string(),
            }],
        }
    }
}

/// Pull-style source of decoded records.
pub trait Decoder {
    /// Next record, `Ok(None)` once input is exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, DecodeError>;
    /// Counters so far.
    fn stats(&self) -> &DecodeStats;
    /// Wire format handled by this decoder.
    fn format(&self) -> AdifFormat;
}

/// Builds a decoder for `format`. `handler` is only consulted by the XML decoder.
pub fn open_decoder<'a, R, H>(
    format: AdifFormat,
    reader: R,
    catalog: Arc<dyn FieldCatalog>,
    options: DecoderOptions,
    handler: H,
) -> Box<dyn Decoder + 'a>
where
    R: BufRead + 'a,
    H: DecisionHandler + 'a,
{
    match format {
        AdifFormat::Tag => Box::new(tag::TagDecoder::new(reader, catalog, options)),
        AdifFormat::Xml => Box::new(xml::XmlDecoder::new(reader, catalog, options, handler)),
    }
}

/// Outcome of [`load_book`].
#[derive(Debug)]
pub struct LoadReport {
    /// Terminal status.
    pub status: Status,
    /// Records inserted into the book.
    pub accepted: usize,
    /// Records the book refused (no valid `QSO_DATE`).
    pub rejected: usize,
    /// True when a header was applied.
    pub header: bool,
    /// Decoder counters at the end.
    pub stats: DecodeStats,
    /// Failure that stopped decoding, if any.
    pub error: Option<DecodeError>,
}

/// Resets `book` and fills it from `decoder`.
///
/// A failure part-way keeps the records inserted before it.
pub fn load_book(decoder: &mut dyn Decoder, book: &mut Book) -> LoadReport {
    book.clear();
    let mut report = LoadReport {
        status: Status::Ok,
        accepted: 0,
        rejected: 0,
        header: false,
        stats: DecodeStats::default(),
        error: None,
    };

    loop {
        match decoder.next_record() {
            Ok(Some(record)) if record.is_header() => {
                if book.set_header(record).is_ok() {
                    report.header = true;
                }
            }
            Ok(Some(record)) => match book.insert(record) {
                Ok(_) => {
                    report.accepted += 1;
                    if report.accepted % 1000 == 0 {
                        debug!(
                            accepted = report.accepted,
                            bytes = decoder.stats().bytes,
                            "loading log"
                        );
                    }
                }
                Err(err) => {
                    report.rejected += 1;
                    warn!(error = %err, "record rejected by log");
                }
            },
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, accepted = report.accepted, "log load stopped");
                report.status = Status::Failed;
                report.error = Some(err);
                break;
            }
        }
    }

    report.stats = decoder.stats().clone();
    info!(
        format = ?decoder.format(),
        status = ?report.status,
        accepted = report.accepted,
        rejected = report.rejected,
        ignored = report.stats.ignored,
        bytes = report.stats.bytes,
        "log load finished"
    );
    report
}
