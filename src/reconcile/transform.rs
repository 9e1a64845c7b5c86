//! Source-specific rewrites applied before an incoming record is compared.

use crate::record::Record;

use super::session::{ImportSource, InteractiveService};

/// Rewrites `record` from the reporting service's point of view into ours.
pub fn prepare_incoming(source: ImportSource, record: &mut Record) {
    match source {
        ImportSource::InteractiveUpdate(InteractiveService::EqslLike) => from_eqsl(record),
        ImportSource::InteractiveUpdate(InteractiveService::LotwLike) => from_lotw(record),
        ImportSource::FileImport | ImportSource::FeedMerge => {}
    }
}

/// eQSL inbox entries are written by the other station: what they sent is
/// what we received.
fn from_eqsl(record: &mut Record) {
    let sent = record.remove("RST_SENT");
    let rcvd = record.remove("RST_RCVD");
    if let Some(v) = sent {
        record.set("RST_RCVD", v);
    }
    if let Some(v) = rcvd {
        record.set("RST_SENT", v);
    }

    record.rename("QSL_SENT", "EQSL_QSL_RCVD");
    record.rename("QSLSDATE", "EQSL_QSLRDATE");
    record.remove("QSL_SENT_VIA");
    if record.get_non_empty("EQSL_QSL_RCVD").is_none() {
        record.set("EQSL_QSL_RCVD", "Y");
    }
}

/// LoTW reports confirmations with the generic paper-QSL field names.
fn from_lotw(record: &mut Record) {
    record.rename("QSL_RCVD", "LOTW_QSL_RCVD");
    record.rename("QSLRDATE", "LOTW_QSLRDATE");
    record.remove("QSL_SENT");
    record.remove("QSLSDATE");
}
