//! ADIF contact logging: tag and XML decoders, a chronological log, and
//! reconciliation of imported records against it.
//!
//! # Examples
//!
//! Decoding into a [`core::book::Book`]:
//! ```
//! use std::sync::Arc;
//!
//! use adiflog::{
//!     adif::{AbortOnIssue, DecoderOptions, load_book, open_decoder},
//!     catalog::StandardCatalog,
//!     core::book::Book,
//!     types::{AdifFormat, Status},
//! };
//!
//! let input = "<CALL:4>W1AW<QSO_DATE:8>20230101<TIME_ON:4>1200<EOR>";
//! let mut decoder = open_decoder(
//!     AdifFormat::Tag,
//!     input.as_bytes(),
//!     Arc::new(StandardCatalog::new()),
//!     DecoderOptions::default(),
//!     AbortOnIssue,
//! );
//! let mut book = Book::new();
//! let report = load_book(decoder.as_mut(), &mut book);
//! assert_eq!(report.status, Status::Ok);
//! assert_eq!(book.get(0).and_then(|r| r.get("CALL")), Some("W1AW"));
//! ```
//!
//! Runtime usage with a SQLite sink:
//! ```no_run
//! use std::sync::Arc;
//!
//! use adiflog::{
//!     catalog::StandardCatalog,
//!     config::LogConfig,
//!     persist::sqlite::SqliteBookSink,
//!     reconcile::ImportSource,
//!     record::Record,
//!     runtime::handle::spawn_log,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteBookSink::open("log.db").expect("open sqlite");
//! let book = sink.load_book().expect("load");
//! let handle = spawn_log(
//!     book,
//!     Some(Box::new(sink)),
//!     Arc::new(StandardCatalog::new()),
//!     LogConfig::default(),
//! );
//! let qso = Record::from_pairs([
//!     ("CALL", "K1ABC"),
//!     ("QSO_DATE", "20240301"),
//!     ("TIME_ON", "1405"),
//!     ("BAND", "20M"),
//!     ("MODE", "FT8"),
//! ]);
//! let status = handle
//!     .begin_import(ImportSource::FeedMerge, vec![qso])
//!     .await
//!     .expect("import");
//! println!("{:?}", status.counters);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// ADIF decoders, encoders, and the book loader.
pub mod adif;
/// Field types and normalization rules.
pub mod catalog;
/// TOML configuration.
pub mod config;
/// Chronological record store.
pub mod core;
/// Snapshot persistence abstraction and SQLite implementation.
pub mod persist;
/// Import reconciliation.
pub mod reconcile;
/// Field-map record type.
pub mod record;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
