use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use adiflog::{
    catalog::StandardCatalog,
    config::LogConfig,
    core::book::{Book, BookSnapshotV1},
    persist::{BookSink, PersistResult, sqlite::SqliteBookSink},
    reconcile::{DecisionKind, ImportSource, InteractiveService, Resolution, SessionState},
    record::Record,
    runtime::{
        events::LogEvent,
        handle::{RuntimeConfig, RuntimeError, spawn_log},
    },
    types::{AdifFormat, Status},
};

fn qso(call: &str, date: &str, time: &str) -> Record {
    Record::from_pairs([
        ("CALL", call),
        ("QSO_DATE", date),
        ("TIME_ON", time),
        ("BAND", "40M"),
        ("MODE", "SSB"),
    ])
}

fn catalog() -> Arc<StandardCatalog> {
    Arc::new(StandardCatalog::new())
}

#[derive(Clone, Default)]
struct MemorySink {
    saved: Arc<Mutex<Vec<BookSnapshotV1>>>,
}

impl BookSink for MemorySink {
    fn save(&mut self, snapshot: &BookSnapshotV1) -> PersistResult<i64> {
        let mut saved = self.saved.lock().expect("lock");
        saved.push(snapshot.clone());
        Ok(saved.len() as i64)
    }

    fn load_latest(&self) -> PersistResult<Option<BookSnapshotV1>> {
        Ok(self.saved.lock().expect("lock").last().cloned())
    }
}

#[tokio::test]
async fn load_insert_query_and_events_ordered() {
    let handle = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    let mut sub = handle.subscribe();

    let adif = "test log\r\n<EOH>\r\n\
        <CALL:4>W1AW<QSO_DATE:8>20230101<TIME_ON:4>1200<EOR>\r\n\
        <CALL:5>K1ABC<QSO_DATE:8>20230102<TIME_ON:4>1300<EOR>\r\n";
    let report = handle
        .load(AdifFormat::Tag, adif.as_bytes().to_vec())
        .await
        .expect("load");
    assert_eq!(report.status, Status::Ok);
    assert_eq!(report.accepted, 2);

    let idx = handle
        .insert(qso("N0CALL", "20221231", "2359"))
        .await
        .expect("insert");
    assert_eq!(idx, 0);
    assert_eq!(handle.len().await.expect("len"), 3);
    assert_eq!(
        handle
            .get(1)
            .await
            .expect("get")
            .and_then(|r| r.get("CALL").map(str::to_string)),
        Some("W1AW".to_string())
    );
    assert_eq!(
        handle
            .header()
            .await
            .expect("header")
            .map(|h| h.header_comment().to_string()),
        Some("test log".to_string())
    );

    assert_eq!(
        sub.recv().await.expect("loaded"),
        LogEvent::Loaded {
            accepted: 2,
            rejected: 0,
            status: Status::Ok
        }
    );
    assert_eq!(
        sub.recv().await.expect("inserted"),
        LogEvent::Inserted { index: 0 }
    );

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn import_session_blocks_direct_writes_until_resolved() {
    let mut book = Book::new();
    book.insert(qso("W1AW", "20230101", "1200")).expect("seed");
    let handle = spawn_log(book, None, catalog(), LogConfig::default());
    let mut sub = handle.subscribe();

    let source = ImportSource::InteractiveUpdate(InteractiveService::LotwLike);
    let status = handle
        .begin_import(source, vec![qso("K1ABC", "20230101", "1300")])
        .await
        .expect("begin");
    let SessionState::AwaitingDecision(pending) = status.state else {
        panic!("expected a pending decision");
    };
    assert_eq!(pending.kind, DecisionKind::PossiblyNew);
    assert_eq!(status.remaining, 1);

    assert!(matches!(
        handle.insert(qso("N0CALL", "20230101", "1400")).await,
        Err(RuntimeError::SessionActive)
    ));
    assert!(matches!(
        handle.begin_import(source, Vec::new()).await,
        Err(RuntimeError::SessionActive)
    ));
    assert!(matches!(
        handle.load(AdifFormat::Tag, Vec::new()).await,
        Err(RuntimeError::SessionActive)
    ));
    assert!(handle.import_state().await.expect("state").is_some());

    let status = handle
        .resolve(Resolution::AcceptAsNew)
        .await
        .expect("resolve");
    assert_eq!(status.state, SessionState::Finished(Status::Ok));
    assert_eq!(status.counters.added, 1);
    assert_eq!(handle.len().await.expect("len"), 2);
    assert!(handle.import_state().await.expect("state").is_none());
    assert!(matches!(
        handle.resolve(Resolution::AcceptAsNew).await,
        Err(RuntimeError::NoSession)
    ));

    let mut saw_await = false;
    let mut finished = None;
    while finished.is_none() {
        match sub.recv().await.expect("event") {
            LogEvent::AwaitingDecision(_) => saw_await = true,
            LogEvent::ImportFinished { status, counters } => finished = Some((status, counters)),
            _ => {}
        }
    }
    assert!(saw_await);
    let (status, counters) = finished.expect("finished");
    assert_eq!(status, Status::Ok);
    assert_eq!(counters.added, 1);
}

#[tokio::test]
async fn cancel_import_reports_counters() {
    let handle = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    assert!(matches!(
        handle.cancel_import().await,
        Err(RuntimeError::NoSession)
    ));

    let source = ImportSource::InteractiveUpdate(InteractiveService::EqslLike);
    handle
        .begin_import(
            source,
            vec![qso("K1ABC", "20230101", "1300"), qso("W1AW", "20230101", "1400")],
        )
        .await
        .expect("begin");
    let counters = handle.cancel_import().await.expect("cancel");
    assert_eq!(counters.checked, 1);
    assert_eq!(counters.added, 0);
    assert_eq!(handle.len().await.expect("len"), 0);
    assert!(handle.import_state().await.expect("state").is_none());
}

#[tokio::test]
async fn feed_watermark_survives_between_sessions() {
    let handle = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    let status = handle
        .begin_import(ImportSource::FeedMerge, vec![qso("W1AW", "20230101", "1200")])
        .await
        .expect("first");
    assert_eq!(status.counters.added, 1);
    assert!(handle.feed_watermark().await.expect("mark").is_some());

    let status = handle
        .begin_import(ImportSource::FeedMerge, vec![qso("W1AW", "20230101", "1200")])
        .await
        .expect("second");
    assert_eq!(status.counters.checked, 1);
    assert_eq!(status.counters.accepted, 0);
    assert_eq!(handle.len().await.expect("len"), 1);
}

#[tokio::test]
async fn structural_policy_comes_from_config() {
    let doc = "<ADX><RECORDS><FOO/><RECORD><QSO_DATE>20230101</QSO_DATE></RECORD></RECORDS></ADX>";

    let handle = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    let report = handle
        .load(AdifFormat::Xml, doc.as_bytes().to_vec())
        .await
        .expect("load");
    assert_eq!(report.status, Status::Failed);
    assert_eq!(report.accepted, 0);

    let mut config = LogConfig::default();
    config.runtime.continue_on_structural = true;
    let handle = spawn_log(Book::new(), None, catalog(), config);
    let report = handle
        .load(AdifFormat::Xml, doc.as_bytes().to_vec())
        .await
        .expect("load");
    assert_eq!(report.status, Status::Ok);
    assert_eq!(report.accepted, 1);
}

#[tokio::test]
async fn autosave_fires_after_configured_changes() {
    let sink = MemorySink::default();
    let saved = Arc::clone(&sink.saved);
    let config = LogConfig {
        runtime: RuntimeConfig {
            autosave_every_ops: 2,
            ..RuntimeConfig::default()
        },
        ..LogConfig::default()
    };
    let handle = spawn_log(Book::new(), Some(Box::new(sink)), catalog(), config);
    let mut sub = handle.subscribe();

    handle.insert(qso("W1AW", "20230101", "1200")).await.expect("a");
    assert!(saved.lock().expect("lock").is_empty());
    handle.insert(qso("K1ABC", "20230101", "1300")).await.expect("b");
    assert_eq!(saved.lock().expect("lock").len(), 1);
    assert_eq!(saved.lock().expect("lock")[0].records.len(), 2);

    let mut saw_saved = false;
    for _ in 0..3 {
        if let LogEvent::Saved { records, .. } = sub.recv().await.expect("event") {
            assert_eq!(records, 2);
            saw_saved = true;
            break;
        }
    }
    assert!(saw_saved);

    // Nothing changed since the autosave, so shutdown does not save again.
    handle.shutdown().await.expect("shutdown");
    assert_eq!(saved.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn checkpoint_persists_to_sqlite() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("log.db");

    let sink = SqliteBookSink::open(&db_path).expect("open");
    let handle = spawn_log(Book::new(), Some(Box::new(sink)), catalog(), LogConfig::default());
    handle.insert(qso("W1AW", "20230101", "1200")).await.expect("insert");
    let id = handle.checkpoint().await.expect("checkpoint");
    assert!(id.is_some());
    let snapshot = handle.snapshot().await.expect("snapshot");
    handle.shutdown().await.expect("shutdown");

    let reopened = SqliteBookSink::open(&db_path).expect("reopen");
    let book = reopened.load_book().expect("load");
    assert_eq!(book.export_snapshot(), snapshot);

    let no_sink = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    assert_eq!(no_sink.checkpoint().await.expect("checkpoint"), None);
}

#[tokio::test]
async fn closed_runtime_reports_channel_closed() {
    let handle = spawn_log(Book::new(), None, catalog(), LogConfig::default());
    handle.shutdown().await.expect("shutdown");
    assert!(matches!(handle.len().await, Err(RuntimeError::ChannelClosed)));
}
