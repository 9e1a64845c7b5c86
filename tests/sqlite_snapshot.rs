use tempfile::TempDir;

use adiflog::{
    core::book::{Book, BookSnapshotV1},
    persist::{BookSink, PersistError, sqlite::SqliteBookSink},
    record::Record,
};

fn book_with(calls: &[&str]) -> Book {
    let mut book = Book::new();
    let mut header = Record::header();
    header.set_header_comment("station log");
    header.set("PROGRAMID", "ADIFLOG");
    book.set_header(header).expect("header");
    for (i, call) in calls.iter().enumerate() {
        let time = format!("{:02}00", 10 + i);
        book.insert(Record::from_pairs([
            ("CALL", *call),
            ("QSO_DATE", "20230101"),
            ("TIME_ON", time.as_str()),
        ]))
        .expect("insert");
    }
    book
}

#[test]
fn snapshot_round_trips_through_file() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("log.db");

    let book = book_with(&["W1AW", "K1ABC", "N0CALL"]);
    let mut sink = SqliteBookSink::open(&db_path).expect("open sqlite");
    assert!(sink.load_latest().expect("empty").is_none());
    sink.save(&book.export_snapshot()).expect("save");
    drop(sink);

    let sink = SqliteBookSink::open(&db_path).expect("reopen");
    let restored = sink.load_book().expect("load");
    assert_eq!(restored, book);
    assert_eq!(
        restored.header().map(|h| h.header_comment()),
        Some("station log")
    );
}

#[test]
fn latest_snapshot_wins_and_prune_keeps_newest() {
    let mut sink = SqliteBookSink::open_in_memory().expect("open");
    let first = book_with(&["W1AW"]);
    let second = book_with(&["W1AW", "K1ABC"]);
    let a = sink.save(&first.export_snapshot()).expect("a");
    let b = sink.save(&second.export_snapshot()).expect("b");
    assert!(b > a);

    assert_eq!(sink.load_latest().expect("latest"), Some(second.export_snapshot()));
    assert_eq!(sink.snapshot_count().expect("count"), 2);
    assert_eq!(sink.prune(1).expect("prune"), 1);
    assert_eq!(sink.snapshot_count().expect("count"), 1);
    assert_eq!(sink.load_book().expect("book"), second);
}

#[test]
fn empty_store_loads_empty_book() {
    let sink = SqliteBookSink::open_in_memory().expect("open");
    assert!(sink.load_book().expect("book").is_empty());
}

#[test]
fn snapshot_with_invalid_record_is_rejected() {
    let mut sink = SqliteBookSink::open_in_memory().expect("open");
    let snapshot = BookSnapshotV1 {
        header: None,
        records: vec![Record::from_pairs([("CALL", "W1AW")])],
    };
    sink.save(&snapshot).expect("save");
    assert!(matches!(sink.load_book(), Err(PersistError::Book(_))));
}
