use chrono::NaiveDate;
use proptest::prelude::*;

use adiflog::{
    core::book::{Book, BookError},
    record::Record,
    types::Timestamp,
};

fn rec(call: &str, date: &str, time: &str) -> Record {
    Record::from_pairs([("CALL", call), ("QSO_DATE", date), ("TIME_ON", time)])
}

fn ts(date: &str, time: &str) -> Timestamp {
    let d = NaiveDate::parse_from_str(date, "%Y%m%d").expect("date");
    let t = chrono::NaiveTime::parse_from_str(time, "%H%M%S").expect("time");
    d.and_time(t)
}

fn assert_sorted(book: &Book) {
    let keys: Vec<_> = book.iter().map(|r| r.sort_key().expect("key")).collect();
    assert!(keys.windows(2).all(|w| w[0] <= w[1]), "{keys:?}");
}

#[derive(Debug, Clone)]
enum Action {
    Insert { day: u8, minute: u16, with_time: bool },
    Remove { target: u8 },
    Retime { target: u8, minute: u16 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        4 => (1u8..4, 0u16..1440, any::<bool>())
            .prop_map(|(day, minute, with_time)| Action::Insert { day, minute, with_time }),
        1 => any::<u8>().prop_map(|target| Action::Remove { target }),
        1 => (any::<u8>(), 0u16..1440).prop_map(|(target, minute)| Action::Retime { target, minute }),
    ]
}

fn hhmm(minute: u16) -> String {
    format!("{:02}{:02}", minute / 60, minute % 60)
}

proptest! {
    #[test]
    fn every_mutation_keeps_records_sorted(actions in prop::collection::vec(action_strategy(), 1..150)) {
        let mut book = Book::new();
        for (n, action) in actions.into_iter().enumerate() {
            match action {
                Action::Insert { day, minute, with_time } => {
                    let mut r = Record::new();
                    r.set("CALL", format!("K{n}AA"));
                    r.set("QSO_DATE", format!("202301{day:02}"));
                    if with_time {
                        r.set("TIME_ON", hhmm(minute));
                    }
                    let idx = book.insert(r.clone()).expect("insert");
                    prop_assert_eq!(book.get(idx), Some(&r));
                }
                Action::Remove { target } => {
                    if book.is_empty() {
                        continue;
                    }
                    let idx = usize::from(target) % book.len();
                    book.remove(idx).expect("remove");
                }
                Action::Retime { target, minute } => {
                    if book.is_empty() {
                        continue;
                    }
                    let idx = usize::from(target) % book.len();
                    let new_idx = book
                        .modify(idx, |r| {
                            r.set("TIME_ON", hhmm(minute));
                        })
                        .expect("modify");
                    let expected = hhmm(minute);
                    prop_assert_eq!(book.get(new_idx).and_then(|r| r.get("TIME_ON")), Some(expected.as_str()));
                }
            }
            let keys: Vec<_> = book.iter().map(|r| r.sort_key()).collect();
            prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}

#[test]
fn equal_timestamps_keep_insertion_order() {
    let mut book = Book::new();
    book.insert(rec("W1AW", "20230101", "1200")).expect("a");
    book.insert(rec("K1ABC", "20230101", "1200")).expect("b");
    let idx = book.insert(rec("N0CALL", "20230101", "1200")).expect("c");
    assert_eq!(idx, 2);
    let calls: Vec<_> = book.iter().filter_map(|r| r.get("CALL")).collect();
    assert_eq!(calls, ["W1AW", "K1ABC", "N0CALL"]);
}

#[test]
fn insert_requires_valid_qso_date() {
    let mut book = Book::new();
    let err = book
        .insert(Record::from_pairs([("CALL", "W1AW"), ("QSO_DATE", "2023-01-01")]))
        .unwrap_err();
    assert_eq!(err, BookError::MissingQsoDate);
    assert_eq!(book.insert(Record::header()).unwrap_err(), BookError::HeaderInLog);
    assert!(book.is_empty());
}

#[test]
fn header_must_be_a_header() {
    let mut book = Book::new();
    assert_eq!(
        book.set_header(rec("W1AW", "20230101", "1200")).unwrap_err(),
        BookError::NotHeader
    );
    let mut header = Record::header();
    header.set("ADIF_VER", "3.1.4");
    assert_eq!(book.set_header(header.clone()), Ok(None));
    assert_eq!(book.header(), Some(&header));
    assert_eq!(book.take_header(), Some(header));
    assert!(book.header().is_none());
}

#[test]
fn index_for_exact_and_nearest() {
    let mut book = Book::new();
    book.insert(rec("A", "20230101", "120000")).expect("a");
    book.insert(rec("B", "20230101", "130000")).expect("b");
    book.insert(rec("C", "20230101", "140000")).expect("c");

    assert_eq!(book.index_for(ts("20230101", "130000"), false), 1);
    assert_eq!(book.index_for(ts("20230101", "130000"), true), 1);
    assert_eq!(book.index_for(ts("20230101", "121000"), false), 1);
    assert_eq!(book.index_for(ts("20230101", "121000"), true), 0);
    assert_eq!(book.index_for(ts("20230101", "125000"), true), 1);
    // Equidistant goes to the later record.
    assert_eq!(book.index_for(ts("20230101", "123000"), true), 1);
    assert_eq!(book.index_for(ts("20221231", "000000"), true), 0);
    assert_eq!(book.index_for(ts("20230102", "000000"), false), 3);
    assert_eq!(book.index_for(ts("20230102", "000000"), true), 2);
    assert_eq!(Book::new().index_for(ts("20230101", "000000"), true), 0);
}

#[test]
fn modify_moves_record_and_rolls_back_bad_dates() {
    let mut book = Book::new();
    book.insert(rec("A", "20230101", "1200")).expect("a");
    book.insert(rec("B", "20230101", "1300")).expect("b");

    let idx = book
        .modify(0, |r| {
            r.set("TIME_ON", "1400");
        })
        .expect("move");
    assert_eq!(idx, 1);
    assert_eq!(book.get(1).and_then(|r| r.get("CALL")), Some("A"));
    assert_sorted(&book);

    let err = book
        .modify(1, |r| {
            r.remove("QSO_DATE");
        })
        .unwrap_err();
    assert_eq!(err, BookError::MissingQsoDate);
    assert_eq!(book.get(1).and_then(|r| r.get("QSO_DATE")), Some("20230101"));
    assert_eq!(book.modify(5, |_| {}).unwrap_err(), BookError::OutOfRange(5));
}

#[test]
fn snapshot_rebuilds_identical_book() {
    let mut book = Book::new();
    let mut header = Record::header();
    header.set_header_comment("exported");
    book.set_header(header).expect("header");
    book.insert(rec("B", "20230102", "1300")).expect("b");
    book.insert(rec("A", "20230101", "1200")).expect("a");

    let restored = Book::from_snapshot(book.export_snapshot()).expect("restore");
    assert_eq!(restored, book);

    book.clear();
    assert!(book.is_empty());
    assert!(book.header().is_none());
}
