use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use adiflog::{
    adif::{DecoderOptions, load_book, tag::TagDecoder, writer::write_book},
    catalog::StandardCatalog,
    core::book::Book,
    reconcile::{ImportSource, MatchConfig, Reconciler},
    record::Record,
};

fn qso(i: u32) -> Record {
    let day = 1 + (i / 1440) % 28;
    let minute = i % 1440;
    let date = format!("202301{day:02}");
    let time = format!("{:02}{:02}", minute / 60, minute % 60);
    let call = format!("K{i}AA");
    Record::from_pairs([
        ("CALL", call.as_str()),
        ("QSO_DATE", date.as_str()),
        ("TIME_ON", time.as_str()),
        ("BAND", "20M"),
        ("MODE", "CW"),
        ("RST_SENT", "599"),
        ("RST_RCVD", "579"),
    ])
}

fn book_of(n: u32) -> Book {
    let mut book = Book::new();
    for i in 0..n {
        book.insert(qso(i)).expect("insert");
    }
    book
}

fn bench_inserts(c: &mut Criterion) {
    c.bench_function("book_insert_20k", |b| {
        b.iter(|| book_of(20_000));
    });
}

fn bench_tag_decode(c: &mut Criterion) {
    let mut text = Vec::new();
    write_book(&mut text, &book_of(10_000)).expect("encode");
    let catalog = Arc::new(StandardCatalog::new());

    c.bench_function("tag_decode_10k", |b| {
        b.iter(|| {
            let mut dec = TagDecoder::new(text.as_slice(), catalog.clone(), DecoderOptions::default());
            let mut book = Book::new();
            load_book(&mut dec, &mut book)
        });
    });
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_exact");
    let base = book_of(10_000);
    let catalog = Arc::new(StandardCatalog::new());

    for n in [100u32, 1000u32] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut book = base.clone();
                let mut engine = Reconciler::new(catalog.clone(), MatchConfig::default());
                let mut session =
                    engine.begin(ImportSource::FileImport, (0..n).map(qso).collect());
                engine.run(&mut session, &mut book)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_inserts, bench_tag_decode, bench_reconcile);
criterion_main!(benches);
