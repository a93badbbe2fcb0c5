//! Append and lookup benchmarks.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench append              # run everything
//! cargo bench --bench append -- symbol    # filter by name
//! ```
//!
//! Reports are generated in `target/criterion/report/index.html`.

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::Rng;

use journaldb::{ColumnDef, ColumnKind, Journal, JournalConfig, JournalSchema, PartitionBy, Value};
use tempfile::TempDir;

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

const SYMBOLS: usize = 20;

fn schema() -> JournalSchema {
    JournalSchema::new(
        vec![
            ColumnDef::new("sym", ColumnKind::Symbol).indexed().distinct(SYMBOLS),
            ColumnDef::new("bid", ColumnKind::Double),
            ColumnDef::new("ask", ColumnKind::Double),
            ColumnDef::new("ex", ColumnKind::String).max_size(16).avg_size(4),
            ColumnDef::new("ts", ColumnKind::DateTime),
        ],
        "ts",
    )
    .expect("schema")
}

fn open(dir: &std::path::Path, rows: u64) -> Journal {
    Journal::open(
        dir,
        JournalConfig {
            partition_by: PartitionBy::Day,
            record_count_hint: rows,
            ..JournalConfig::new(schema())
        },
    )
    .expect("open")
}

fn quote(rng: &mut impl Rng, i: u64) -> Vec<Value> {
    let bid: f64 = rng.random_range(1.0..2.0);
    vec![
        Value::Str(format!("Symbol_{}", i as usize % SYMBOLS)),
        Value::Double(bid),
        Value::Double(bid + 0.0001),
        Value::Str("LSE".into()),
        Value::DateTime(i as i64),
    ]
}

fn filled(rows: u64) -> (TempDir, Journal) {
    let dir = TempDir::new().expect("tempdir");
    let journal = open(dir.path(), rows);
    let mut rng = rand::rng();
    let mut writer = journal.writer().expect("writer");
    for i in 0..rows {
        writer.append(&quote(&mut rng, i)).expect("append");
    }
    writer.commit().expect("commit");
    drop(writer);
    (dir, journal)
}

// ------------------------------------------------------------------------------------------------
// Benchmarks
// ------------------------------------------------------------------------------------------------

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    for &rows in &[1_000u64, 10_000] {
        group.throughput(Throughput::Elements(rows));
        group.bench_with_input(BenchmarkId::new("commit_once", rows), &rows, |b, &rows| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().expect("tempdir");
                    let journal = open(dir.path(), rows);
                    (dir, journal)
                },
                |(_dir, journal)| {
                    let mut rng = rand::rng();
                    let mut writer = journal.writer().expect("writer");
                    for i in 0..rows {
                        writer.append(&quote(&mut rng, i)).expect("append");
                    }
                    writer.commit().expect("commit");
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

fn bench_symbol_rows(c: &mut Criterion) {
    let (_dir, journal) = filled(100_000);
    let mut reader = journal.reader().expect("reader");
    c.bench_function("symbol_rows/100k", |b| {
        b.iter(|| black_box(reader.symbol_rows("sym", "Symbol_7").expect("lookup")));
    });
}

fn bench_read_row(c: &mut Criterion) {
    let rows = 100_000u64;
    let (_dir, journal) = filled(rows);
    let mut reader = journal.reader().expect("reader");
    let mut rng = rand::rng();
    c.bench_function("read_row/random", |b| {
        b.iter(|| {
            let local = rng.random_range(0..rows);
            black_box(reader.read_row(journaldb::RowId::new(1, local)).expect("read"))
        });
    });
}

fn bench_timestamp_search(c: &mut Criterion) {
    let rows = 100_000u64;
    let (_dir, journal) = filled(rows);
    let mut reader = journal.reader().expect("reader");
    c.bench_function("binary_search_timestamp", |b| {
        b.iter(|| black_box(reader.binary_search_timestamp(1, 77_777).expect("search")));
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_symbol_rows,
    bench_read_row,
    bench_timestamp_search
);
criterion_main!(benches);
