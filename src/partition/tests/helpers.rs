use std::fs;
use std::sync::Arc;

use tempfile::TempDir;

use crate::manager::SymbolStore;
use crate::partition::{Partition, PartitionConfig, bounds_for, partition_name};
use crate::schema::{ColumnDef, ColumnKind, JournalSchema, PartitionBy, Value};
use crate::storage::FileMode;
use crate::test_utils::init_tracing;
use crate::tx::{PartitionTxData, SymbolTxData};

pub const DAY_MS: i64 = 86_400_000;

/// `sym` (indexed symbol), `price` (nullable double), `note` (string), `ts`.
pub fn quote_schema() -> JournalSchema {
    JournalSchema::new(
        vec![
            ColumnDef::new("sym", ColumnKind::Symbol).indexed().distinct(16),
            ColumnDef::new("price", ColumnKind::Double).nullable(),
            ColumnDef::new("note", ColumnKind::String).max_size(64),
            ColumnDef::new("ts", ColumnKind::DateTime),
        ],
        "ts",
    )
    .unwrap()
}

pub struct Fixture {
    pub dir: TempDir,
    pub symbols: SymbolStore,
    pub config: Arc<PartitionConfig>,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let schema = quote_schema();
        let symbols = SymbolStore::open(dir.path(), &schema, FileMode::ReadWrite, Some(8)).unwrap();
        let config = Arc::new(PartitionConfig {
            schema,
            mode: FileMode::ReadWrite,
            record_count_hint: 64,
            chunk_bit_hint: Some(8),
            symbols: symbols.tables().to_vec(),
        });
        Self { dir, symbols, config }
    }

    /// Day partition `id` starting at `day * DAY_MS`, directory created.
    pub fn partition(&self, id: u32, day: i64) -> Partition {
        let bounds = bounds_for(day * DAY_MS, PartitionBy::Day).unwrap();
        let name = partition_name(bounds.start, PartitionBy::Day).unwrap();
        let dir = self.dir.path().join(&name);
        fs::create_dir_all(&dir).unwrap();
        Partition::new(id, name, dir, bounds, Arc::clone(&self.config))
    }

    pub fn symbol_tx(&self) -> SymbolTxData {
        self.symbols.read_tx_data(&[], &[]).unwrap()
    }
}

pub fn quote(sym: &str, price: Option<f64>, note: &str, ts: i64) -> Vec<Value> {
    vec![
        Value::Str(sym.to_string()),
        price.map_or(Value::Null, Value::Double),
        Value::Str(note.to_string()),
        Value::DateTime(ts),
    ]
}

/// Appends `count` rows with timestamps `start, start + step, ...`.
pub fn append_quotes(
    partition: &Partition,
    tx: &mut PartitionTxData,
    symbols: &mut SymbolTxData,
    start: i64,
    step: i64,
    count: u64,
) {
    let guard = partition.acquire().unwrap();
    for i in 0..count {
        let sym = format!("S{}", i % 3);
        let row = quote(&sym, Some(i as f64), "n", start + step * i as i64);
        guard.append(&row, tx, symbols).unwrap();
    }
}
