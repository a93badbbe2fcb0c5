use std::path::Path;

use crate::manager::{ManagerOptions, PartitionManager};
use crate::schema::{ColumnDef, ColumnKind, JournalSchema, PartitionBy, Value};
use crate::test_utils::init_tracing;
use crate::tx::{RowId, TxContext, TxMode};

pub const DAY: i64 = 86_400_000;
pub const HOUR: i64 = 3_600_000;

pub fn schema() -> JournalSchema {
    JournalSchema::new(
        vec![
            ColumnDef::new("sym", ColumnKind::Symbol).indexed().distinct(16),
            ColumnDef::new("venue", ColumnKind::Symbol).distinct(4),
            ColumnDef::new("price", ColumnKind::Double).nullable(),
            ColumnDef::new("ts", ColumnKind::DateTime),
        ],
        "ts",
    )
    .unwrap()
}

pub fn options(writable: bool) -> ManagerOptions {
    ManagerOptions {
        schema: schema(),
        partition_by: PartitionBy::Day,
        writable,
        record_count_hint: 64,
        chunk_bit_hint: Some(8),
        close_full_partitions_on_commit: false,
    }
}

pub fn open(root: &Path) -> PartitionManager {
    init_tracing();
    PartitionManager::open(root, options(true)).unwrap()
}

pub fn open_read_only(root: &Path) -> PartitionManager {
    init_tracing();
    PartitionManager::open(root, options(false)).unwrap()
}

pub fn row(sym: &str, price: f64, ts: i64) -> Vec<Value> {
    vec![
        Value::Str(sym.to_string()),
        Value::Str("XNAS".to_string()),
        Value::Double(price),
        Value::DateTime(ts),
    ]
}

/// Appends one row per timestamp, symbols cycling through `S0..S2`.
pub fn append_all(manager: &PartitionManager, tx: &mut TxContext, timestamps: &[i64]) -> Vec<RowId> {
    timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| {
            manager
                .append(tx, &row(&format!("S{}", i % 3), i as f64, *ts))
                .unwrap()
        })
        .collect()
}

/// Commits `timestamps` in one writer transaction.
pub fn commit_rows(manager: &PartitionManager, timestamps: &[i64]) -> Vec<RowId> {
    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    let ids = append_all(manager, &mut tx, timestamps);
    manager.commit(&mut tx).unwrap().unwrap();
    ids
}

pub fn total_rows(manager: &PartitionManager, tx: &mut TxContext) -> u64 {
    manager
        .visible_ids(tx)
        .into_iter()
        .map(|id| manager.row_count(tx, id).unwrap())
        .sum()
}
