//! Snapshot reads, symbol lookups and time-range queries.

use tempfile::TempDir;

use super::helpers::{DAY, HOUR, commit_rows, open, row, total_rows};
use crate::column::ColumnError;
use crate::manager::ManagerError;
use crate::schema::Value;
use crate::tx::{RowId, TxMode};

#[test]
fn reader_keeps_its_snapshot() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[1, 2, 3]);

    let mut reader = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.symbol_rows(&mut reader, "sym", "S0").unwrap(), vec![RowId::new(1, 0)]);

    commit_rows(&manager, &[4, 5, 6, DAY]);

    assert_eq!(total_rows(&manager, &mut reader), 3);
    assert_eq!(manager.visible_ids(&reader), vec![1]);
    assert_eq!(manager.symbol_rows(&mut reader, "sym", "S0").unwrap(), vec![RowId::new(1, 0)]);
    assert!(matches!(
        manager.read_row(&mut reader, RowId::new(1, 3)),
        Err(ManagerError::RowNotFound(_))
    ));

    let mut fresh = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut fresh), 7);
    assert_eq!(
        manager.symbol_rows(&mut fresh, "sym", "S0").unwrap(),
        vec![RowId::new(2, 0), RowId::new(1, 3), RowId::new(1, 0)]
    );
}

#[test]
fn values_read_back_by_row_id() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    let a = manager.append(&mut tx, &row("EURUSD", 1.08, HOUR)).unwrap();
    let mut with_null = row("GBPUSD", 0.0, 2 * HOUR);
    with_null[2] = Value::Null;
    let b = manager.append(&mut tx, &with_null).unwrap();
    manager.commit(&mut tx).unwrap();

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.read_row(&mut tx, a).unwrap(), row("EURUSD", 1.08, HOUR));
    assert_eq!(manager.get_value(&mut tx, b, 2).unwrap(), Value::Null);
    assert_eq!(manager.get_value(&mut tx, b, 0).unwrap(), Value::Str("GBPUSD".into()));
    assert!(manager.get_value(&mut tx, b, 9).is_err());
    assert!(matches!(
        manager.read_row(&mut tx, RowId::new(0, 0)),
        Err(ManagerError::RowNotFound(_))
    ));
    assert!(matches!(
        manager.read_row(&mut tx, RowId::new(7, 0)),
        Err(ManagerError::RowNotFound(_))
    ));
}

#[test]
fn symbol_queries_check_the_column() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[1]);

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert!(matches!(
        manager.symbol_rows(&mut tx, "venue", "XNAS"),
        Err(ManagerError::Column(ColumnError::NotIndexed(_)))
    ));
    assert!(matches!(
        manager.symbol_rows(&mut tx, "price", "1"),
        Err(ManagerError::Column(ColumnError::TypeMismatch { .. }))
    ));
    assert!(matches!(
        manager.symbol_rows(&mut tx, "nope", "x"),
        Err(ManagerError::Schema(_))
    ));
    assert_eq!(manager.symbol_values(&mut tx, "venue").unwrap(), ["XNAS"]);
}

#[test]
fn rows_between_spans_partitions() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    let ids = commit_rows(&manager, &[HOUR, 2 * HOUR, DAY, DAY + HOUR, 3 * DAY]);

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.rows_between(&mut tx, 2 * HOUR, DAY + HOUR).unwrap(), ids[1..3].to_vec());
    assert_eq!(manager.rows_between(&mut tx, i64::MIN, i64::MAX).unwrap(), ids);
    assert!(manager.rows_between(&mut tx, 5, 5).unwrap().is_empty());
    assert!(manager.rows_between(&mut tx, 2 * DAY, 3 * DAY).unwrap().is_empty());
}

#[test]
fn timestamp_search_and_partition_lookup() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[10, 20, 30, DAY + 10]);

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.binary_search_timestamp(&mut tx, 1, 20).unwrap(), 1);
    assert_eq!(manager.binary_search_timestamp(&mut tx, 1, 25).unwrap(), !2);
    assert_eq!(manager.binary_search_timestamp(&mut tx, 2, DAY + 10).unwrap(), 0);
    assert!(manager.binary_search_timestamp(&mut tx, 3, 0).is_err());

    assert_eq!(manager.partition_for(&tx, 5).unwrap(), Some(1));
    assert_eq!(manager.partition_for(&tx, DAY).unwrap(), Some(2));
    assert_eq!(manager.partition_for(&tx, 5 * DAY).unwrap(), None);
}
