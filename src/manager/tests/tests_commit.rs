//! Rollback and failed commits.

use std::sync::Arc;

use tempfile::TempDir;

use super::helpers::{DAY, append_all, commit_rows, open, row, total_rows};
use crate::manager::{ManagerError, PartitionManager};
use crate::partition::PartitionError;
use crate::storage::CompositeFile;
use crate::tx::{RowId, TxMode};

fn partition_file(manager: &PartitionManager, id: u32, name: &str) -> Arc<CompositeFile> {
    let partition = manager.partition(id).unwrap();
    let guard = partition.acquire().unwrap();
    guard
        .storage()
        .files()
        .iter()
        .find(|(_, f)| f.path().ends_with(name))
        .map(|(_, f)| Arc::clone(f))
        .unwrap()
}

/// Committed on-disk state a failed commit must leave untouched.
#[derive(Debug, PartialEq, Eq)]
struct Committed {
    history: usize,
    partitions: usize,
    rows: u64,
    sym_key_block: u64,
    dedup_key_block: u64,
    symbol_count: u64,
}

fn committed(manager: &PartitionManager) -> Committed {
    let table = &manager.symbols.tables()[0];
    let [_, (_, offsets), _, _] = table.files();
    Committed {
        history: manager.tx_history().unwrap().len(),
        partitions: manager.partition_count().unwrap(),
        rows: manager.partition(1).unwrap().acquire().unwrap().read_tx_data(None, None).unwrap().row_count,
        sym_key_block: partition_file(manager, 1, "sym.k").read_u64(8).unwrap(),
        dedup_key_block: table.dedup().committed_offset().unwrap(),
        symbol_count: offsets.append_offset().unwrap() / 8,
    }
}

/// Commits `S0`, `S1` into day 1, then opens a writer that adds `S2` to
/// day 1 with `timestamps`. Returns the state before the writer.
fn pending_tx(manager: &PartitionManager, timestamps: &[i64]) -> (Committed, crate::tx::TxContext) {
    commit_rows(manager, &[1, 2]);
    let before = committed(manager);
    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    append_all(manager, &mut tx, timestamps);
    (before, tx)
}

/// # Scenario
/// A transaction extends day 1, then creates days 2 and 3, and is rolled
/// back.
///
/// # Expected behavior
/// The new directories are gone, day 1 is back to its committed rows, and
/// the next transaction reuses the same partition ids and names.
#[test]
fn rollback_discards_created_partitions() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[1, 2, 3]);

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    append_all(&manager, &mut tx, &[4, DAY, 2 * DAY]);
    assert_eq!(manager.partition_count().unwrap(), 3);
    manager.rollback(&mut tx).unwrap();

    assert_eq!(manager.partition_count().unwrap(), 1);
    assert!(!dir.path().join("1970-01-02").exists());
    assert!(!dir.path().join("1970-01-03").exists());
    let on_disk = manager.partition(1).unwrap().acquire().unwrap().read_tx_data(None, None).unwrap();
    assert_eq!(on_disk.row_count, 3);

    let ids = commit_rows(&manager, &[4, DAY]);
    assert_eq!(ids, vec![RowId::new(1, 3), RowId::new(2, 0)]);
    assert!(dir.path().join("1970-01-02").is_dir());

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut tx), 5);
}

#[test]
fn rolled_back_symbols_are_forgotten() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[1]);

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    manager
        .append(&mut tx, &row("GHOST", 1.0, 2))
        .unwrap();
    manager.rollback(&mut tx).unwrap();

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    manager
        .append(&mut tx, &row("REAL", 1.0, 2))
        .unwrap();
    manager.commit(&mut tx).unwrap();

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.symbol_values(&mut tx, "sym").unwrap(), ["S0", "REAL"]);
    assert!(manager.symbol_rows(&mut tx, "sym", "GHOST").unwrap().is_empty());
    assert_eq!(manager.symbol_rows(&mut tx, "sym", "REAL").unwrap(), vec![RowId::new(1, 1)]);
    assert_eq!(
        manager.get_value(&mut tx, RowId::new(1, 1), 0).unwrap(),
        crate::schema::Value::Str("REAL".into())
    );
}

/// # Scenario
/// The timestamp file's header write fails during a commit that touched
/// two partitions (the first committed early on the switch).
///
/// # Expected behavior
/// The commit reports failure, the tx log is unchanged, both partitions
/// read as their last committed state and the created one is removed.
#[test]
fn failed_commit_leaves_previous_state() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    commit_rows(&manager, &[1, 2]);

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    append_all(&manager, &mut tx, &[3, DAY]);
    partition_file(&manager, 2, "ts.d").fail_next_header_write();

    let err = manager.commit(&mut tx).unwrap_err();
    let ManagerError::CommitFailed(source) = err else {
        panic!("expected CommitFailed, got {err}");
    };
    assert!(matches!(
        *source,
        ManagerError::Partition(PartitionError::CommitFailed { .. })
    ));

    assert_eq!(manager.tx_history().unwrap().len(), 1);
    assert_eq!(manager.partition_count().unwrap(), 1);
    assert!(!dir.path().join("1970-01-02").exists());
    let on_disk = manager.partition(1).unwrap().acquire().unwrap().read_tx_data(None, None).unwrap();
    assert_eq!(on_disk.row_count, 2);

    let ids = commit_rows(&manager, &[3]);
    assert_eq!(ids, vec![RowId::new(1, 2)]);
}

#[test]
fn commit_is_the_visibility_point() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());

    let mut writer = manager.begin(TxMode::ReadWrite).unwrap();
    append_all(&manager, &mut writer, &[1, 2]);

    let mut reader = manager.begin(TxMode::ReadOnly).unwrap();
    assert!(manager.visible_ids(&reader).is_empty());
    assert!(matches!(
        manager.read_row(&mut reader, RowId::new(1, 0)),
        Err(ManagerError::RowNotFound(_))
    ));

    let address = manager.commit(&mut writer).unwrap().unwrap();
    assert_eq!(manager.tx_history().unwrap()[0].0, address);

    let mut reader = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut reader), 2);
}

/// # Scenario
/// Publishing the new key block of day 1's `sym` index fails.
///
/// # Expected behavior
/// Nothing of the transaction survives: the key-block pointer, row counts,
/// dictionary and tx log are as before, and a retry succeeds.
#[test]
fn failed_key_block_publish_leaves_previous_state() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    let (before, mut tx) = pending_tx(&manager, &[3, 4, 5]);

    partition_file(&manager, 1, "sym.k").fail_next_header_write();
    let err = manager.commit(&mut tx).unwrap_err();
    let ManagerError::CommitFailed(source) = err else {
        panic!("expected CommitFailed, got {err}");
    };
    assert!(matches!(
        *source,
        ManagerError::Partition(PartitionError::CommitFailed { .. })
    ));

    assert_eq!(committed(&manager), before);
    assert!(!dir.path().join("1970-01-02").exists());

    let ids = commit_rows(&manager, &[3]);
    assert_eq!(ids, vec![RowId::new(1, 2)]);
}

/// # Scenario
/// Day 1 commits early on the switch to day 2 and day 2 commits at the
/// end. The `sym` dictionary then publishes its dedup key block, and the
/// dictionary data header write fails.
///
/// # Expected behavior
/// The partition headers, the partition key block and the dedup key block
/// are all restored. After a reopen the journal still reads two rows and
/// two symbols.
#[test]
fn failed_symbol_commit_restores_partitions_and_dictionary() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    let (before, mut tx) = pending_tx(&manager, &[3, 4, 5, DAY]);

    let [(_, data), ..] = manager.symbols.tables()[0].files();
    data.fail_next_header_write();
    let err = manager.commit(&mut tx).unwrap_err();
    let ManagerError::CommitFailed(source) = err else {
        panic!("expected CommitFailed, got {err}");
    };
    assert!(matches!(*source, ManagerError::CommitFailed(_)));

    assert_eq!(committed(&manager), before);
    assert!(!dir.path().join("1970-01-02").exists());
    drop(manager);

    let manager = open(dir.path());
    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut tx), 2);
    assert_eq!(manager.symbol_values(&mut tx, "sym").unwrap(), ["S0", "S1"]);
}

/// # Scenario
/// Partitions and symbols commit, then syncing the tx record fails after
/// its frame reached the file.
///
/// # Expected behavior
/// Every header is restored and the created partition is removed. A
/// reopen ends the history at the previous record, so no directory it
/// names is missing and the new symbol is unknown.
#[test]
fn failed_tx_log_append_is_not_adopted_on_reopen() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());
    let (before, mut tx) = pending_tx(&manager, &[3, 4, 5, DAY]);
    let (last_address, _) = manager.tx_history().unwrap()[0].clone();

    manager.tx_log.fail_next_sync();
    let err = manager.commit(&mut tx).unwrap_err();
    let ManagerError::CommitFailed(source) = err else {
        panic!("expected CommitFailed, got {err}");
    };
    assert!(matches!(*source, ManagerError::TxLog(_)));

    assert_eq!(committed(&manager), before);
    assert!(!dir.path().join("1970-01-02").exists());
    drop(manager);

    let manager = open(dir.path());
    let history = manager.tx_history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].0, last_address);
    assert_eq!(history[0].1.last_partition_name, "1970-01-01");

    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut tx), 2);
    assert!(manager.symbol_rows(&mut tx, "sym", "S2").unwrap().is_empty());

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    manager.append(&mut tx, &row("S2", 2.0, 3)).unwrap();
    manager.commit(&mut tx).unwrap().unwrap();
    assert_eq!(manager.tx_history().unwrap().len(), 2);
}

#[test]
fn rollback_after_commit_keeps_created_partitions() {
    let dir = TempDir::new().unwrap();
    let manager = open(dir.path());

    let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
    append_all(&manager, &mut tx, &[1, DAY]);
    manager.commit(&mut tx).unwrap().unwrap();
    manager.rollback(&mut tx).unwrap();

    assert_eq!(manager.partition_count().unwrap(), 2);
    assert!(dir.path().join("1970-01-02").is_dir());
    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut tx), 2);
}
