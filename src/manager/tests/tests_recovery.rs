//! Reopen, crash reconciliation and read-only opens.

use std::fs;

use tempfile::TempDir;

use super::helpers::{DAY, append_all, commit_rows, open, open_read_only, row, total_rows};
use crate::manager::ManagerError;
use crate::tx::{RowId, TxMode};

#[test]
fn committed_rows_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let manager = open(dir.path());
        commit_rows(&manager, &[1, 2, DAY]);
        manager.close_all().unwrap();
    }

    let manager = open(dir.path());
    assert_eq!(manager.partition_count().unwrap(), 2);
    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&manager, &mut tx), 3);
    assert_eq!(manager.read_row(&mut tx, RowId::new(2, 0)).unwrap(), row("S2", 2.0, DAY));
    assert_eq!(manager.symbol_values(&mut tx, "sym").unwrap(), ["S0", "S1", "S2"]);

    let ids = commit_rows(&manager, &[DAY + 1]);
    assert_eq!(ids, vec![RowId::new(2, 1)]);
}

/// # Scenario
/// A writer extends day 1, moves on to day 2 (committing day 1's headers
/// early) and crashes before writing the tx record.
///
/// # Expected behavior
/// Reopening as writer deletes the day 2 directory and restores day 1's
/// headers to the committed row count.
#[test]
fn writer_open_discards_uncommitted_work() {
    let dir = TempDir::new().unwrap();
    {
        let manager = open(dir.path());
        commit_rows(&manager, &[1, 2]);
        let mut tx = manager.begin(TxMode::ReadWrite).unwrap();
        append_all(&manager, &mut tx, &[3, 4, DAY]);
        assert!(dir.path().join("1970-01-02").is_dir());
        // Crash: neither commit nor rollback.
    }
    fs::create_dir(dir.path().join("1970-01-09")).unwrap();
    fs::create_dir(dir.path().join("not-a-partition")).unwrap();

    let manager = open(dir.path());
    assert!(!dir.path().join("1970-01-02").exists());
    assert!(!dir.path().join("1970-01-09").exists());
    assert!(dir.path().join("not-a-partition").exists());
    assert_eq!(manager.partition_count().unwrap(), 1);

    let on_disk = manager.partition(1).unwrap().acquire().unwrap().read_tx_data(None, None).unwrap();
    assert_eq!(on_disk.row_count, 2);

    let ids = commit_rows(&manager, &[3]);
    assert_eq!(ids, vec![RowId::new(1, 2)]);
}

#[test]
fn missing_last_partition_is_corruption() {
    let dir = TempDir::new().unwrap();
    {
        let manager = open(dir.path());
        commit_rows(&manager, &[1, DAY]);
        manager.close_all().unwrap();
    }
    fs::remove_dir_all(dir.path().join("1970-01-02")).unwrap();

    let err = crate::manager::PartitionManager::open(dir.path(), super::helpers::options(true)).unwrap_err();
    assert!(matches!(err, ManagerError::Corruption(_)), "{err}");
}

#[test]
fn highest_version_of_an_earlier_partition_wins() {
    let dir = TempDir::new().unwrap();
    {
        let manager = open(dir.path());
        commit_rows(&manager, &[1, DAY]);
        manager.close_all().unwrap();
    }
    fs::rename(dir.path().join("1970-01-01"), dir.path().join("1970-01-01~1")).unwrap();
    fs::create_dir(dir.path().join("1970-01-01")).unwrap();

    let manager = open_read_only(dir.path());
    let names: Vec<String> = manager.partitions().unwrap().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, ["1970-01-01~1", "1970-01-02"]);
    let mut tx = manager.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(manager.read_row(&mut tx, RowId::new(1, 0)).unwrap(), row("S0", 0.0, 1));
}

#[test]
fn read_only_open_never_writes() {
    let dir = TempDir::new().unwrap();
    let writer = open(dir.path());
    commit_rows(&writer, &[1, 2]);

    let reader = open_read_only(dir.path());
    assert!(!reader.is_writable());
    assert!(matches!(reader.begin(TxMode::ReadWrite), Err(ManagerError::ReadOnly)));

    let mut tx = reader.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&reader, &mut tx), 2);

    // The root is read once per read-only open.
    commit_rows(&writer, &[3]);
    let mut tx = reader.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&reader, &mut tx), 2);

    let reopened = open_read_only(dir.path());
    let mut tx = reopened.begin(TxMode::ReadOnly).unwrap();
    assert_eq!(total_rows(&reopened, &mut tx), 3);
}

#[test]
fn read_only_open_of_missing_journal_fails() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    assert!(crate::manager::PartitionManager::open(&missing, super::helpers::options(false)).is_err());
}
