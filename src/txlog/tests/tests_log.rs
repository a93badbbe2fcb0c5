//! Append / latest / history behaviour of the tx log.

use tempfile::TempDir;

use crate::test_utils::init_tracing;
use crate::txlog::{HEADER_SIZE, TxLog, TxLogError, TxRec};

fn rec(n: u64) -> TxRec {
    TxRec {
        commit_timestamp: 1_700_000_000_000 + n as i64,
        journal_max_row_id: n,
        last_partition_timestamp: n as i64 * 10,
        last_partition_name: format!("2024-01-{:02}", n % 28 + 1),
        symbol_key_counts: vec![n, n * 2],
        symbol_index_pointers: vec![16, 16 + n],
        index_pointers: vec![0, 16],
        ..TxRec::default()
    }
}

#[test]
fn empty_log_has_no_latest() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log = TxLog::open(dir.path().join("_tx"), true).unwrap();
    assert!(log.latest().unwrap().is_none());
    assert!(log.history().unwrap().is_empty());
}

#[test]
fn append_links_previous_record() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log = TxLog::open(dir.path().join("_tx"), true).unwrap();

    let mut a = rec(1);
    let addr_a = log.append(&mut a).unwrap();
    assert_eq!(addr_a, HEADER_SIZE);
    assert_eq!(a.prev_tx_address, 0);

    let mut b = rec(2);
    let addr_b = log.append(&mut b).unwrap();
    assert_eq!(b.prev_tx_address, addr_a);

    let (addr, latest) = log.latest().unwrap().unwrap();
    assert_eq!(addr, addr_b);
    assert_eq!(latest, b);
    assert_eq!(log.read_at(addr_a).unwrap(), a);
}

#[test]
fn history_walks_back_newest_first() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let log = TxLog::open(dir.path().join("_tx"), true).unwrap();
    for n in 1..=5 {
        log.append(&mut rec(n)).unwrap();
    }

    let history = log.history().unwrap();
    let ids: Vec<u64> = history.iter().map(|(_, r)| r.journal_max_row_id).collect();
    assert_eq!(ids, vec![5, 4, 3, 2, 1]);
}

#[test]
fn reader_sees_records_appended_after_open() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("_tx");
    let writer = TxLog::open(&path, true).unwrap();
    writer.append(&mut rec(1)).unwrap();

    let reader = TxLog::open(&path, false).unwrap();
    assert_eq!(reader.latest().unwrap().unwrap().1.journal_max_row_id, 1);

    writer.append(&mut rec(2)).unwrap();
    assert_eq!(reader.latest().unwrap().unwrap().1.journal_max_row_id, 2);
}

#[test]
fn read_only_rejects_append_and_missing_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("_tx");
    assert!(TxLog::open(&path, false).is_err());

    TxLog::open(&path, true).unwrap();
    let ro = TxLog::open(&path, false).unwrap();
    assert!(matches!(ro.append(&mut rec(1)), Err(TxLogError::ReadOnly)));
}

#[test]
fn records_survive_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("_tx");
    {
        let log = TxLog::open(&path, true).unwrap();
        log.append(&mut rec(1)).unwrap();
        log.append(&mut rec(2)).unwrap();
    }
    let log = TxLog::open(&path, true).unwrap();
    assert_eq!(log.history().unwrap().len(), 2);
    log.append(&mut rec(3)).unwrap();
    assert_eq!(log.latest().unwrap().unwrap().1.journal_max_row_id, 3);
}
