//! HashIndex add / lookup, block chaining, copy-on-write and persistence.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::index::{HashIndex, IndexError, MIN_ROW_BLOCK_LEN};
use crate::storage::{CompositeFile, FileMode};
use crate::test_utils::init_tracing;
use crate::tx::FileTxState;

const BITS: u32 = 10;

fn files(dir: &Path, mode: FileMode) -> (Arc<CompositeFile>, Arc<CompositeFile>) {
    (
        Arc::new(CompositeFile::open(dir.join("i.k"), mode, BITS).unwrap()),
        Arc::new(CompositeFile::open(dir.join("i.r"), mode, BITS).unwrap()),
    )
}

fn open(dir: &Path, mode: FileMode, rbl: u64) -> (HashIndex, FileTxState) {
    init_tracing();
    let (k, r) = files(dir, mode);
    let index = HashIndex::open(k, 0, r, 1, 0, rbl).unwrap();
    let mut state = FileTxState::new(2, 1);
    index.begin(&mut state, None).unwrap();
    (index, state)
}

fn commit(index: &HashIndex, state: &mut FileTxState) {
    index.publish(state.key_blocks[0].offset).unwrap();
    index.key_file().set_append_offset(state.append_offsets[0]).unwrap();
    index.row_file().set_append_offset(state.append_offsets[1]).unwrap();
    state.key_blocks[0].copied = false;
}

#[test]
fn values_are_returned_newest_first() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);

    for v in [3, 9, 27] {
        index.add(5, v, &mut st).unwrap();
    }
    index.add(2, 100, &mut st).unwrap();

    let kb = st.key_blocks[0];
    assert_eq!(index.values(5, u64::MAX, &kb).unwrap(), vec![27, 9, 3]);
    assert_eq!(index.values(2, u64::MAX, &kb).unwrap(), vec![100]);
    assert_eq!(index.count(5, &kb).unwrap(), 3);
    assert_eq!(kb.max_value, 101);
}

#[test]
fn chain_spans_multiple_row_blocks() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);

    for v in 0..40u64 {
        index.add(0, v, &mut st).unwrap();
    }
    let got = index.values(0, u64::MAX, &st.key_blocks[0]).unwrap();
    let expected: Vec<u64> = (0..40u64).rev().collect();
    assert_eq!(got, expected);
}

#[test]
fn ceiling_hides_values_at_or_above_it() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
    for v in 0..20u64 {
        index.add(1, v, &mut st).unwrap();
    }
    let got = index.values(1, 10, &st.key_blocks[0]).unwrap();
    assert_eq!(got, (0..10u64).rev().collect::<Vec<_>>());
}

#[test]
fn unknown_key_beyond_block_is_empty() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
    assert!(index.values(1_000, u64::MAX, &st.key_blocks[0]).unwrap().is_empty());

    index.add(0, 1, &mut st).unwrap();
    assert!(index.values(1_000, u64::MAX, &st.key_blocks[0]).unwrap().is_empty());
    assert!(index.values(3, u64::MAX, &st.key_blocks[0]).unwrap().is_empty());
}

/// # Scenario
/// A committed key block must be immune to later, uncommitted growth.
///
/// # Actions
/// 1. Add values to key 1 and commit.
/// 2. Start a new transaction and add to key 1 and to a key far beyond
///    the current block size (forcing growth).
///
/// # Expected behavior
/// The committed block still reports the old values; the transaction's
/// private block sees everything.
#[test]
fn uncommitted_growth_leaves_committed_block_intact() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
    index.add(1, 10, &mut st).unwrap();
    index.add(1, 11, &mut st).unwrap();
    commit(&index, &mut st);
    let committed = index.load_key_block(index.committed_offset().unwrap()).unwrap();

    index.add(1, 12, &mut st).unwrap();
    index.add(500, 13, &mut st).unwrap();

    assert_ne!(st.key_blocks[0].offset, committed.offset);
    assert!(st.key_blocks[0].size > 501);
    assert_eq!(index.values(1, u64::MAX, &committed).unwrap(), vec![11, 10]);
    assert!(index.values(500, u64::MAX, &committed).unwrap().is_empty());
    assert_eq!(index.values(1, u64::MAX, &st.key_blocks[0]).unwrap(), vec![12, 11, 10]);
    assert_eq!(index.values(500, u64::MAX, &st.key_blocks[0]).unwrap(), vec![13]);
}

#[test]
fn committed_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let (index, mut st) = open(dir.path(), FileMode::ReadWrite, 32);
        for v in 0..50u64 {
            index.add(v % 3, v, &mut st).unwrap();
        }
        commit(&index, &mut st);
        index.key_file().flush().unwrap();
        index.row_file().flush().unwrap();
    }

    let (index, st) = open(dir.path(), FileMode::ReadOnly, MIN_ROW_BLOCK_LEN);
    assert_eq!(index.row_block_len(), 32);
    let kb = st.key_blocks[0];
    let key2: Vec<u64> = (0..50u64).filter(|v| v % 3 == 2).rev().collect();
    assert_eq!(index.values(2, u64::MAX, &kb).unwrap(), key2);
    assert_eq!(kb.max_value, 50);
}

#[test]
fn non_power_of_two_block_length_is_corruption() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    {
        let (index, _) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
        index.key_file().write_u64(0, 24).unwrap();
    }
    let (k, r) = files(dir.path(), FileMode::ReadWrite);
    assert!(matches!(
        HashIndex::open(k, 0, r, 1, 0, MIN_ROW_BLOCK_LEN),
        Err(IndexError::Corruption { .. })
    ));
}

#[test]
fn zero_key_block_offset_is_corruption() {
    let dir = TempDir::new().unwrap();
    let (index, _) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
    index.key_file().write_u64(8, 0).unwrap();
    assert!(matches!(index.committed_offset(), Err(IndexError::Corruption { .. })));
    let mut st = FileTxState::new(2, 1);
    assert!(index.begin(&mut st, None).is_err());
}

#[test]
fn absurd_value_count_is_corruption() {
    let dir = TempDir::new().unwrap();
    let (index, mut st) = open(dir.path(), FileMode::ReadWrite, MIN_ROW_BLOCK_LEN);
    for v in [3, 9, 27] {
        index.add(5, v, &mut st).unwrap();
    }
    let kb = st.key_blocks[0];
    let entry = kb.offset + crate::index::KEY_BLOCK_HEADER + 6 * crate::index::ENTRY_SIZE;
    index.key_file().write_u64(entry + 8, u64::MAX - 1).unwrap();

    assert!(matches!(
        index.values(5, 100, &kb),
        Err(IndexError::Corruption { .. })
    ));
}
