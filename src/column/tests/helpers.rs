use std::path::Path;
use std::sync::Arc;

use crate::column::SymbolTable;
use crate::encoding::HeaderWidth;
use crate::index::{HashIndex, MIN_ROW_BLOCK_LEN};
use crate::storage::{CompositeFile, FileMode, FileSet};
use crate::test_utils::init_tracing;
use crate::tx::{FileTxState, SymbolTxData};

pub const BITS: u32 = 8;

pub fn rw(set: &mut FileSet, dir: &Path, name: &str) -> (Arc<CompositeFile>, usize) {
    init_tracing();
    set.open(dir.join(name), FileMode::ReadWrite, BITS).unwrap()
}

/// A symbol table with its own file set, seeded as an empty transaction.
pub fn symbol_table(dir: &Path, name: &str, capacity: u64) -> (Arc<SymbolTable>, SymbolTxData) {
    let mut set = FileSet::new();
    let data = rw(&mut set, dir, &format!("{name}.symd"));
    let offsets = rw(&mut set, dir, &format!("{name}.symi"));
    let (k, kid) = rw(&mut set, dir, &format!("{name}.symr.k"));
    let (r, rid) = rw(&mut set, dir, &format!("{name}.symr.r"));
    let dedup = HashIndex::open(k, kid, r, rid, 0, MIN_ROW_BLOCK_LEN).unwrap();
    let table = Arc::new(SymbolTable::new(
        name,
        0,
        capacity,
        HeaderWidth::for_max_size(512),
        data,
        offsets,
        dedup,
    ));

    let mut tx = SymbolTxData {
        key_counts: vec![0],
        files: FileTxState::new(set.len(), 1),
        dirty: false,
    };
    table.begin(&mut tx, 0, None).unwrap();
    (table, tx)
}
