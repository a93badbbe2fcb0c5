//! # Transaction state
//!
//! A [`TxContext`] carries everything one reader snapshot or one writer
//! transaction knows about the journal:
//!
//! - the [`TxRec`] it started from (the durable root at that instant),
//! - per-partition [`PartitionTxData`]: visible row count plus the running
//!   append offsets and key-block states of every file in the partition,
//! - the symbol store's [`SymbolTxData`],
//! - for writers, the current append partition, the partitions touched in
//!   touch order and the last appended timestamp.
//!
//! Append offsets live here rather than in the files: columns advance them
//! while a transaction is open, and only partition commit copies them into
//! the file headers. Readers never consult rows at or past the row count
//! captured in their context.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;

use crate::index::KeyBlockState;
use crate::partition::RollbackHandle;
use crate::txlog::TxRec;

// ------------------------------------------------------------------------------------------------
// RowId
// ------------------------------------------------------------------------------------------------

/// Global row identifier: partition id in the high bits, local row below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(u64);

impl RowId {
    /// Bits reserved for the in-partition row number.
    pub const LOCAL_BITS: u32 = 44;

    const LOCAL_MASK: u64 = (1u64 << Self::LOCAL_BITS) - 1;

    /// Packs a partition id and a local row; `local` is masked to
    /// [`LOCAL_BITS`](Self::LOCAL_BITS).
    pub fn new(partition_id: u32, local: u64) -> Self {
        Self(((partition_id as u64) << Self::LOCAL_BITS) | (local & Self::LOCAL_MASK))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Packed form, as stored in the tx record.
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn partition_id(self) -> u32 {
        (self.0 >> Self::LOCAL_BITS) as u32
    }

    /// Row number inside the partition, from 0.
    pub fn local(self) -> u64 {
        self.0 & Self::LOCAL_MASK
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.partition_id(), self.local())
    }
}

// ------------------------------------------------------------------------------------------------
// Per-file state
// ------------------------------------------------------------------------------------------------

/// Whether a transaction may append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    /// At most one per journal; owned by the writer.
    ReadWrite,
}

/// Running append offsets and key-block states for one file set.
///
/// Indexed by the file id / index id assigned when the owning storage
/// was built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTxState {
    /// Logical end of each file as this transaction sees it.
    pub append_offsets: Vec<u64>,
    /// Key block each hash index reads or writes.
    pub key_blocks: Vec<KeyBlockState>,
}

impl FileTxState {
    /// Zeroed state for `files` files and `indexes` indexes.
    pub fn new(files: usize, indexes: usize) -> Self {
        Self {
            append_offsets: vec![0; files],
            key_blocks: vec![KeyBlockState::default(); indexes],
        }
    }
}

/// Transaction view of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTxData {
    pub partition_id: u32,

    /// Rows visible to this transaction; for a writer, also the next local row.
    pub row_count: u64,

    /// Offsets and key blocks of the partition's files.
    pub files: FileTxState,

    /// Appended to since the last commit.
    pub dirty: bool,
}

impl PartitionTxData {
    pub fn new(partition_id: u32, row_count: u64, files: FileTxState) -> Self {
        Self {
            partition_id,
            row_count,
            files,
            dirty: false,
        }
    }
}

/// Transaction view of the global symbol store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTxData {
    /// Dictionary size per symbol table.
    pub key_counts: Vec<u64>,
    pub files: FileTxState,
    /// A new symbol was added since the last commit.
    pub dirty: bool,
}

// ------------------------------------------------------------------------------------------------
// Transaction context
// ------------------------------------------------------------------------------------------------

/// Snapshot or in-flight transaction.
#[derive(Debug)]
pub struct TxContext {
    pub(crate) mode: TxMode,

    /// Durable root this transaction started from.
    pub(crate) tx_rec: TxRec,

    /// Partitions attested by `tx_rec` (ids `1..=partition_count`).
    pub(crate) partition_count: u32,

    pub(crate) partitions: BTreeMap<u32, PartitionTxData>,
    pub(crate) symbols: Option<SymbolTxData>,

    /// Writer only: partition receiving appends.
    pub(crate) current: Option<u32>,

    /// Writer only: partitions in first-touch order.
    pub(crate) touched: Vec<u32>,

    /// Writer only: partitions created by this transaction.
    pub(crate) created: Vec<u32>,

    pub(crate) last_timestamp: Option<i64>,

    /// Writer only: undo logs of partitions committed early on a partition switch.
    pub(crate) rollbacks: Vec<RollbackHandle>,
}

impl TxContext {
    pub(crate) fn new(mode: TxMode, tx_rec: TxRec) -> Self {
        let last = RowId::from_raw(tx_rec.journal_max_row_id);
        let last_timestamp = (last.partition_id() > 0).then_some(tx_rec.last_partition_timestamp);
        Self {
            mode,
            partition_count: last.partition_id(),
            tx_rec,
            partitions: BTreeMap::new(),
            symbols: None,
            current: None,
            touched: Vec::new(),
            created: Vec::new(),
            last_timestamp,
            rollbacks: Vec::new(),
        }
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// Tx record this transaction started from.
    pub fn tx_rec(&self) -> &TxRec {
        &self.tx_rec
    }

    /// Partition ids visible to this transaction, ascending.
    pub fn partition_ids(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.partition_count
    }

    /// Number of partitions attested by [`tx_rec`](Self::tx_rec).
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Timestamp of the last record appended (or committed before this tx).
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub(crate) fn partition(&self, id: u32) -> Option<&PartitionTxData> {
        self.partitions.get(&id)
    }

    /// Row count of the last attested partition according to the tx record.
    pub(crate) fn attested_last_rows(&self) -> u64 {
        RowId::from_raw(self.tx_rec.journal_max_row_id).local()
    }

    /// Records that `id` was written to, keeping first-touch order.
    pub(crate) fn touch(&mut self, id: u32) {
        if !self.touched.contains(&id) {
            self.touched.push(id);
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.partitions.values().any(|p| p.dirty) || self.symbols.as_ref().is_some_and(|s| s.dirty)
    }
}
