//! # Partitions
//!
//! A [`Partition`] is one time slice of the journal stored as a directory
//! of column files. Its lifecycle:
//!
//! ```text
//! Unopened ──first acquire──▶ StorageInitialized ──close──▶ Closed
//!                                     ▲                        │
//!                                     └──────next acquire──────┘
//!
//! any state ──mark_overwritten──▶ Overwritten   (never reused)
//! ```
//!
//! Storage (files, columns, indexes) is built lazily on the first
//! [`Partition::acquire`], exactly once even under concurrent first
//! touches. Every acquire returns a [`PartitionGuard`] that holds a
//! reference count; [`Partition::close`] is deferred while any guard is
//! alive and runs when the last one drops.
//!
//! All reads and writes go through the guard. Writes advance offsets in
//! the caller's [`PartitionTxData`]; [`PartitionGuard::commit`] is the only
//! place that persists them to file headers, and it hands back a
//! [`RollbackHandle`] covering every header it changed.

pub mod naming;
mod rollback;

#[cfg(test)]
mod tests;

pub use naming::{PartitionBounds, bounds_for, parse_partition_name, partition_name, versioned_name};
pub use rollback::RollbackHandle;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::column::{
    BitsetColumn, Column, ColumnError, FixedColumn, SymbolColumn, SymbolTable, VarColumn, bitset_row_width,
};
use crate::encoding::HeaderWidth;
use crate::index::{HashIndex, IndexError, row_block_len_for};
use crate::schema::{ColumnKind, JournalSchema, Row, SchemaError, Value};
use crate::storage::{CompositeFile, FileMode, FileSet, StorageError, bit_hint_for};
use crate::tx::{FileTxState, PartitionTxData, RowId, SymbolTxData};

/// File name of the null bitset inside a partition directory.
pub const NULLS_FILE: &str = "_nulls.d";

/// Errors returned by partition operations.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("column error: {0}")]
    Column(#[from] ColumnError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timestamp outside the range the calendar can represent.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),

    /// Column files of one partition disagree.
    #[error("partition {partition} is corrupt: {reason}")]
    Corruption { partition: String, reason: String },

    /// The partition was discarded and must not be used again.
    #[error("partition {0} was overwritten")]
    Overwritten(String),

    /// No more local row ids in this partition.
    #[error("partition {0} is full")]
    Full(String),

    /// A header write failed; every header already written was restored.
    #[error("commit of partition {partition} failed: {source}")]
    CommitFailed {
        partition: String,
        source: Box<PartitionError>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle state of a [`Partition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    /// Known by name; no files mapped yet.
    Unopened,
    /// Column files mapped and usable.
    StorageInitialized,
    /// Mappings released; the next access reopens them.
    Closed,
    /// Discarded by a rollback or reconciliation; terminal.
    Overwritten,
}

/// Settings shared by every partition of a journal.
#[derive(Debug)]
pub struct PartitionConfig {
    pub schema: JournalSchema,
    pub mode: FileMode,
    /// Expected rows per partition.
    pub record_count_hint: u64,
    /// Overrides the computed chunk size of every file.
    pub chunk_bit_hint: Option<u32>,
    /// Symbol tables, one per symbol column in schema order.
    pub symbols: Vec<Arc<SymbolTable>>,
}

impl PartitionConfig {
    /// Chunk bit hint for a file of `count` records of `record_size` bytes.
    pub fn bit_hint(&self, record_size: u64, count: u64) -> u32 {
        self.chunk_bit_hint
            .unwrap_or_else(|| bit_hint_for(record_size, count))
    }
}

/// Rejects rows the columns would refuse, before anything is written.
pub fn validate_row(schema: &JournalSchema, row: &[Value]) -> Result<(), PartitionError> {
    if row.len() != schema.len() {
        return Err(SchemaError::Invalid(format!(
            "row has {} values, schema has {} columns",
            row.len(),
            schema.len()
        ))
        .into());
    }
    for (def, value) in schema.columns().iter().zip(row) {
        if value.is_null() {
            if def.kind.is_fixed() && !def.nullable {
                return Err(ColumnError::NullNotAllowed(def.name.clone()).into());
            }
            continue;
        }
        if !value.fits(def.kind) {
            return Err(ColumnError::TypeMismatch {
                column: def.name.clone(),
                expected: def.kind.name(),
                found: value.type_name(),
            }
            .into());
        }
        let len = match value {
            Value::Str(s) => s.encode_utf16().count() * 2,
            Value::Binary(b) => b.len(),
            _ => continue,
        };
        let max = HeaderWidth::for_max_size(def.max_payload_bytes()).max_len();
        if len > max {
            return Err(ColumnError::ValueTooLong {
                column: def.name.clone(),
                len,
                max,
            }
            .into());
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Storage
// ------------------------------------------------------------------------------------------------

/// How a file's committed append offset is derived at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileRole {
    /// `row_count * width`.
    Fixed(u64),
    /// The transaction's running offset.
    Running,
}

/// Inverted index bookkeeping, in key-block slot order.
#[derive(Debug, Clone, Copy)]
struct IndexSlot {
    column: usize,
    table_id: usize,
}

/// Open files and columns of one partition.
#[derive(Debug)]
pub struct PartitionStorage {
    files: FileSet,
    roles: Vec<FileRole>,
    columns: Vec<Column>,
    nulls: Option<BitsetColumn>,
    indexes: Vec<IndexSlot>,
    timestamp: usize,
    symbol_count: usize,
}

struct FileOpener<'a> {
    dir: &'a Path,
    config: &'a PartitionConfig,
    files: FileSet,
    roles: Vec<FileRole>,
}

impl FileOpener<'_> {
    fn open(
        &mut self,
        file_name: &str,
        (record_size, count): (u64, u64),
        role: FileRole,
    ) -> Result<(Arc<CompositeFile>, usize), PartitionError> {
        let hint = self.config.bit_hint(record_size, count);
        let opened = self.files.open(self.dir.join(file_name), self.config.mode, hint)?;
        self.roles.push(role);
        Ok(opened)
    }
}

impl PartitionStorage {
    fn open(dir: &Path, config: &PartitionConfig) -> Result<Self, PartitionError> {
        let schema = &config.schema;
        let count = config.record_count_hint;
        let symbol_columns = schema.symbol_columns();

        let mut opener = FileOpener {
            dir,
            config,
            files: FileSet::new(),
            roles: Vec::new(),
        };
        let mut columns = Vec::with_capacity(schema.len());
        let mut indexes = Vec::new();

        for (i, def) in schema.columns().iter().enumerate() {
            let column = match def.kind {
                ColumnKind::String | ColumnKind::Binary => {
                    let header = HeaderWidth::for_max_size(def.max_payload_bytes());
                    let avg = match def.kind {
                        ColumnKind::String => def.avg_size * 2,
                        _ => def.avg_size,
                    } + header.bytes();
                    let data = opener.open(&format!("{}.d", def.name), (avg as u64, count), FileRole::Running)?;
                    let index = opener.open(&format!("{}.i", def.name), (8, count), FileRole::Fixed(8))?;
                    Column::Var(VarColumn::new(&def.name, def.kind, header, data, index)?)
                }
                ColumnKind::Symbol => {
                    let table_id = symbol_columns
                        .iter()
                        .position(|&c| c == i)
                        .ok_or_else(|| PartitionError::Internal(format!("'{}' is not a symbol column", def.name)))?;
                    let table = config.symbols.get(table_id).cloned().ok_or_else(|| {
                        PartitionError::Internal(format!("no symbol table for column '{}'", def.name))
                    })?;
                    let keys = opener.open(&format!("{}.d", def.name), (4, count), FileRole::Fixed(4))?;
                    let index = if def.indexed {
                        let distinct = def.distinct_count_hint as u64;
                        let (k, kid) =
                            opener.open(&format!("{}.k", def.name), (16, distinct), FileRole::Running)?;
                        let (r, rid) = opener.open(&format!("{}.r", def.name), (8, count), FileRole::Running)?;
                        let slot = indexes.len();
                        indexes.push(IndexSlot { column: i, table_id });
                        Some(HashIndex::open(k, kid, r, rid, slot, row_block_len_for(count, distinct))?)
                    } else {
                        None
                    };
                    Column::Symbol(SymbolColumn::new(&def.name, table, keys, index))
                }
                kind => {
                    let width = kind.fixed_width().ok_or_else(|| {
                        PartitionError::Internal(format!("column '{}' has no fixed width", def.name))
                    })? as u64;
                    let (file, id) = opener.open(&format!("{}.d", def.name), (width, count), FileRole::Fixed(width))?;
                    Column::Fixed(FixedColumn::new(&def.name, kind, file, id)?)
                }
            };
            columns.push(column);
        }

        let bits = schema.nullable_columns().len();
        let nulls = if bits > 0 {
            let width = bitset_row_width(bits);
            let (file, id) = opener.open(NULLS_FILE, (width, count), FileRole::Fixed(width))?;
            Some(BitsetColumn::new(bits, file, id))
        } else {
            None
        };

        Ok(Self {
            files: opener.files,
            roles: opener.roles,
            columns,
            nulls,
            indexes,
            timestamp: schema.timestamp_index(),
            symbol_count: symbol_columns.len(),
        })
    }

    /// Every file of the partition; ids index [`FileTxState::append_offsets`].
    pub fn files(&self) -> &FileSet {
        &self.files
    }

    /// Number of indexed columns, which is also the key-block slot count.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    fn index(&self, slot: &IndexSlot) -> Result<&HashIndex, PartitionError> {
        match self.columns.get(slot.column) {
            Some(Column::Symbol(c)) => c
                .index()
                .ok_or_else(|| PartitionError::Internal(format!("column '{}' lost its index", c.name()))),
            _ => Err(PartitionError::Internal(format!("index slot points at column {}", slot.column))),
        }
    }

    fn timestamp_column(&self) -> Result<&FixedColumn, PartitionError> {
        match self.columns.get(self.timestamp) {
            Some(Column::Fixed(c)) => Ok(c),
            _ => Err(PartitionError::Internal("timestamp column is not fixed-width".into())),
        }
    }

    /// Row count implied by the fixed-width file headers; they must agree.
    fn rows_on_disk(&self, partition: &str) -> Result<u64, PartitionError> {
        let mut rows: Option<(u64, &Path)> = None;
        for (id, file) in self.files.iter() {
            let FileRole::Fixed(width) = self.roles[id] else {
                continue;
            };
            let offset = file.append_offset()?;
            if offset % width != 0 {
                return Err(PartitionError::Corruption {
                    partition: partition.to_string(),
                    reason: format!(
                        "{}: append offset {offset} is not a multiple of {width}",
                        file.path().display()
                    ),
                });
            }
            let here = offset / width;
            match rows {
                None => rows = Some((here, file.path())),
                Some((seen, other)) if seen != here => {
                    return Err(PartitionError::Corruption {
                        partition: partition.to_string(),
                        reason: format!(
                            "{} holds {seen} rows but {} holds {here}",
                            other.display(),
                            file.path().display()
                        ),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(rows.map_or(0, |(r, _)| r))
    }

    /// Writes every changed header, recording each in `handle`.
    fn write_headers(&self, tx: &PartitionTxData, handle: &mut RollbackHandle) -> Result<(), PartitionError> {
        for (slot, meta) in self.indexes.iter().enumerate() {
            let index = self.index(meta)?;
            let Some(kb) = tx.files.key_blocks.get(slot) else {
                continue;
            };
            if kb.offset == 0 {
                continue;
            }
            if index.committed_offset()? != kb.offset {
                let previous = index.publish(kb.offset)?;
                handle.record_key_block(index.key_file(), previous);
            }
        }

        for (id, file) in self.files.iter() {
            let target = match self.roles[id] {
                FileRole::Fixed(width) => tx.row_count * width,
                FileRole::Running => tx.files.append_offsets.get(id).copied().unwrap_or(0),
            };
            let previous = file.append_offset()?;
            if previous != target {
                file.set_append_offset(target)?;
                handle.record_append_offset(file, previous);
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Partition
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct Slot {
    state: PartitionState,
    storage: Option<Arc<PartitionStorage>>,
}

/// One partition directory.
#[derive(Debug)]
pub struct Partition {
    id: u32,
    name: String,
    dir: PathBuf,
    bounds: PartitionBounds,
    config: Arc<PartitionConfig>,
    slot: RwLock<Slot>,
    refs: AtomicUsize,
    close_pending: AtomicBool,
    last_access: Mutex<Instant>,
}

impl Partition {
    /// Describes a partition without touching disk.
    pub fn new(id: u32, name: String, dir: PathBuf, bounds: PartitionBounds, config: Arc<PartitionConfig>) -> Self {
        Self {
            id,
            name,
            dir,
            bounds,
            config,
            slot: RwLock::new(Slot {
                state: PartitionState::Unopened,
                storage: None,
            }),
            refs: AtomicUsize::new(0),
            close_pending: AtomicBool::new(false),
            last_access: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the column files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bounds(&self) -> PartitionBounds {
        self.bounds
    }

    /// True when `timestamp` falls in this partition's interval.
    pub fn contains(&self, timestamp: i64) -> bool {
        self.bounds.contains(timestamp)
    }

    /// Current lifecycle state; a poisoned lock reads as overwritten.
    pub fn state(&self) -> PartitionState {
        self.slot
            .read()
            .map(|s| s.state)
            .unwrap_or(PartitionState::Overwritten)
    }

    /// Live guards.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Time since the last acquire.
    pub fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Pins the partition and initialises its storage if needed.
    pub fn acquire(&self) -> Result<PartitionGuard<'_>, PartitionError> {
        self.refs.fetch_add(1, Ordering::SeqCst);
        match self.storage() {
            Ok(storage) => {
                if let Ok(mut t) = self.last_access.lock() {
                    *t = Instant::now();
                }
                Ok(PartitionGuard {
                    partition: self,
                    storage,
                })
            }
            Err(e) => {
                self.release_ref();
                Err(e)
            }
        }
    }

    fn storage(&self) -> Result<Arc<PartitionStorage>, PartitionError> {
        {
            let slot = self.read_slot()?;
            if slot.state == PartitionState::Overwritten {
                return Err(PartitionError::Overwritten(self.name.clone()));
            }
            if let Some(storage) = &slot.storage {
                return Ok(Arc::clone(storage));
            }
        }

        let mut slot = self.write_slot()?;
        if slot.state == PartitionState::Overwritten {
            return Err(PartitionError::Overwritten(self.name.clone()));
        }
        if let Some(storage) = &slot.storage {
            return Ok(Arc::clone(storage));
        }
        let storage = Arc::new(PartitionStorage::open(&self.dir, &self.config)?);
        slot.storage = Some(Arc::clone(&storage));
        slot.state = PartitionState::StorageInitialized;
        debug!(partition = %self.name, id = self.id, files = storage.files.len(), "partition storage initialised");
        Ok(storage)
    }

    /// Closes the partition's files, or defers until the last guard drops.
    ///
    /// Returns `true` if the files were closed by this call.
    pub fn close(&self) -> Result<bool, PartitionError> {
        if self.refs() > 0 {
            self.close_pending.store(true, Ordering::SeqCst);
            trace!(partition = %self.name, refs = self.refs(), "close deferred");
            return Ok(false);
        }

        let mut slot = self.write_slot()?;
        if self.refs() > 0 {
            self.close_pending.store(true, Ordering::SeqCst);
            return Ok(false);
        }
        self.close_pending.store(false, Ordering::SeqCst);
        let Some(storage) = slot.storage.take() else {
            return Ok(false);
        };
        if self.config.mode == FileMode::ReadWrite {
            storage.files.flush_all()?;
        }
        storage.files.release_all()?;
        if slot.state != PartitionState::Overwritten {
            slot.state = PartitionState::Closed;
        }
        debug!(partition = %self.name, id = self.id, "partition closed");
        Ok(true)
    }

    /// Retires the partition for good; its files are dropped unflushed.
    pub fn mark_overwritten(&self) -> Result<(), PartitionError> {
        let mut slot = self.write_slot()?;
        if let Some(storage) = slot.storage.take() {
            storage.files.release_all()?;
        }
        slot.state = PartitionState::Overwritten;
        debug!(partition = %self.name, id = self.id, "partition overwritten");
        Ok(())
    }

    fn release_ref(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.close_pending.load(Ordering::SeqCst) {
            if let Err(e) = self.close() {
                warn!(partition = %self.name, error = %e, "deferred close failed");
            }
        }
    }

    fn read_slot(&self) -> Result<std::sync::RwLockReadGuard<'_, Slot>, PartitionError> {
        self.slot
            .read()
            .map_err(|_| PartitionError::Internal("partition lock poisoned".into()))
    }

    fn write_slot(&self) -> Result<std::sync::RwLockWriteGuard<'_, Slot>, PartitionError> {
        self.slot
            .write()
            .map_err(|_| PartitionError::Internal("partition lock poisoned".into()))
    }
}

// ------------------------------------------------------------------------------------------------
// Guard
// ------------------------------------------------------------------------------------------------

/// A pinned, storage-initialised partition.
#[derive(Debug)]
pub struct PartitionGuard<'a> {
    partition: &'a Partition,
    storage: Arc<PartitionStorage>,
}

impl Drop for PartitionGuard<'_> {
    fn drop(&mut self) {
        self.partition.release_ref();
    }
}

impl PartitionGuard<'_> {
    pub fn partition(&self) -> &Partition {
        self.partition
    }

    /// Mapped files, valid for the life of the guard.
    pub fn storage(&self) -> &PartitionStorage {
        &self.storage
    }

    /// Builds the transaction view of this partition.
    ///
    /// `row_count` and `pointers` come from the tx record when it attests
    /// them; otherwise the row count is derived from the file headers.
    /// `pointers` holds one inverted-index key-block offset per symbol
    /// column, `0` where there is none.
    pub fn read_tx_data(&self, row_count: Option<u64>, pointers: Option<&[u64]>) -> Result<PartitionTxData, PartitionError> {
        let storage = &self.storage;
        let rows = match row_count {
            Some(rows) => rows,
            None => storage.rows_on_disk(&self.partition.name)?,
        };

        let mut files = FileTxState::new(storage.files.len(), storage.indexes.len());
        for (id, file) in storage.files.iter() {
            files.append_offsets[id] = match storage.roles[id] {
                FileRole::Fixed(width) => rows * width,
                FileRole::Running => file.append_offset()?,
            };
        }
        for meta in &storage.indexes {
            let pointer = pointers
                .and_then(|p| p.get(meta.table_id).copied())
                .filter(|p| *p != 0);
            storage.index(meta)?.begin(&mut files, pointer)?;
        }

        Ok(PartitionTxData::new(self.partition.id, rows, files))
    }

    /// Committed inverted-index key-block offsets of `tx`, one per symbol column.
    pub fn index_pointers(&self, tx: &PartitionTxData) -> Vec<u64> {
        let mut out = vec![0; self.storage.symbol_count];
        for (slot, meta) in self.storage.indexes.iter().enumerate() {
            if let Some(kb) = tx.files.key_blocks.get(slot) {
                out[meta.table_id] = kb.offset;
            }
        }
        out
    }

    /// Writes `row` as the next local row; the row must already be validated.
    pub fn append(
        &self,
        row: &[Value],
        tx: &mut PartitionTxData,
        symbols: &mut SymbolTxData,
    ) -> Result<RowId, PartitionError> {
        let storage = &self.storage;
        let local = tx.row_count;
        if local >= 1u64 << RowId::LOCAL_BITS {
            return Err(PartitionError::Full(self.partition.name.clone()));
        }

        for (column, value) in storage.columns.iter().zip(row) {
            column.set(local, value, &mut tx.files, symbols)?;
        }
        if let Some(nulls) = &storage.nulls {
            let schema = &self.partition.config.schema;
            let flags: Vec<bool> = schema
                .nullable_columns()
                .iter()
                .map(|&c| row.get(c).is_none_or(Value::is_null))
                .collect();
            nulls.set(local, &flags, &mut tx.files)?;
        }

        tx.row_count = local + 1;
        tx.dirty = true;
        Ok(RowId::new(self.partition.id, local))
    }

    /// Persists `tx`'s row count, running offsets and key blocks.
    ///
    /// On failure every header already written is restored before the
    /// error is returned.
    pub fn commit(&self, tx: &PartitionTxData) -> Result<RollbackHandle, PartitionError> {
        let mut handle = RollbackHandle::new(self.partition.name.clone());
        match self.storage.write_headers(tx, &mut handle) {
            Ok(()) => {
                debug!(
                    partition = %self.partition.name,
                    rows = tx.row_count,
                    headers = handle.len(),
                    "partition committed"
                );
                Ok(handle)
            }
            Err(source) => {
                warn!(partition = %self.partition.name, error = %source, "partition commit failed, rolling back");
                handle.rollback();
                Err(PartitionError::CommitFailed {
                    partition: self.partition.name.clone(),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Column at schema position `column`.
    ///
    /// # Errors
    ///
    /// [`SchemaError::UnknownColumn`] for a position past the last column.
    pub fn column(&self, column: usize) -> Result<&Column, PartitionError> {
        self.storage
            .columns
            .get(column)
            .ok_or_else(|| SchemaError::UnknownColumn(format!("#{column}")).into())
    }

    /// Value of `column` at local `row`, honouring the null bitset.
    pub fn get_value(&self, row: u64, column: usize) -> Result<Value, PartitionError> {
        let col = self.column(column)?;
        if let (Some(nulls), Some(bit)) = (&self.storage.nulls, self.partition.config.schema.null_bit(column)) {
            if nulls.is_set(row, bit)? {
                return Ok(Value::Null);
            }
        }
        Ok(col.get(row)?)
    }

    /// Every column of local `row`, in schema order.
    pub fn read_row(&self, row: u64) -> Result<Row, PartitionError> {
        (0..self.storage.columns.len())
            .map(|c| self.get_value(row, c))
            .collect()
    }

    /// Designated timestamp of local `row`.
    pub fn timestamp_at(&self, row: u64) -> Result<i64, PartitionError> {
        Ok(self.storage.timestamp_column()?.get_i64(row)?)
    }

    /// Binary search over the first `row_count` timestamps.
    ///
    /// Returns the row holding `value`, or `!insertion_point` if absent.
    pub fn binary_search_timestamp(&self, value: i64, row_count: u64) -> Result<i64, PartitionError> {
        let ts = self.storage.timestamp_column()?;
        let (mut lo, mut hi) = (0u64, row_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let here = ts.get_i64(mid)?;
            match here.cmp(&value) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(mid as i64),
            }
        }
        Ok(!(lo as i64))
    }

    /// First row whose timestamp is `>= value`, or `row_count`.
    pub fn lower_bound(&self, value: i64, row_count: u64) -> Result<u64, PartitionError> {
        let ts = self.storage.timestamp_column()?;
        let (mut lo, mut hi) = (0u64, row_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if ts.get_i64(mid)? < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Local rows whose symbol `column` equals `value`, newest first.
    pub fn symbol_rows(
        &self,
        column: usize,
        value: &str,
        tx: &PartitionTxData,
        symbols: &SymbolTxData,
    ) -> Result<Vec<u64>, PartitionError> {
        match self.column(column)? {
            Column::Symbol(c) => Ok(c.rows(value, tx.row_count, &tx.files, symbols)?),
            other => Err(ColumnError::TypeMismatch {
                column: other.name().to_string(),
                expected: ColumnKind::Symbol.name(),
                found: self
                    .partition
                    .config
                    .schema
                    .column(column)
                    .map(|d| d.kind.name())
                    .unwrap_or("unknown"),
            }
            .into()),
        }
    }
}
