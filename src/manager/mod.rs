//! # Partition manager
//!
//! Owns the tx log, the symbol store and the ordered partition list of one
//! journal directory:
//!
//! ```text
//! <root>/
//!   _tx.log                        commit records
//!   <sym>.symd .symi .symr.k .symr.r   symbol store ("partition 0")
//!   2024-01-01/  2024-01-02/ ...   partitions 1, 2, ...
//! ```
//!
//! The latest tx record is the durable root. At open and on every new
//! transaction the partition list is extended with the directories the
//! record attests, in start order; anything past that is a crashed,
//! half-written partition. A writer deletes such directories at open and
//! restores the last partition's headers to what the record says.
//!
//! A writer transaction appends in non-decreasing timestamp order. Moving
//! to a new partition commits the previous one's headers first; the undo
//! log of that early commit is kept in the transaction so a later failure
//! or rollback can still restore it. [`PartitionManager::commit`] writes the
//! remaining headers, then the tx record; until the record is appended the
//! previous record stays the durable truth.

pub mod symbols;

#[cfg(test)]
mod tests;

pub use symbols::SymbolStore;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::column::ColumnError;
use crate::index::IndexError;
use crate::partition::{
    Partition, PartitionBounds, PartitionConfig, PartitionError, PartitionState, RollbackHandle, bounds_for,
    parse_partition_name, partition_name, validate_row, versioned_name,
};
use crate::schema::{ColumnKind, JournalSchema, PartitionBy, Row, SchemaError, Value};
use crate::storage::{FileMode, StorageError};
use crate::tx::{PartitionTxData, RowId, TxContext, TxMode};
use crate::txlog::{TxLog, TxLogError, TxRec};

/// Tx log file name inside the journal root.
pub const TX_LOG_FILE: &str = "_tx.log";

/// Errors returned by the partition manager.
///
/// Lower-layer errors are wrapped unchanged; a failed commit wraps its
/// cause in [`ManagerError::CommitFailed`].
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    #[error("column error: {0}")]
    Column(#[from] ColumnError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("tx log error: {0}")]
    TxLog(#[from] TxLogError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timestamp below the last appended one. Nothing was written.
    #[error("out-of-order append: timestamp {timestamp} < last {last}")]
    OutOfOrder { timestamp: i64, last: i64 },

    /// Directories and tx log disagree.
    #[error("journal corruption: {0}")]
    Corruption(String),

    /// Mutation through a read-only journal or transaction.
    #[error("journal is read-only")]
    ReadOnly,

    /// Row id outside the transaction's visible rows.
    #[error("row {0} not found")]
    RowNotFound(RowId),

    /// The commit was rolled back; the previous tx record stays current.
    #[error("commit failed: {0}")]
    CommitFailed(Box<ManagerError>),

    #[error("internal error: {0}")]
    Internal(String),
}

/// What the manager needs from the journal configuration.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub schema: JournalSchema,
    pub partition_by: PartitionBy,
    /// Opens the tx log for appends and reconciles directories on open.
    pub writable: bool,
    /// Expected rows per partition; sizes chunks and row blocks.
    pub record_count_hint: u64,
    /// Overrides the computed chunk size for every file.
    pub chunk_bit_hint: Option<u32>,
    /// Releases the mappings of every partition but the last after a commit.
    pub close_full_partitions_on_commit: bool,
}

/// Owns the partitions, symbol tables and tx log of one journal root.
///
/// Readers and the writer share a manager; each works through its own
/// [`TxContext`]. Only the writer mutates files, and only
/// [`PartitionManager::commit`] makes that visible.
#[derive(Debug)]
pub struct PartitionManager {
    root: PathBuf,
    partition_by: PartitionBy,
    writable: bool,
    close_full_partitions_on_commit: bool,
    config: Arc<PartitionConfig>,
    tx_log: TxLog,
    symbols: SymbolStore,
    /// Partition `id` sits at index `id - 1`.
    partitions: RwLock<Vec<Arc<Partition>>>,
    /// Read-only journals: the root never changes under us.
    cached_root: Mutex<Option<TxRec>>,
}

/// A partition directory found on disk.
#[derive(Debug, Clone)]
struct DirEntry {
    name: String,
    start: i64,
    end: Option<i64>,
    version: u32,
}

impl PartitionManager {
    /// Opens the journal at `root`, creating it when writable.
    ///
    /// A writer removes partition directories newer than the last commit
    /// and rolls symbol files back to the committed counts.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Corruption`] when directories and the tx log
    /// disagree in a way that cannot be reconciled; I/O and storage errors
    /// from opening the files.
    pub fn open(root: impl AsRef<Path>, options: ManagerOptions) -> Result<Self, ManagerError> {
        let root = root.as_ref().to_path_buf();
        let mode = if options.writable {
            fs::create_dir_all(&root)?;
            FileMode::ReadWrite
        } else {
            FileMode::ReadOnly
        };

        let tx_log = TxLog::open(root.join(TX_LOG_FILE), options.writable)?;
        let symbols = SymbolStore::open(&root, &options.schema, mode, options.chunk_bit_hint)?;
        let config = Arc::new(PartitionConfig {
            schema: options.schema,
            mode,
            record_count_hint: options.record_count_hint,
            chunk_bit_hint: options.chunk_bit_hint,
            symbols: symbols.tables().to_vec(),
        });

        let manager = Self {
            root,
            partition_by: options.partition_by,
            writable: options.writable,
            close_full_partitions_on_commit: options.close_full_partitions_on_commit,
            config,
            tx_log,
            symbols,
            partitions: RwLock::new(Vec::new()),
            cached_root: Mutex::new(None),
        };

        let rec = manager.read_tx_log()?;
        if manager.writable {
            manager.reconcile_writer(&rec)?;
        }

        let partitions = manager.partition_count()?;
        info!(
            root = %manager.root.display(),
            writable = manager.writable,
            partitions,
            max_row_id = %RowId::from_raw(rec.journal_max_row_id),
            "journal opened"
        );
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Schema the journal was opened with.
    pub fn schema(&self) -> &JournalSchema {
        &self.config.schema
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn symbols(&self) -> &SymbolStore {
        &self.symbols
    }

    /// Known partitions, including ones created by an open writer transaction.
    pub fn partition_count(&self) -> Result<usize, ManagerError> {
        Ok(self.read_partitions()?.len())
    }

    /// Partition with the given 1-based id.
    pub fn partition(&self, id: u32) -> Result<Arc<Partition>, ManagerError> {
        let parts = self.read_partitions()?;
        id.checked_sub(1)
            .and_then(|i| parts.get(i as usize))
            .cloned()
            .ok_or_else(|| ManagerError::Internal(format!("unknown partition id {id}")))
    }

    pub fn partitions(&self) -> Result<Vec<Arc<Partition>>, ManagerError> {
        Ok(self.read_partitions()?.clone())
    }

    #[cfg(test)]
    pub(crate) fn tx_log(&self) -> &TxLog {
        &self.tx_log
    }

    /// Commit records with their log addresses, newest first.
    pub fn tx_history(&self) -> Result<Vec<(u64, TxRec)>, ManagerError> {
        Ok(self.tx_log.history()?)
    }

    // --------------------------------------------------------------------------------------------
    // Reconciliation
    // --------------------------------------------------------------------------------------------

    /// Current tx record, with the partition list extended to match it.
    pub fn read_tx_log(&self) -> Result<TxRec, ManagerError> {
        let rec = if self.writable {
            self.latest_root()?
        } else {
            let mut cached = self
                .cached_root
                .lock()
                .map_err(|_| ManagerError::Internal("root cache lock poisoned".into()))?;
            match cached.as_ref() {
                Some(rec) => rec.clone(),
                None => {
                    let rec = self.latest_root()?;
                    *cached = Some(rec.clone());
                    rec
                }
            }
        };
        self.attach_partitions(&rec)?;
        Ok(rec)
    }

    fn latest_root(&self) -> Result<TxRec, ManagerError> {
        Ok(self.tx_log.latest()?.map(|(_, rec)| rec).unwrap_or_default())
    }

    /// Appends the attested partitions not tracked yet. Never shrinks the list.
    fn attach_partitions(&self, rec: &TxRec) -> Result<(), ManagerError> {
        let attested = RowId::from_raw(rec.journal_max_row_id).partition_id() as usize;
        if self.read_partitions()?.len() >= attested {
            return Ok(());
        }

        let chosen = self.attested_dirs(rec, attested)?;
        let mut parts = self.write_partitions()?;
        for (i, entry) in chosen.into_iter().enumerate().skip(parts.len()) {
            let id = i as u32 + 1;
            debug!(partition = %entry.name, id, "attached partition");
            parts.push(Arc::new(Partition::new(
                id,
                entry.name.clone(),
                self.root.join(&entry.name),
                PartitionBounds {
                    start: entry.start,
                    end: entry.end,
                },
                Arc::clone(&self.config),
            )));
        }
        Ok(())
    }

    /// The `attested` partition directories in start order.
    ///
    /// The last one is exactly `rec.last_partition_name`; the ones before
    /// it are the highest version of each earlier start.
    fn attested_dirs(&self, rec: &TxRec, attested: usize) -> Result<Vec<DirEntry>, ManagerError> {
        let entries = self.scan_dirs()?;
        let last = entries
            .iter()
            .find(|e| e.name == rec.last_partition_name)
            .cloned()
            .ok_or_else(|| {
                ManagerError::Corruption(format!(
                    "last committed partition '{}' is missing",
                    rec.last_partition_name
                ))
            })?;

        let mut earlier: Vec<DirEntry> = Vec::new();
        for entry in entries.into_iter().filter(|e| e.start < last.start) {
            match earlier.iter_mut().find(|e| e.start == entry.start) {
                Some(seen) if seen.version < entry.version => *seen = entry,
                Some(_) => {}
                None => earlier.push(entry),
            }
        }
        earlier.sort_by_key(|e| e.start);
        earlier.push(last);

        if earlier.len() != attested {
            return Err(ManagerError::Corruption(format!(
                "tx log attests {attested} partitions, found {} directories",
                earlier.len()
            )));
        }
        Ok(earlier)
    }

    fn scan_dirs(&self) -> Result<Vec<DirEntry>, ManagerError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(parsed) = parse_partition_name(&name, self.partition_by) {
                out.push(DirEntry {
                    name,
                    start: parsed.bounds.start,
                    end: parsed.bounds.end,
                    version: parsed.version,
                });
            }
        }
        Ok(out)
    }

    /// Writer open: drop unattested directories, restore the headers the
    /// record attests.
    fn reconcile_writer(&self, rec: &TxRec) -> Result<(), ManagerError> {
        let parts = self.partitions()?;
        for entry in self.scan_dirs()? {
            if parts.iter().any(|p| p.name() == entry.name) {
                continue;
            }
            warn!(partition = %entry.name, "removing uncommitted partition directory");
            fs::remove_dir_all(self.root.join(&entry.name))?;
        }

        if let Some(last) = parts.last() {
            let guard = last.acquire()?;
            let rows = RowId::from_raw(rec.journal_max_row_id).local();
            let data = guard.read_tx_data(Some(rows), Some(&rec.index_pointers))?;
            guard.commit(&data)?;
        }
        let symbols = self
            .symbols
            .read_tx_data(&rec.symbol_key_counts, &rec.symbol_index_pointers)?;
        self.symbols.commit(&symbols)?;
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Transactions
    // --------------------------------------------------------------------------------------------

    /// Starts a transaction on the current root.
    pub fn begin(&self, mode: TxMode) -> Result<TxContext, ManagerError> {
        if mode == TxMode::ReadWrite && !self.writable {
            return Err(ManagerError::ReadOnly);
        }
        Ok(TxContext::new(mode, self.read_tx_log()?))
    }

    /// Partition ids visible to `tx`, ascending.
    pub fn visible_ids(&self, tx: &TxContext) -> Vec<u32> {
        let last = tx
            .created
            .iter()
            .copied()
            .max()
            .unwrap_or(0)
            .max(tx.partition_count);
        (1..=last).collect()
    }

    /// Loads the transaction view of partition `id` if not loaded yet.
    fn ensure_partition(&self, tx: &mut TxContext, id: u32) -> Result<(), ManagerError> {
        if tx.partitions.contains_key(&id) {
            return Ok(());
        }
        let partition = self.partition(id)?;
        let guard = partition.acquire()?;
        let data = if id == tx.partition_count {
            guard.read_tx_data(Some(tx.attested_last_rows()), Some(&tx.tx_rec.index_pointers))?
        } else if id < tx.partition_count {
            guard.read_tx_data(None, None)?
        } else {
            guard.read_tx_data(Some(0), None)?
        };
        tx.partitions.insert(id, data);
        Ok(())
    }

    fn ensure_symbols(&self, tx: &mut TxContext) -> Result<(), ManagerError> {
        if tx.symbols.is_none() {
            let rec = &tx.tx_rec;
            tx.symbols = Some(
                self.symbols
                    .read_tx_data(&rec.symbol_key_counts, &rec.symbol_index_pointers)?,
            );
        }
        Ok(())
    }

    fn partition_data<'t>(&self, tx: &'t mut TxContext, id: u32) -> Result<&'t PartitionTxData, ManagerError> {
        self.ensure_partition(tx, id)?;
        tx.partition(id)
            .ok_or_else(|| ManagerError::Internal(format!("partition {id} not loaded")))
    }

    fn check_writer(&self, tx: &TxContext) -> Result<(), ManagerError> {
        if !self.writable || tx.mode != TxMode::ReadWrite {
            return Err(ManagerError::ReadOnly);
        }
        Ok(())
    }

    /// Picks (or creates) the partition receiving a record at `timestamp`.
    pub fn get_append_partition(&self, tx: &mut TxContext, timestamp: i64) -> Result<u32, ManagerError> {
        self.check_writer(tx)?;
        if let Some(last) = tx.last_timestamp {
            if timestamp < last {
                return Err(ManagerError::OutOfOrder { timestamp, last });
            }
        }

        if let Some(current) = tx.current {
            if self.partition(current)?.contains(timestamp) {
                return Ok(current);
            }
        }

        let known = self.visible_ids(tx).last().copied();
        if let Some(id) = known {
            if tx.current != Some(id) && self.partition(id)?.contains(timestamp) {
                self.ensure_partition(tx, id)?;
                tx.current = Some(id);
                return Ok(id);
            }
            self.commit_early(tx, id)?;
        }

        self.create_partition(tx, timestamp)
    }

    /// Commits the headers of the partition being left behind.
    fn commit_early(&self, tx: &mut TxContext, id: u32) -> Result<(), ManagerError> {
        let Some(data) = tx.partitions.get_mut(&id) else {
            return Ok(());
        };
        if !data.dirty {
            return Ok(());
        }
        let partition = self.partition(id)?;
        let guard = partition.acquire()?;
        let handle = guard.commit(data)?;
        data.dirty = false;
        tx.rollbacks.push(handle);
        debug!(partition = %partition.name(), rows = data.row_count, "committed partition before switch");
        Ok(())
    }

    fn create_partition(&self, tx: &mut TxContext, timestamp: i64) -> Result<u32, ManagerError> {
        let bounds = bounds_for(timestamp, self.partition_by)?;
        let base = partition_name(bounds.start, self.partition_by)?;
        let mut version = 0u32;
        let mut name = versioned_name(&base, version);
        while self.root.join(&name).exists() {
            version += 1;
            name = versioned_name(&base, version);
        }
        let dir = self.root.join(&name);
        fs::create_dir_all(&dir)?;

        let id = {
            let mut parts = self.write_partitions()?;
            let id = parts.len() as u32 + 1;
            parts.push(Arc::new(Partition::new(
                id,
                name.clone(),
                dir,
                bounds,
                Arc::clone(&self.config),
            )));
            id
        };
        tx.created.push(id);
        self.ensure_partition(tx, id)?;
        tx.current = Some(id);
        info!(partition = %name, id, start = bounds.start, "created partition");
        Ok(id)
    }

    /// Appends one row, returning its id.
    pub fn append(&self, tx: &mut TxContext, row: &[Value]) -> Result<RowId, ManagerError> {
        self.check_writer(tx)?;
        let schema = &self.config.schema;
        validate_row(schema, row)?;
        let ts_column = schema.timestamp_index();
        let timestamp = match row.get(ts_column) {
            Some(Value::Int64(v) | Value::DateTime(v)) => *v,
            Some(other) => {
                return Err(ColumnError::TypeMismatch {
                    column: schema.column(ts_column)?.name.clone(),
                    expected: ColumnKind::Int64.name(),
                    found: other.type_name(),
                }
                .into());
            }
            None => return Err(SchemaError::UnknownColumn(format!("#{ts_column}")).into()),
        };

        let id = self.get_append_partition(tx, timestamp)?;
        let partition = self.partition(id)?;
        let guard = partition.acquire()?;
        self.ensure_symbols(tx)?;

        let TxContext {
            partitions, symbols, ..
        } = &mut *tx;
        let data = partitions
            .get_mut(&id)
            .ok_or_else(|| ManagerError::Internal(format!("partition {id} not loaded")))?;
        let symbols = symbols
            .as_mut()
            .ok_or_else(|| ManagerError::Internal("symbols not loaded".into()))?;
        let row_id = guard.append(row, data, symbols)?;

        tx.last_timestamp = Some(timestamp);
        tx.touch(id);
        Ok(row_id)
    }

    /// Makes `tx` durable. Returns the tx record address, or `None` if
    /// there was nothing to commit.
    ///
    /// On failure everything `tx` wrote is rolled back, including
    /// partitions it created, and `tx` must not be used again.
    pub fn commit(&self, tx: &mut TxContext) -> Result<Option<u64>, ManagerError> {
        self.check_writer(tx)?;
        let symbols_dirty = tx.symbols.as_ref().is_some_and(|s| s.dirty);
        if tx.touched.is_empty() && !symbols_dirty {
            return Ok(None);
        }

        let mut handles = std::mem::take(&mut tx.rollbacks);
        match self.write_commit(tx, &mut handles) {
            Ok((address, rec)) => {
                // Created partitions are now attested; a later rollback must keep them.
                tx.created.clear();
                info!(
                    address,
                    max_row_id = %RowId::from_raw(rec.journal_max_row_id),
                    partition = %rec.last_partition_name,
                    "committed"
                );
                if self.close_full_partitions_on_commit {
                    self.close_full_partitions(tx)?;
                }
                Ok(Some(address))
            }
            Err(e) => {
                warn!(error = %e, "commit failed, rolling back");
                for handle in handles.into_iter().rev() {
                    handle.rollback();
                }
                self.drop_created(tx)?;
                Err(ManagerError::CommitFailed(Box::new(e)))
            }
        }
    }

    fn write_commit(
        &self,
        tx: &mut TxContext,
        handles: &mut Vec<RollbackHandle>,
    ) -> Result<(u64, TxRec), ManagerError> {
        for &id in tx.touched.iter().rev() {
            let Some(data) = tx.partitions.get(&id) else {
                continue;
            };
            if !data.dirty {
                continue;
            }
            let partition = self.partition(id)?;
            let guard = partition.acquire()?;
            handles.push(guard.commit(data)?);
        }

        let (symbol_key_counts, symbol_index_pointers) = match &tx.symbols {
            Some(symbols) => {
                if symbols.dirty {
                    handles.push(self.symbols.commit(symbols)?);
                }
                (symbols.key_counts.clone(), self.symbols.pointers(symbols))
            }
            None => (
                tx.tx_rec.symbol_key_counts.clone(),
                tx.tx_rec.symbol_index_pointers.clone(),
            ),
        };

        let last_timestamp = tx
            .last_timestamp
            .unwrap_or(tx.tx_rec.last_partition_timestamp);
        let last_id = self
            .visible_ids(tx)
            .last()
            .copied()
            .ok_or_else(|| ManagerError::Internal("commit without partitions".into()))?;
        let last = self.partition(last_id)?;
        let guard = last.acquire()?;
        let data = self.partition_data(tx, last_id)?;

        let mut rec = TxRec {
            prev_tx_address: 0,
            commit_timestamp: chrono::Utc::now().timestamp_millis(),
            journal_max_row_id: RowId::new(last_id, data.row_count).raw(),
            last_partition_timestamp: last_timestamp,
            last_partition_name: last.name().to_string(),
            symbol_key_counts,
            symbol_index_pointers,
            index_pointers: guard.index_pointers(data),
        };

        let address = self.tx_log.append(&mut rec)?;
        Ok((address, rec))
    }

    fn close_full_partitions(&self, tx: &TxContext) -> Result<(), ManagerError> {
        let Some(&last) = tx.touched.last() else {
            return Ok(());
        };
        for &id in tx.touched.iter().filter(|&&id| id != last) {
            self.partition(id)?.close()?;
        }
        Ok(())
    }

    /// Discards `tx`: restores early-committed headers and removes the
    /// partitions it created.
    pub fn rollback(&self, tx: &mut TxContext) -> Result<(), ManagerError> {
        self.check_writer(tx)?;
        for handle in tx.rollbacks.drain(..).rev() {
            handle.rollback();
        }
        self.drop_created(tx)?;
        tx.partitions.clear();
        tx.symbols = None;
        tx.touched.clear();
        tx.current = None;
        debug!("transaction rolled back");
        Ok(())
    }

    fn drop_created(&self, tx: &mut TxContext) -> Result<(), ManagerError> {
        let Some(&first) = tx.created.iter().min() else {
            return Ok(());
        };
        let mut parts = self.write_partitions()?;
        for partition in parts.iter().skip(first as usize - 1) {
            partition.mark_overwritten()?;
            if let Err(e) = fs::remove_dir_all(partition.dir()) {
                warn!(partition = %partition.name(), error = %e, "failed to remove rolled back partition");
            }
            info!(partition = %partition.name(), "discarded partition");
        }
        parts.truncate(first as usize - 1);
        for id in tx.created.drain(..) {
            tx.partitions.remove(&id);
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Visible rows of partition `id`.
    pub fn row_count(&self, tx: &mut TxContext, id: u32) -> Result<u64, ManagerError> {
        Ok(self.partition_data(tx, id)?.row_count)
    }

    fn check_row(&self, tx: &mut TxContext, row_id: RowId) -> Result<Arc<Partition>, ManagerError> {
        let id = row_id.partition_id();
        if id == 0 || !self.visible_ids(tx).contains(&id) {
            return Err(ManagerError::RowNotFound(row_id));
        }
        if row_id.local() >= self.row_count(tx, id)? {
            return Err(ManagerError::RowNotFound(row_id));
        }
        self.partition(id)
    }

    /// Every column of `row_id` as seen by `tx`.
    ///
    /// # Errors
    ///
    /// [`ManagerError::RowNotFound`] when the row is not visible to `tx`.
    pub fn read_row(&self, tx: &mut TxContext, row_id: RowId) -> Result<Row, ManagerError> {
        let partition = self.check_row(tx, row_id)?;
        Ok(partition.acquire()?.read_row(row_id.local())?)
    }

    /// One column of `row_id` as seen by `tx`.
    pub fn get_value(&self, tx: &mut TxContext, row_id: RowId, column: usize) -> Result<Value, ManagerError> {
        self.config.schema.column(column)?;
        let partition = self.check_row(tx, row_id)?;
        Ok(partition.acquire()?.get_value(row_id.local(), column)?)
    }

    /// Rows whose indexed symbol `column` equals `value`: newest partition
    /// first, newest row first within a partition.
    pub fn symbol_rows(&self, tx: &mut TxContext, column: &str, value: &str) -> Result<Vec<RowId>, ManagerError> {
        let index = self.symbol_column(column)?;
        if !self.config.schema.column(index)?.indexed {
            return Err(ColumnError::NotIndexed(column.to_string()).into());
        }
        self.ensure_symbols(tx)?;
        let mut out = Vec::new();
        for id in self.visible_ids(tx).into_iter().rev() {
            self.ensure_partition(tx, id)?;
            let (Some(data), Some(symbols)) = (tx.partitions.get(&id), tx.symbols.as_ref()) else {
                return Err(ManagerError::Internal(format!("partition {id} not loaded")));
            };
            let partition = self.partition(id)?;
            let rows = partition.acquire()?.symbol_rows(index, value, data, symbols)?;
            out.extend(rows.into_iter().map(|local| RowId::new(id, local)));
        }
        Ok(out)
    }

    /// Every distinct value of symbol `column` visible to `tx`, in key order.
    pub fn symbol_values(&self, tx: &mut TxContext, column: &str) -> Result<Vec<String>, ManagerError> {
        let index = self.symbol_column(column)?;
        let table_id = self
            .config
            .schema
            .symbol_columns()
            .iter()
            .position(|&c| c == index)
            .ok_or_else(|| ManagerError::Internal(format!("'{column}' has no symbol table")))?;
        self.ensure_symbols(tx)?;
        let key_count = tx
            .symbols
            .as_ref()
            .and_then(|s| s.key_counts.get(table_id).copied())
            .unwrap_or(0);
        let table = self
            .symbols
            .tables()
            .get(table_id)
            .ok_or_else(|| ManagerError::Internal(format!("'{column}' has no symbol table")))?;
        Ok(table.values(key_count)?)
    }

    fn symbol_column(&self, column: &str) -> Result<usize, ManagerError> {
        let schema = &self.config.schema;
        let index = schema.column_index(column)?;
        let def = schema.column(index)?;
        if def.kind != ColumnKind::Symbol {
            return Err(ColumnError::TypeMismatch {
                column: column.to_string(),
                expected: ColumnKind::Symbol.name(),
                found: def.kind.name(),
            }
            .into());
        }
        Ok(index)
    }

    /// Rows with `from <= timestamp < to`, in row order.
    pub fn rows_between(&self, tx: &mut TxContext, from: i64, to: i64) -> Result<Vec<RowId>, ManagerError> {
        let mut out = Vec::new();
        if from >= to {
            return Ok(out);
        }
        for id in self.visible_ids(tx) {
            let partition = self.partition(id)?;
            let bounds = partition.bounds();
            if bounds.end.is_some_and(|end| end <= from) || bounds.start >= to {
                continue;
            }
            let rows = self.row_count(tx, id)?;
            let guard = partition.acquire()?;
            let lo = guard.lower_bound(from, rows)?;
            let hi = guard.lower_bound(to, rows)?;
            out.extend((lo..hi).map(|local| RowId::new(id, local)));
        }
        Ok(out)
    }

    /// Searches partition `id`'s timestamps; see
    /// [`PartitionGuard::binary_search_timestamp`](crate::partition::PartitionGuard::binary_search_timestamp).
    pub fn binary_search_timestamp(&self, tx: &mut TxContext, id: u32, timestamp: i64) -> Result<i64, ManagerError> {
        if !self.visible_ids(tx).contains(&id) {
            return Err(ManagerError::Internal(format!("partition {id} is not visible")));
        }
        let rows = self.row_count(tx, id)?;
        let partition = self.partition(id)?;
        Ok(partition.acquire()?.binary_search_timestamp(timestamp, rows)?)
    }

    /// Visible partition whose range holds `timestamp`.
    pub fn partition_for(&self, tx: &TxContext, timestamp: i64) -> Result<Option<u32>, ManagerError> {
        for id in self.visible_ids(tx) {
            if self.partition(id)?.contains(timestamp) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Closes open partitions idle for at least `ttl`. Returns how many closed.
    pub fn close_idle(&self, ttl: Duration) -> Result<usize, ManagerError> {
        let mut closed = 0;
        for partition in self.partitions()? {
            if partition.state() == PartitionState::StorageInitialized
                && partition.idle_for() >= ttl
                && partition.close()?
            {
                closed += 1;
            }
        }
        if closed > 0 {
            debug!(closed, "closed idle partitions");
        }
        Ok(closed)
    }

    /// Flushes and closes every partition and the symbol store.
    pub fn close_all(&self) -> Result<(), ManagerError> {
        for partition in self.partitions()? {
            partition.close()?;
        }
        if self.writable {
            self.symbols.flush()?;
        }
        self.symbols.release()?;
        Ok(())
    }

    fn read_partitions(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Arc<Partition>>>, ManagerError> {
        self.partitions
            .read()
            .map_err(|_| ManagerError::Internal("partition list lock poisoned".into()))
    }

    fn write_partitions(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Arc<Partition>>>, ManagerError> {
        self.partitions
            .write()
            .map_err(|_| ManagerError::Internal("partition list lock poisoned".into()))
    }
}
