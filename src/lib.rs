//! # journaldb
//!
//! An embedded, append-only columnar store for time-partitioned record
//! streams. Columns live in memory-mapped files, string-like "symbol"
//! fields are de-duplicated through journal-wide dictionaries, and every
//! commit is recorded in a checksummed, back-linked tx log.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use journaldb::{ColumnDef, ColumnKind, Journal, JournalConfig, JournalSchema, PartitionBy, Value};
//!
//! let schema = JournalSchema::new(
//!     vec![
//!         ColumnDef::new("sym", ColumnKind::Symbol).indexed().distinct(64),
//!         ColumnDef::new("price", ColumnKind::Double),
//!         ColumnDef::new("ts", ColumnKind::DateTime),
//!     ],
//!     "ts",
//! )
//! .unwrap();
//! let config = JournalConfig {
//!     partition_by: PartitionBy::Day,
//!     ..JournalConfig::new(schema)
//! };
//! let journal = Journal::open("/tmp/quotes", config).unwrap();
//!
//! // Write
//! let mut writer = journal.writer().unwrap();
//! writer
//!     .append(&[Value::Str("EURUSD".into()), Value::Double(1.08), Value::DateTime(1_700_000_000_000)])
//!     .unwrap();
//! writer.commit().unwrap();
//!
//! // Read
//! let mut reader = journal.reader().unwrap();
//! let rows = reader.symbol_rows("sym", "EURUSD").unwrap();
//! assert_eq!(reader.get_f64(rows[0], "price").unwrap(), Some(1.08));
//!
//! journal.close().unwrap();
//! ```
//!
//! ## Model
//!
//! - **One writer, many readers.** A [`JournalWriter`] batches appends into
//!   a transaction; readers see only committed rows as of the moment they
//!   were opened.
//! - **Ordered appends.** Timestamps never go backwards; an out-of-order
//!   record is rejected before anything is written.
//! - **Partitions.** Rows are split into day/month/year directories by the
//!   designated timestamp column.

pub(crate) mod column;
pub(crate) mod encoding;
pub(crate) mod index;
pub(crate) mod manager;
pub(crate) mod partition;
pub mod schema;
pub(crate) mod storage;
pub(crate) mod tx;
pub(crate) mod txlog;


pub use column::ColumnError;
pub use encoding::EncodingError;
pub use index::IndexError;
pub use manager::ManagerError;
pub use partition::PartitionError;
pub use schema::{
    BoundMapping, ColumnDef, ColumnKind, JournalSchema, PartitionBy, RecordMapping, Row, SchemaError, Value,
};
pub use storage::{MAX_BIT_HINT, MIN_BIT_HINT, StorageError};
pub use tx::{RowId, TxMode};
pub use txlog::{TxLogError, TxRec};

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use manager::{ManagerOptions, PartitionManager};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tx::TxContext;

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Journal`].
///
/// There is no meaningful default schema, so defaults come from
/// [`JournalConfig::new`]. The configuration is validated by
/// [`Journal::open`].
///
/// # Example
///
/// ```rust
/// use journaldb::{ColumnDef, ColumnKind, JournalConfig, JournalSchema, PartitionBy};
///
/// let schema = JournalSchema::new(vec![ColumnDef::new("ts", ColumnKind::Int64)], "ts").unwrap();
/// let config = JournalConfig {
///     partition_by: PartitionBy::Month,
///     record_count_hint: 10_000,
///     ..JournalConfig::new(schema)
/// };
/// ```
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Column layout. A journal must be reopened with the same schema.
    pub schema: JournalSchema,

    /// Partition granularity.
    ///
    /// Default: [`PartitionBy::Day`].
    pub partition_by: PartitionBy,

    /// Expected rows per partition. Sizes file chunks and index row blocks.
    ///
    /// Default: 1 000 000. Must be ≥ 1.
    pub record_count_hint: u64,

    /// [`TxMode::ReadOnly`] opens existing files without ever writing.
    ///
    /// Default: [`TxMode::ReadWrite`].
    pub mode: TxMode,

    /// Partitions idle at least this long are closed in the background
    /// after each commit. `None` keeps them open until [`Journal::close`].
    ///
    /// Default: `None`.
    pub open_partition_ttl: Option<Duration>,

    /// After a commit that touched several partitions, close all but the last.
    ///
    /// Default: `false`.
    pub close_full_partitions_on_commit: bool,

    /// Background worker threads.
    ///
    /// Default: 1. Must be ≥ 1.
    pub background_threads: usize,

    /// Fixed chunk size (`2^n` bytes) for every file, instead of one
    /// computed from the size hints.
    ///
    /// Default: `None`. Must be in `[MIN_BIT_HINT, MAX_BIT_HINT]`.
    pub chunk_bit_hint: Option<u32>,
}

impl JournalConfig {
    /// Defaults for every setting except the schema.
    pub fn new(schema: JournalSchema) -> Self {
        Self {
            schema,
            partition_by: PartitionBy::Day,
            record_count_hint: 1_000_000,
            mode: TxMode::ReadWrite,
            open_partition_ttl: None,
            close_full_partitions_on_commit: false,
            background_threads: 1,
            chunk_bit_hint: None,
        }
    }

    fn validate(&self) -> Result<(), JournalError> {
        if self.record_count_hint < 1 {
            return Err(JournalError::InvalidConfig("record_count_hint must be >= 1".into()));
        }
        if self.background_threads < 1 {
            return Err(JournalError::InvalidConfig("background_threads must be >= 1".into()));
        }
        if let Some(bits) = self.chunk_bit_hint {
            storage::validate_bit_hint(bits).map_err(|e| JournalError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    fn to_manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            schema: self.schema.clone(),
            partition_by: self.partition_by,
            writable: self.mode == TxMode::ReadWrite,
            record_count_hint: self.record_count_hint,
            chunk_bit_hint: self.chunk_bit_hint,
            close_full_partitions_on_commit: self.close_full_partitions_on_commit,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The journal has been closed.
    #[error("journal is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Another writer is active on this journal.
    #[error("a writer is already active")]
    WriterBusy,

    /// Write requested on a read-only journal.
    #[error("journal is read-only")]
    ReadOnly,

    /// Unknown column or typed access of the wrong kind.
    #[error("{0}")]
    Schema(#[from] SchemaError),

    #[error("{0}")]
    Manager(#[from] ManagerError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JournalError {
    /// `true` for a rejected out-of-order append.
    pub fn is_out_of_order(&self) -> bool {
        matches!(self, JournalError::Manager(ManagerError::OutOfOrder { .. }))
    }
}

// ------------------------------------------------------------------------------------------------
// Background worker state
// ------------------------------------------------------------------------------------------------

type Task = Box<dyn FnOnce() + Send>;

/// Thread pool sender and worker handles.
/// Taken (`Option::take`) on shutdown to ensure single cleanup.
struct BackgroundPool {
    sender: crossbeam::channel::Sender<Task>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl BackgroundPool {
    fn spawn(threads: usize) -> Result<Self, JournalError> {
        let (sender, receiver) = crossbeam::channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("journaldb-bg-{id}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        task();
                    }
                })
                .map_err(|e| JournalError::Internal(format!("failed to spawn background thread: {e}")))?;
            workers.push(handle);
        }
        Ok(Self { sender, workers })
    }
}

struct Shared {
    manager: PartitionManager,
    bg: Mutex<Option<BackgroundPool>>,
    closed: AtomicBool,
    writer_active: AtomicBool,
    open_partition_ttl: Option<Duration>,
}

impl Shared {
    fn check_open(&self) -> Result<(), JournalError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JournalError::Closed);
        }
        Ok(())
    }

    /// Queues an idle-partition sweep if a TTL is configured.
    fn schedule_idle_close(self: &Arc<Self>) {
        let Some(ttl) = self.open_partition_ttl else {
            return;
        };
        let Ok(guard) = self.bg.lock() else {
            return;
        };
        if let Some(bg) = guard.as_ref() {
            let shared: Weak<Shared> = Arc::downgrade(self);
            let _ = bg.sender.send(Box::new(move || {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
                match shared.manager.close_idle(ttl) {
                    Ok(0) => {}
                    Ok(closed) => debug!(closed, "background: closed idle partitions"),
                    Err(e) => error!("background idle close failed: {e}"),
                }
            }));
        }
    }

    /// Drains the background task queue and joins all worker threads.
    fn shutdown_pool(&self) {
        let pool = match self.bg.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(bg) = pool {
            drop(bg.sender);
            for worker in bg.workers {
                let _ = worker.join();
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Journal handle
// ------------------------------------------------------------------------------------------------

/// An open journal directory.
///
/// `Journal` is `Send + Sync`; share it through an `Arc` and open one
/// [`JournalReader`] per reading thread. At most one [`JournalWriter`]
/// exists at a time.
///
/// # Shutdown
///
/// Call [`Journal::close`] for a graceful shutdown. Dropping the handle
/// closes it too, ignoring errors.
pub struct Journal {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("root", &self.shared.manager.root())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Journal {
    /// Opens (or, in read-write mode, creates) the journal at `path`.
    ///
    /// A read-write open removes partition directories the tx log does
    /// not attest and restores the last partition's file headers.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidConfig`] if any configuration
    /// parameter is out of range.
    pub fn open(path: impl AsRef<Path>, config: JournalConfig) -> Result<Self, JournalError> {
        config.validate()?;
        let manager = PartitionManager::open(&path, config.to_manager_options())?;
        let bg = BackgroundPool::spawn(config.background_threads)?;

        info!(
            path = %path.as_ref().display(),
            mode = ?config.mode,
            partition_by = ?config.partition_by,
            "journal ready"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                bg: Mutex::new(Some(bg)),
                closed: AtomicBool::new(false),
                writer_active: AtomicBool::new(false),
                open_partition_ttl: config.open_partition_ttl,
            }),
        })
    }

    /// Schema the journal was opened with.
    pub fn schema(&self) -> &JournalSchema {
        self.shared.manager.schema()
    }

    /// Starts the single writer.
    ///
    /// # Errors
    ///
    /// [`JournalError::WriterBusy`] while another writer is alive,
    /// [`JournalError::ReadOnly`] on a read-only journal.
    pub fn writer(&self) -> Result<JournalWriter, JournalError> {
        self.shared.check_open()?;
        if !self.shared.manager.is_writable() {
            return Err(JournalError::ReadOnly);
        }
        if self
            .shared
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(JournalError::WriterBusy);
        }
        match self.shared.manager.begin(TxMode::ReadWrite) {
            Ok(tx) => Ok(JournalWriter {
                shared: Arc::clone(&self.shared),
                tx,
            }),
            Err(e) => {
                self.shared.writer_active.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Opens a snapshot of the latest committed state.
    pub fn reader(&self) -> Result<JournalReader, JournalError> {
        self.shared.check_open()?;
        let tx = self.shared.manager.begin(TxMode::ReadOnly)?;
        Ok(JournalReader {
            shared: Arc::clone(&self.shared),
            tx,
        })
    }

    /// Commit records with their log addresses, newest first.
    pub fn tx_history(&self) -> Result<Vec<(u64, TxRec)>, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.tx_history()?)
    }

    /// Closes partitions idle for at least `ttl`; returns how many closed.
    pub fn close_idle_partitions(&self, ttl: Duration) -> Result<usize, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.close_idle(ttl)?)
    }

    /// Gracefully shuts the journal down.
    ///
    /// Waits for background work, then flushes and releases every file.
    /// Subsequent operations on this handle and on its readers and writer
    /// return [`JournalError::Closed`]. Calling `close` more than once is
    /// harmless.
    pub fn close(&self) -> Result<(), JournalError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown_pool();
        self.shared.manager.close_all()?;
        info!(root = %self.shared.manager.root().display(), "journal closed");
        Ok(())
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                warn!("close on drop failed: {e}");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// The journal's single writer.
///
/// Appends accumulate in an open transaction until [`commit`](Self::commit);
/// dropping the writer rolls back whatever was not committed.
pub struct JournalWriter {
    shared: Arc<Shared>,
    tx: TxContext,
}

impl std::fmt::Debug for JournalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalWriter")
            .field("touched", &self.tx.touched)
            .field("last_timestamp", &self.tx.last_timestamp)
            .finish_non_exhaustive()
    }
}

impl JournalWriter {
    /// Appends one row in schema column order.
    ///
    /// # Errors
    ///
    /// An out-of-order timestamp ([`JournalError::is_out_of_order`]) or a
    /// row that does not fit the schema is rejected before anything is
    /// written; the transaction stays usable.
    pub fn append(&mut self, row: &[Value]) -> Result<RowId, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.append(&mut self.tx, row)?)
    }

    /// Appends `record` through a bound mapping.
    ///
    /// # Errors
    ///
    /// [`JournalError::Schema`] when `mapping` was bound against a schema
    /// with another layout, plus every error of [`append`](Self::append).
    pub fn append_record<R>(&mut self, mapping: &BoundMapping<R>, record: &R) -> Result<RowId, JournalError> {
        mapping.check_schema(self.shared.manager.schema())?;
        let row = mapping.to_row(record);
        self.append(&row)
    }

    /// Timestamp of the last appended (or last committed) row.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.tx.last_timestamp()
    }

    /// Makes every append since the last commit durable and visible to
    /// new readers.
    ///
    /// # Errors
    ///
    /// On failure the transaction is rolled back and the journal stays at
    /// the previous commit; the writer starts a fresh transaction either way.
    /// A commit error is reported ahead of a failure to start that fresh
    /// transaction.
    pub fn commit(&mut self) -> Result<(), JournalError> {
        self.shared.check_open()?;
        let committed = self.shared.manager.commit(&mut self.tx);
        if let Ok(Some(_)) = committed {
            self.shared.schedule_idle_close();
        }
        let fresh = self.shared.manager.begin(TxMode::ReadWrite);
        committed?;
        self.tx = fresh?;
        Ok(())
    }

    /// Discards every append since the last commit.
    pub fn rollback(&mut self) -> Result<(), JournalError> {
        self.shared.check_open()?;
        self.shared.manager.rollback(&mut self.tx)?;
        self.tx = self.shared.manager.begin(TxMode::ReadWrite)?;
        Ok(())
    }

    fn has_pending(&self) -> bool {
        !self.tx.touched.is_empty() || !self.tx.created.is_empty() || !self.tx.rollbacks.is_empty()
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        if self.has_pending() && !self.shared.closed.load(Ordering::Acquire) {
            if let Err(e) = self.shared.manager.rollback(&mut self.tx) {
                warn!("rollback on drop failed: {e}");
            }
        }
        self.shared.writer_active.store(false, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A read snapshot. Rows committed after the reader was opened stay
/// invisible to it.
pub struct JournalReader {
    shared: Arc<Shared>,
    tx: TxContext,
}

impl std::fmt::Debug for JournalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalReader")
            .field("partitions", &self.tx.partition_count())
            .finish_non_exhaustive()
    }
}

macro_rules! typed_get {
    ($($name:ident => $ty:ty, $into:ident, [$($kind:ident),+]);* $(;)?) => {
        $(
            #[doc = concat!("Reads `column` as `", stringify!($ty), "`; `None` for null.")]
            pub fn $name(&mut self, row: RowId, column: &str) -> Result<Option<$ty>, JournalError> {
                let index = self.typed_column(column, &[$(ColumnKind::$kind),+], stringify!($ty))?;
                match self.get_at(row, index)? {
                    Value::Null => Ok(None),
                    value => Ok(Some(value.$into()?)),
                }
            }
        )*
    };
}

impl JournalReader {
    /// Partition ids visible to this snapshot, ascending.
    pub fn partition_ids(&self) -> Vec<u32> {
        self.shared.manager.visible_ids(&self.tx)
    }

    /// The commit this snapshot is reading.
    pub fn tx_rec(&self) -> &TxRec {
        self.tx.tx_rec()
    }

    /// Rows visible in partition `id`.
    pub fn partition_row_count(&mut self, id: u32) -> Result<u64, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.row_count(&mut self.tx, id)?)
    }

    /// Rows visible across all partitions.
    pub fn row_count(&mut self) -> Result<u64, JournalError> {
        let mut total = 0;
        for id in self.partition_ids() {
            total += self.partition_row_count(id)?;
        }
        Ok(total)
    }

    /// Every column of `row`, in schema order.
    ///
    /// # Errors
    ///
    /// [`ManagerError::RowNotFound`] (wrapped) when the row is not part of
    /// this snapshot; [`JournalError::Closed`] after [`Journal::close`].
    pub fn read_row(&mut self, row: RowId) -> Result<Row, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.read_row(&mut self.tx, row)?)
    }

    /// Reads a row into `R` through a bound mapping.
    pub fn read_record<R: Default>(&mut self, mapping: &BoundMapping<R>, row: RowId) -> Result<R, JournalError> {
        mapping.check_schema(self.shared.manager.schema())?;
        let values = self.read_row(row)?;
        Ok(mapping.from_row(values)?)
    }

    /// Reads one field.
    pub fn get(&mut self, row: RowId, column: &str) -> Result<Value, JournalError> {
        let index = self.shared.manager.schema().column_index(column)?;
        self.get_at(row, index)
    }

    fn get_at(&mut self, row: RowId, column: usize) -> Result<Value, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.get_value(&mut self.tx, row, column)?)
    }

    fn typed_column(&self, column: &str, kinds: &[ColumnKind], wanted: &'static str) -> Result<usize, JournalError> {
        let schema = self.shared.manager.schema();
        let index = schema.column_index(column)?;
        let kind = schema.column(index)?.kind;
        if !kinds.contains(&kind) {
            return Err(SchemaError::TypeMismatch {
                column: column.to_string(),
                expected: wanted,
                found: kind.name(),
            }
            .into());
        }
        Ok(index)
    }

    typed_get! {
        get_u8 => u8, into_u8, [Byte];
        get_bool => bool, into_bool, [Bool];
        get_i16 => i16, into_i16, [Int16];
        get_i32 => i32, into_i32, [Int32];
        get_i64 => i64, into_i64, [Int64, DateTime];
        get_f64 => f64, into_f64, [Double];
        get_str => String, into_string, [String, Symbol];
        get_bytes => Vec<u8>, into_bytes, [Binary];
    }

    /// Rows whose indexed symbol `column` equals `value`: newest partition
    /// first, most recent row first within each partition.
    pub fn symbol_rows(&mut self, column: &str, value: &str) -> Result<Vec<RowId>, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.symbol_rows(&mut self.tx, column, value)?)
    }

    /// Distinct values of symbol `column`, in first-seen order.
    pub fn symbol_values(&mut self, column: &str) -> Result<Vec<String>, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.symbol_values(&mut self.tx, column)?)
    }

    /// Rows with `from <= timestamp < to`, in append order.
    pub fn rows_between(&mut self, from: i64, to: i64) -> Result<Vec<RowId>, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.rows_between(&mut self.tx, from, to)?)
    }

    /// Binary search over partition `id`'s timestamps: the local row
    /// holding `timestamp`, or `!insertion_point` when absent.
    pub fn binary_search_timestamp(&mut self, id: u32, timestamp: i64) -> Result<i64, JournalError> {
        self.shared.check_open()?;
        Ok(self
            .shared
            .manager
            .binary_search_timestamp(&mut self.tx, id, timestamp)?)
    }

    /// Visible partition whose time range holds `timestamp`.
    pub fn partition_for(&self, timestamp: i64) -> Result<Option<u32>, JournalError> {
        self.shared.check_open()?;
        Ok(self.shared.manager.partition_for(&self.tx, timestamp)?)
    }
}

// ------------------------------------------------------------------------------------------------
// Test support
// ------------------------------------------------------------------------------------------------
