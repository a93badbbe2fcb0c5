//! Journal-wide symbol dictionaries, stored in the journal root.
//!
//! Each symbol column owns four files: `<col>.symd` (values), `<col>.symi`
//! (key → value offset) and the `<col>.symr.k`/`<col>.symr.r` dedup index.
//! Table `t` uses file ids `4t..4t+3` and key-block slot `t`.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::ManagerError;
use crate::column::SymbolTable;
use crate::encoding::HeaderWidth;
use crate::index::{HashIndex, INITIAL_KEY_BLOCK, row_block_len_for};
use crate::partition::RollbackHandle;
use crate::schema::JournalSchema;
use crate::storage::{FileMode, FileSet, bit_hint_for};
use crate::tx::{FileTxState, SymbolTxData};

/// Journal-wide symbol tables, one per symbol column.
///
/// Their files live in the journal root and are shared by all partitions.
#[derive(Debug)]
pub struct SymbolStore {
    files: FileSet,
    tables: Vec<Arc<SymbolTable>>,
}

impl SymbolStore {
    /// Opens or creates the `.symd`, `.symi` and `.symr` files of every
    /// symbol column in `schema`.
    ///
    /// # Errors
    ///
    /// Storage and index errors from opening the files.
    pub fn open(
        root: &Path,
        schema: &JournalSchema,
        mode: FileMode,
        chunk_bit_hint: Option<u32>,
    ) -> Result<Self, ManagerError> {
        let mut files = FileSet::new();
        let mut tables = Vec::new();

        for (table_id, column) in schema.symbol_columns().into_iter().enumerate() {
            let def = schema.column(column)?;
            let distinct = def.distinct_count_hint as u64;
            let header = HeaderWidth::for_max_size(def.max_payload_bytes());
            let avg = (def.avg_size * 2 + header.bytes()) as u64;
            let hint = |size: u64| chunk_bit_hint.unwrap_or_else(|| bit_hint_for(size, distinct));

            let data = files.open(root.join(format!("{}.symd", def.name)), mode, hint(avg))?;
            let offsets = files.open(root.join(format!("{}.symi", def.name)), mode, hint(8))?;
            let (k, kid) = files.open(root.join(format!("{}.symr.k", def.name)), mode, hint(16))?;
            let (r, rid) = files.open(root.join(format!("{}.symr.r", def.name)), mode, hint(8))?;
            let dedup = HashIndex::open(k, kid, r, rid, table_id, row_block_len_for(distinct, distinct))?;

            tables.push(Arc::new(SymbolTable::new(
                &def.name, table_id, distinct, header, data, offsets, dedup,
            )));
        }

        debug!(root = %root.display(), tables = tables.len(), "symbol store opened");
        Ok(Self { files, tables })
    }

    /// Tables in symbol-column order.
    pub fn tables(&self) -> &[Arc<SymbolTable>] {
        &self.tables
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    /// Transaction view as of a tx record's key counts and dedup pointers.
    ///
    /// A table the record does not mention yet starts empty.
    pub fn read_tx_data(&self, key_counts: &[u64], pointers: &[u64]) -> Result<SymbolTxData, ManagerError> {
        let mut tx = SymbolTxData {
            key_counts: vec![0; self.tables.len()],
            files: FileTxState::new(self.files.len(), self.tables.len()),
            dirty: false,
        };
        for (t, table) in self.tables.iter().enumerate() {
            let pointer = pointers
                .get(t)
                .copied()
                .filter(|p| *p != 0)
                .unwrap_or(INITIAL_KEY_BLOCK);
            let key_count = key_counts.get(t).copied().unwrap_or(0);
            table.begin(&mut tx, key_count, Some(pointer))?;
        }
        Ok(tx)
    }

    /// Dedup key-block offsets of `tx`, one per table.
    pub fn pointers(&self, tx: &SymbolTxData) -> Vec<u64> {
        self.tables
            .iter()
            .map(|t| tx.files.key_blocks.get(t.dedup().slot()).map_or(0, |kb| kb.offset))
            .collect()
    }

    /// Persists dictionary sizes and dedup key blocks.
    pub fn commit(&self, tx: &SymbolTxData) -> Result<RollbackHandle, ManagerError> {
        let mut handle = RollbackHandle::new("symbols");
        match self.write_headers(tx, &mut handle) {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.rollback();
                Err(ManagerError::CommitFailed(Box::new(e)))
            }
        }
    }

    fn write_headers(&self, tx: &SymbolTxData, handle: &mut RollbackHandle) -> Result<(), ManagerError> {
        for table in &self.tables {
            let dedup = table.dedup();
            if let Some(kb) = tx.files.key_blocks.get(dedup.slot()) {
                if kb.offset != 0 && dedup.committed_offset()? != kb.offset {
                    let previous = dedup.publish(kb.offset)?;
                    handle.record_key_block(dedup.key_file(), previous);
                }
            }

            let [data, offsets, keys, rows] = table.files();
            let key_count = tx.key_counts.get(table.table_id()).copied().unwrap_or(0);
            let targets = [
                (data, tx.files.append_offsets[data.0]),
                (offsets, key_count * 8),
                (keys, tx.files.append_offsets[keys.0]),
                (rows, tx.files.append_offsets[rows.0]),
            ];
            for ((_, file), target) in targets {
                let previous = file.append_offset()?;
                if previous != target {
                    file.set_append_offset(target)?;
                    handle.record_append_offset(file, previous);
                }
            }
        }
        Ok(())
    }

    /// Flushes every symbol file to disk.
    pub fn flush(&self) -> Result<(), ManagerError> {
        Ok(self.files.flush_all()?)
    }

    pub fn release(&self) -> Result<(), ManagerError> {
        Ok(self.files.release_all()?)
    }
}
