//! # On-disk hash multimap
//!
//! [`HashIndex`] maps small integer keys to lists of `u64` values. It backs
//! symbol de-duplication (hash bucket → dictionary keys) and the optional
//! inverted symbol index (dictionary key → local row ids).
//!
//! ## Key file
//!
//! ```text
//! logical 0:  [ROW_BLOCK_LEN u64][KEY_BLOCK_OFFSET u64]
//! key block:  [SIZE u64][MAX_VALUE u64]
//!             [BLOCK_OFFSET u64][COUNT u64] × SIZE     (slot 0 reserved)
//! ```
//!
//! Key `k` lives in slot `k + 1`. `MAX_VALUE` is one past the largest
//! value ever added. The header's key-block offset is the committed block;
//! it only moves at commit.
//!
//! ## Row file
//!
//! ```text
//! [reserved u64][block][block]...
//! block: [VALUE u64] × ROW_BLOCK_LEN [PREV_BLOCK u64]
//! ```
//!
//! Blocks of one key are chained newest to oldest; a back-pointer of `0`
//! ends the chain, which is why logical offset 0 is never a block.
//!
//! ## Copy-on-write
//!
//! The first mutation of a transaction copies the committed key block to
//! the key file's append point (growing it if the key does not fit) and
//! mutates only the copy. Readers of the committed block never see the
//! uncommitted counts. Values land in row-block slots past every reader's
//! count, so row blocks are shared in place.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::storage::{CompositeFile, FileMode, StorageError};
use crate::tx::FileTxState;

const KEY_FILE_HEADER: u64 = 16;
const KEY_BLOCK_HEADER: u64 = 16;
const ENTRY_SIZE: u64 = 16;
const ROW_FILE_START: u64 = 8;

/// Smallest row block length.
pub const MIN_ROW_BLOCK_LEN: u64 = 16;

/// Offset of the empty key block written when a key file is initialised.
/// It is never mutated in place, so it always reads as "no keys".
pub const INITIAL_KEY_BLOCK: u64 = KEY_FILE_HEADER;

/// Smallest key block, in slots, allocated on growth.
const MIN_KEY_BLOCK_SLOTS: u64 = 16;

/// Errors returned by hash index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying key or row file failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persisted structure is inconsistent.
    #[error("index corruption in {path}: {reason}")]
    Corruption { path: String, reason: String },
}

/// Location and shape of a key block as seen by one transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyBlockState {
    /// Logical offset of the block in the key file.
    pub offset: u64,
    /// Number of slots, including the reserved slot 0.
    pub size: u64,
    /// One past the largest value added; `0` while empty.
    pub max_value: u64,
    /// Already copied to a private location in this transaction.
    pub copied: bool,
}

/// Row block length for an index expected to hold `record_count_hint`
/// values spread over `distinct_count_hint` keys.
///
/// `record_count_hint / distinct_count_hint / 2`, floored to a power of two,
/// at least [`MIN_ROW_BLOCK_LEN`].
pub fn row_block_len_for(record_count_hint: u64, distinct_count_hint: u64) -> u64 {
    let per_key = record_count_hint / distinct_count_hint.max(1) / 2;
    if per_key <= MIN_ROW_BLOCK_LEN {
        MIN_ROW_BLOCK_LEN
    } else {
        1u64 << (63 - per_key.leading_zeros())
    }
}

/// Key file + row file multimap.
#[derive(Debug)]
pub struct HashIndex {
    keys: Arc<CompositeFile>,
    key_file_id: usize,
    rows: Arc<CompositeFile>,
    row_file_id: usize,
    /// Position in [`FileTxState::key_blocks`].
    slot: usize,
    row_block_len: u64,
}

impl HashIndex {
    /// Opens an index over `keys`/`rows`.
    ///
    /// A fresh read-write key file is initialised with `row_block_len` and
    /// an empty key block. An existing file keeps its persisted row block
    /// length regardless of the argument.
    ///
    /// `key_file_id` and `row_file_id` are the files' slots in
    /// [`FileTxState::append_offsets`]; `slot` is this index's position in
    /// [`FileTxState::key_blocks`].
    ///
    /// # Errors
    ///
    /// [`IndexError::Corruption`] when a read-only key file was never
    /// initialised or a row block length is not a power of two.
    pub fn open(
        keys: Arc<CompositeFile>,
        key_file_id: usize,
        rows: Arc<CompositeFile>,
        row_file_id: usize,
        slot: usize,
        row_block_len: u64,
    ) -> Result<Self, IndexError> {
        let fresh = keys.append_offset()? == 0;

        let row_block_len = if fresh {
            if keys.mode() == FileMode::ReadOnly {
                return Err(corruption(&keys, "key file was never initialised"));
            }
            if !row_block_len.is_power_of_two() {
                return Err(corruption(&keys, &format!("row block length {row_block_len} is not a power of two")));
            }
            keys.write_u64(0, row_block_len)?;
            keys.write_u64(8, KEY_FILE_HEADER)?;
            keys.write_u64(KEY_FILE_HEADER, 0)?;
            keys.write_u64(KEY_FILE_HEADER + 8, 0)?;
            keys.set_append_offset(KEY_FILE_HEADER + KEY_BLOCK_HEADER)?;
            rows.set_append_offset(ROW_FILE_START)?;
            debug!(path = %keys.path().display(), row_block_len, "initialised hash index");
            row_block_len
        } else {
            let persisted = keys.read_u64(0)?;
            if persisted == 0 || !persisted.is_power_of_two() {
                return Err(corruption(&keys, &format!("row block length {persisted} is not a power of two")));
            }
            persisted
        };

        Ok(Self {
            keys,
            key_file_id,
            rows,
            row_file_id,
            slot,
            row_block_len,
        })
    }

    /// Values per row block.
    pub fn row_block_len(&self) -> u64 {
        self.row_block_len
    }

    /// Position of this index in [`FileTxState::key_blocks`].
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Slot of the key file in [`FileTxState::append_offsets`].
    pub fn key_file_id(&self) -> usize {
        self.key_file_id
    }

    /// Slot of the row file in [`FileTxState::append_offsets`].
    pub fn row_file_id(&self) -> usize {
        self.row_file_id
    }

    /// The key file; its header holds the committed key-block offset.
    pub fn key_file(&self) -> &Arc<CompositeFile> {
        &self.keys
    }

    /// The row file holding the chained value blocks.
    pub fn row_file(&self) -> &Arc<CompositeFile> {
        &self.rows
    }

    /// Key-block offset currently published in the key file header.
    pub fn committed_offset(&self) -> Result<u64, IndexError> {
        let offset = self.keys.read_u64(8)?;
        if offset == 0 {
            return Err(corruption(&self.keys, "key block offset is uninitialised"));
        }
        Ok(offset)
    }

    /// Reads the key block at `offset`.
    pub fn load_key_block(&self, offset: u64) -> Result<KeyBlockState, IndexError> {
        if offset == 0 {
            return Err(corruption(&self.keys, "key block offset is uninitialised"));
        }
        Ok(KeyBlockState {
            offset,
            size: self.keys.read_u64(offset)?,
            max_value: self.keys.read_u64(offset + 8)?,
            copied: false,
        })
    }

    /// Seeds `files` with this index's committed state.
    ///
    /// `pointer` overrides the header's key-block offset, e.g. with the one
    /// recorded in the tx log.
    pub fn begin(&self, files: &mut FileTxState, pointer: Option<u64>) -> Result<(), IndexError> {
        let offset = match pointer {
            Some(p) => p,
            None => self.committed_offset()?,
        };
        files.key_blocks[self.slot] = self.load_key_block(offset)?;
        files.append_offsets[self.key_file_id] = self.keys.append_offset()?;
        files.append_offsets[self.row_file_id] = self.rows.append_offset()?.max(ROW_FILE_START);
        Ok(())
    }

    /// Publishes `offset` as the committed key block, returning the previous one.
    ///
    /// Readers that start after this call see the new block. The returned
    /// offset is what a rollback writes back.
    pub fn publish(&self, offset: u64) -> Result<u64, IndexError> {
        publish_key_block(&self.keys, offset)
    }

    /// Appends `value` to the list of `key`.
    ///
    /// The first call in a transaction copies the key block (see the module
    /// docs); `files` tracks the copy and the grown append offsets.
    ///
    /// # Errors
    ///
    /// Storage errors from either file. A failure can leave the private
    /// copy half-updated, which the owning transaction discards.
    pub fn add(&self, key: u64, value: u64, files: &mut FileTxState) -> Result<(), IndexError> {
        let FileTxState {
            append_offsets,
            key_blocks,
        } = files;
        let kb = &mut key_blocks[self.slot];

        let needed = key + 2;
        if !kb.copied || kb.size < needed {
            self.copy_key_block(kb, needed, &mut append_offsets[self.key_file_id])?;
        }

        let rbl = self.row_block_len;
        let entry = kb.offset + KEY_BLOCK_HEADER + (key + 1) * ENTRY_SIZE;
        let head = self.keys.read_u64(entry)?;
        let count = self.keys.read_u64(entry + 8)?;

        let block = if count % rbl == 0 {
            let row_append = &mut append_offsets[self.row_file_id];
            let fresh = (*row_append).max(ROW_FILE_START);
            self.rows.write_u64(fresh + rbl * 8, head)?;
            *row_append = fresh + rbl * 8 + 8;
            self.keys.write_u64(entry, fresh)?;
            trace!(key, block = fresh, prev = head, "allocated row block");
            fresh
        } else {
            head
        };

        self.rows.write_u64(block + (count % rbl) * 8, value)?;
        self.keys.write_u64(entry + 8, count + 1)?;

        if value + 1 > kb.max_value {
            kb.max_value = value + 1;
            self.keys.write_u64(kb.offset + 8, kb.max_value)?;
        }
        Ok(())
    }

    /// Number of values stored under `key` in `kb`.
    pub fn count(&self, key: u64, kb: &KeyBlockState) -> Result<u64, IndexError> {
        if key + 1 >= kb.size {
            return Ok(0);
        }
        let entry = kb.offset + KEY_BLOCK_HEADER + (key + 1) * ENTRY_SIZE;
        Ok(self.keys.read_u64(entry + 8)?)
    }

    /// Values of `key`, newest first, keeping only those below `ceiling`.
    ///
    /// `ceiling` is the reader's row or key count, which hides values a
    /// concurrent writer appended to shared row blocks.
    ///
    /// # Errors
    ///
    /// [`IndexError::Corruption`] when the chain ends before `count` values
    /// were read.
    pub fn values(&self, key: u64, ceiling: u64, kb: &KeyBlockState) -> Result<Vec<u64>, IndexError> {
        if key + 1 >= kb.size {
            return Ok(Vec::new());
        }
        let rbl = self.row_block_len;
        let entry = kb.offset + KEY_BLOCK_HEADER + (key + 1) * ENTRY_SIZE;
        let mut block = self.keys.read_u64(entry)?;
        let count = self.keys.read_u64(entry + 8)?;

        // Values are distinct and below `ceiling`; `count` comes off disk.
        let mut out = Vec::with_capacity(count.min(ceiling) as usize);
        let mut remaining = count;
        let mut in_block = match count % rbl {
            0 => rbl.min(count),
            partial => partial,
        };

        while remaining > 0 {
            if block == 0 {
                return Err(corruption(
                    &self.keys,
                    &format!("key {key}: chain ends with {remaining} values unread"),
                ));
            }
            let bytes = self.rows.read_vec(block, (in_block * 8) as usize)?;
            for raw in bytes.chunks_exact(8).rev() {
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                let value = u64::from_le_bytes(word);
                if value < ceiling {
                    out.push(value);
                }
            }
            remaining -= in_block;
            block = self.rows.read_u64(block + rbl * 8)?;
            in_block = rbl.min(remaining);
        }
        Ok(out)
    }

    /// Copies `kb` to the key file append point with room for `needed` slots.
    fn copy_key_block(&self, kb: &mut KeyBlockState, needed: u64, key_append: &mut u64) -> Result<(), IndexError> {
        let new_size = if kb.size >= needed {
            kb.size
        } else {
            needed
                .next_power_of_two()
                .max(kb.size.saturating_mul(2))
                .max(MIN_KEY_BLOCK_SLOTS)
        };

        let dest = *key_append;
        let used = (kb.size * ENTRY_SIZE) as usize;
        if used > 0 {
            let entries = self
                .keys
                .read_vec(kb.offset + KEY_BLOCK_HEADER, used)?;
            self.keys.write_bytes(dest + KEY_BLOCK_HEADER, &entries)?;
        }
        let grown = ((new_size - kb.size) * ENTRY_SIZE) as usize;
        if grown > 0 {
            self.keys
                .write_bytes(dest + KEY_BLOCK_HEADER + used as u64, &vec![0u8; grown])?;
        }
        self.keys.write_u64(dest, new_size)?;
        self.keys.write_u64(dest + 8, kb.max_value)?;

        trace!(
            path = %self.keys.path().display(),
            from = kb.offset,
            to = dest,
            old_size = kb.size,
            new_size,
            "copied key block"
        );

        *key_append = dest + KEY_BLOCK_HEADER + new_size * ENTRY_SIZE;
        kb.offset = dest;
        kb.size = new_size;
        kb.copied = true;
        Ok(())
    }
}

/// Writes `offset` into the key-file header of `keys`, returning the
/// offset it replaced. Used directly by rollback, which only keeps the file.
pub fn publish_key_block(keys: &CompositeFile, offset: u64) -> Result<u64, IndexError> {
    keys.injected_failure()?;
    let previous = keys.read_u64(8)?;
    keys.write_u64(8, offset)?;
    Ok(previous)
}

fn corruption(file: &CompositeFile, reason: &str) -> IndexError {
    IndexError::Corruption {
        path: file.path().display().to_string(),
        reason: reason.to_string(),
    }
}
