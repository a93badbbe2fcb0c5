use std::sync::Arc;

use super::ColumnError;
use crate::storage::CompositeFile;
use crate::tx::FileTxState;

/// Bytes per row for `bits` flags: whole little-endian `u64` words.
pub fn bitset_row_width(bits: usize) -> u64 {
    (bits.div_ceil(64) * 8) as u64
}

/// Per-row null flags for the nullable fixed-width columns of a partition.
///
/// Each row occupies [`bitset_row_width`] bytes; bit `i` belongs to the
/// `i`-th nullable column of the schema. Fixed-width columns have no
/// sentinel for null, so this file is the only record of nullness.
#[derive(Debug)]
pub struct BitsetColumn {
    bits: usize,
    width: u64,
    file: Arc<CompositeFile>,
    file_id: usize,
}

impl BitsetColumn {
    /// Wraps `file` as a bitset of `bits` flags per row.
    pub fn new(bits: usize, file: Arc<CompositeFile>, file_id: usize) -> Self {
        Self {
            bits,
            width: bitset_row_width(bits),
            file,
            file_id,
        }
    }

    /// Flags per row.
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Bytes per row.
    pub fn width(&self) -> u64 {
        self.width
    }

    pub fn file_id(&self) -> usize {
        self.file_id
    }

    pub fn file(&self) -> &Arc<CompositeFile> {
        &self.file
    }

    /// Whether flag `bit` of `row` is set.
    ///
    /// # Errors
    ///
    /// [`ColumnError::Corruption`] if `bit` is not below [`bits`](Self::bits).
    pub fn is_set(&self, row: u64, bit: usize) -> Result<bool, ColumnError> {
        self.check(bit)?;
        let word = self.file.read_u64(row * self.width + (bit / 64) as u64 * 8)?;
        Ok(word & (1u64 << (bit % 64)) != 0)
    }

    /// Stores the flags of `row`; `flags[i]` is bit `i`.
    pub fn set(&self, row: u64, flags: &[bool], files: &mut FileTxState) -> Result<(), ColumnError> {
        if flags.len() > self.bits {
            return Err(ColumnError::Corruption(format!(
                "{} flags for a {}-bit row",
                flags.len(),
                self.bits
            )));
        }
        let mut words = vec![0u64; (self.width / 8) as usize];
        for (i, _) in flags.iter().enumerate().filter(|(_, set)| **set) {
            words[i / 64] |= 1u64 << (i % 64);
        }
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let at = row * self.width;
        self.file.write_bytes(at, &bytes)?;
        files.append_offsets[self.file_id] = at + self.width;
        Ok(())
    }

    fn check(&self, bit: usize) -> Result<(), ColumnError> {
        if bit >= self.bits {
            return Err(ColumnError::Corruption(format!(
                "bit {bit} out of range for {}-bit row",
                self.bits
            )));
        }
        Ok(())
    }
}
