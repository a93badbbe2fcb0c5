//! # Raw storage layer
//!
//! Every column, index and dictionary in a journal is ultimately a
//! [`CompositeFile`]: one on-disk file addressed by logical byte offset
//! and backed by a sequence of fixed-size, lazily memory-mapped chunks.
//!
//! ## On-disk layout
//!
//! ```text
//! [APPEND_OFFSET_LE: 8 bytes][logical byte 0][logical byte 1]...
//! ```
//!
//! The first 8 bytes hold the committed append offset. All offsets passed
//! to the typed accessors are *logical*, i.e. relative to the byte after
//! this header.
//!
//! ## Chunk sizing
//!
//! The chunk size is `1 << bit_hint`. Callers derive the hint from an
//! estimate of the file's final size via [`bit_hint_for`], which clamps
//! into `[AUTO_MIN_BIT_HINT, MAX_BIT_HINT]`. An explicitly supplied hint
//! outside `[MIN_BIT_HINT, MAX_BIT_HINT]` is rejected at construction.

mod composite;
mod file_set;


pub use composite::{CompositeFile, FileMode};
pub use file_set::FileSet;

use std::io;

use thiserror::Error;

/// Size of the append-offset header at the start of every raw file.
pub const FILE_HEADER_SIZE: u64 = 8;

/// Smallest chunk size accepted (`2^6 = 64` bytes).
pub const MIN_BIT_HINT: u32 = 6;

/// Largest chunk size accepted (`2^30 = 1 GiB`).
pub const MAX_BIT_HINT: u32 = 30;

/// Lower clamp used when the hint is computed from size estimates (64 KiB).
pub const AUTO_MIN_BIT_HINT: u32 = 16;

/// Errors returned by raw file operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O or mmap failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Chunk size hint or open mode is unusable.
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    /// A read touched bytes that do not exist in a read-only file.
    #[error("read out of bounds: offset {offset}, len {len}, file {path}")]
    OutOfBounds { offset: u64, len: usize, path: String },

    /// Attempted mutation of a file opened read-only.
    #[error("file is read-only: {0}")]
    ReadOnly(String),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Computes the chunk bit hint for a file expected to hold
/// `record_count` records of roughly `record_size` bytes.
///
/// Returns `ceil(log2(record_size * record_count))`, clamped into
/// `[AUTO_MIN_BIT_HINT, MAX_BIT_HINT]`.
pub fn bit_hint_for(record_size: u64, record_count: u64) -> u32 {
    let total = record_size.max(1).saturating_mul(record_count.max(1));
    let bits = if total <= 1 {
        0
    } else {
        64 - (total - 1).leading_zeros()
    };
    bits.clamp(AUTO_MIN_BIT_HINT, MAX_BIT_HINT)
}

/// Validates an explicit chunk bit hint.
pub fn validate_bit_hint(bit_hint: u32) -> Result<(), StorageError> {
    if !(MIN_BIT_HINT..=MAX_BIT_HINT).contains(&bit_hint) {
        return Err(StorageError::InvalidConfig(format!(
            "chunk bit hint {bit_hint} outside [{MIN_BIT_HINT}, {MAX_BIT_HINT}]"
        )));
    }
    Ok(())
}
