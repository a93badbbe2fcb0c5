//! # Column encodings
//!
//! One schema field stored across one partition. The set of encodings is
//! closed, so [`Column`] is a plain enum dispatched by `match`:
//!
//! - [`FixedColumn`]: one fixed-width slot per row at `row * width`.
//! - [`VarColumn`]: strings (UTF-16LE) and binary, a length-prefixed data
//!   file plus an 8-byte-per-row offset index (`-1` for null).
//! - [`SymbolColumn`]: a 4-byte dictionary key per row resolved through a
//!   journal-wide [`SymbolTable`], optionally with a per-partition inverted
//!   index.
//!
//! [`BitsetColumn`] is not a schema field; it records which nullable
//! fixed-width fields of a row are null.
//!
//! Writes go through the transaction's [`FileTxState`]: every `set`
//! advances the append offsets of the files it touched, and nothing here
//! persists those offsets.

mod bitset;
mod fixed;
mod symbol;
mod var;

#[cfg(test)]
mod tests;

pub use bitset::{BitsetColumn, bitset_row_width};
pub use fixed::FixedColumn;
pub use symbol::{SymbolColumn, SymbolTable, symbol_hash};
pub use var::VarColumn;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::index::IndexError;
use crate::schema::{SchemaError, Value};
use crate::storage::StorageError;
use crate::tx::{FileTxState, SymbolTxData};

/// Errors returned by column reads and writes.
#[derive(Debug, Error)]
pub enum ColumnError {
    /// Underlying file failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Inverted or dedup index failure.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Length header could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Value kind does not match the column kind.
    #[error("type mismatch on column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Payload does not fit the column's length header.
    #[error("value of {len} bytes too long for column '{column}' (max {max})")]
    ValueTooLong { column: String, len: usize, max: usize },

    /// Null written to a non-nullable fixed-width column.
    #[error("column '{0}' is not nullable")]
    NullNotAllowed(String),

    /// Symbol query on a column without an inverted index.
    #[error("column '{0}' is not indexed")]
    NotIndexed(String),

    /// On-disk bytes contradict the column layout.
    #[error("column corruption: {0}")]
    Corruption(String),
}

/// A partition's storage for one schema field.
///
/// The set of encodings is closed, so dispatch is a plain `match` rather
/// than a trait object.
#[derive(Debug)]
pub enum Column {
    /// Byte, Bool, Int16, Int32, Int64, Double and DateTime.
    Fixed(FixedColumn),
    /// String and Binary.
    Var(VarColumn),
    Symbol(SymbolColumn),
}

impl Column {
    /// Schema name of the column.
    pub fn name(&self) -> &str {
        match self {
            Column::Fixed(c) => c.name(),
            Column::Var(c) => c.name(),
            Column::Symbol(c) => c.name(),
        }
    }

    /// Reads row `row`.
    pub fn get(&self, row: u64) -> Result<Value, ColumnError> {
        match self {
            Column::Fixed(c) => c.get(row),
            Column::Var(c) => c.get(row),
            Column::Symbol(c) => c.get(row),
        }
    }

    /// Writes `value` at `row`, advancing the touched append offsets.
    ///
    /// Symbol columns may also add a dictionary entry to `symbols`.
    ///
    /// # Errors
    ///
    /// [`ColumnError::TypeMismatch`] when `value` does not fit the column
    /// kind and [`ColumnError::ValueTooLong`] when a payload exceeds its
    /// length header; storage failures are propagated.
    pub fn set(
        &self,
        row: u64,
        value: &Value,
        files: &mut FileTxState,
        symbols: &mut SymbolTxData,
    ) -> Result<(), ColumnError> {
        match self {
            Column::Fixed(c) => c.set(row, value, files),
            Column::Var(c) => c.set(row, value, files),
            Column::Symbol(c) => c.set(row, value, files, symbols),
        }
    }
}

pub(crate) fn mismatch(column: &str, expected: &'static str, value: &Value) -> ColumnError {
    ColumnError::TypeMismatch {
        column: column.to_string(),
        expected,
        found: value.type_name(),
    }
}

/// UTF-16LE bytes of `s`.
pub(crate) fn encode_utf16(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

pub(crate) fn decode_utf16(bytes: &[u8]) -> Result<String, ColumnError> {
    if bytes.len() % 2 != 0 {
        return Err(ColumnError::Corruption(format!(
            "odd UTF-16 payload length {}",
            bytes.len()
        )));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| ColumnError::Corruption(format!("invalid UTF-16: {e}")))
}
