use std::sync::Arc;

use super::{ColumnError, mismatch};
use crate::schema::{ColumnKind, Value};
use crate::storage::CompositeFile;
use crate::tx::FileTxState;

/// Fixed-width column: row `r` lives at `r * width`.
///
/// Numeric kinds are stored little-endian; `Bool` is one byte. The file's
/// append offset is always a whole number of rows once committed.
#[derive(Debug)]
pub struct FixedColumn {
    name: String,
    kind: ColumnKind,
    width: u64,
    file: Arc<CompositeFile>,
    file_id: usize,
}

impl FixedColumn {
    /// Wraps `file` as the storage of column `name`.
    ///
    /// # Errors
    ///
    /// [`ColumnError::TypeMismatch`] if `kind` has no fixed width.
    pub fn new(name: &str, kind: ColumnKind, file: Arc<CompositeFile>, file_id: usize) -> Result<Self, ColumnError> {
        let width = kind.fixed_width().ok_or_else(|| ColumnError::TypeMismatch {
            column: name.to_string(),
            expected: "fixed-width kind",
            found: kind.name(),
        })? as u64;
        Ok(Self {
            name: name.to_string(),
            kind,
            width,
            file,
            file_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
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

    /// Committed append offset for a partition holding `row_count` rows.
    pub fn append_offset_for(&self, row_count: u64) -> u64 {
        row_count * self.width
    }

    /// Row count implied by this file's committed append offset.
    pub fn rows_on_disk(&self) -> Result<(u64, bool), ColumnError> {
        let offset = self.file.append_offset()?;
        Ok((offset / self.width, offset % self.width == 0))
    }

    /// Value of `row`, ignoring nullness.
    pub fn get(&self, row: u64) -> Result<Value, ColumnError> {
        let at = row * self.width;
        let f = &self.file;
        Ok(match self.kind {
            ColumnKind::Byte => Value::Byte(f.read_u8(at)?),
            ColumnKind::Bool => Value::Bool(f.read_bool(at)?),
            ColumnKind::Int16 => Value::Int16(f.read_i16(at)?),
            ColumnKind::Int32 => Value::Int32(f.read_i32(at)?),
            ColumnKind::Int64 => Value::Int64(f.read_i64(at)?),
            ColumnKind::Double => Value::Double(f.read_f64(at)?),
            ColumnKind::DateTime => Value::DateTime(f.read_i64(at)?),
            ColumnKind::String | ColumnKind::Symbol | ColumnKind::Binary => {
                return Err(ColumnError::Corruption(format!(
                    "fixed column '{}' has variable kind",
                    self.name
                )));
            }
        })
    }

    /// Reads the raw `i64` of an Int64/DateTime column.
    pub fn get_i64(&self, row: u64) -> Result<i64, ColumnError> {
        Ok(self.file.read_i64(row * self.width)?)
    }

    /// Writes `value`; `Null` stores zero bytes (the bitset tracks nullness).
    pub fn set(&self, row: u64, value: &Value, files: &mut FileTxState) -> Result<(), ColumnError> {
        let at = row * self.width;
        let f = &self.file;
        match (self.kind, value) {
            (_, Value::Null) => f.write_bytes(at, &vec![0u8; self.width as usize])?,
            (ColumnKind::Byte, Value::Byte(v)) => f.write_u8(at, *v)?,
            (ColumnKind::Bool, Value::Bool(v)) => f.write_bool(at, *v)?,
            (ColumnKind::Int16, Value::Int16(v)) => f.write_i16(at, *v)?,
            (ColumnKind::Int32, Value::Int32(v)) => f.write_i32(at, *v)?,
            (ColumnKind::Int64 | ColumnKind::DateTime, Value::Int64(v) | Value::DateTime(v)) => {
                f.write_i64(at, *v)?
            }
            (ColumnKind::Double, Value::Double(v)) => f.write_f64(at, *v)?,
            (kind, other) => return Err(mismatch(&self.name, kind.name(), other)),
        }
        files.append_offsets[self.file_id] = at + self.width;
        Ok(())
    }
}
