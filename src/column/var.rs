use std::sync::Arc;

use super::{ColumnError, decode_utf16, encode_utf16, mismatch};
use crate::encoding::HeaderWidth;
use crate::schema::{ColumnKind, Value};
use crate::storage::CompositeFile;
use crate::tx::FileTxState;

/// Index entry marking a null value.
pub const NULL_OFFSET: i64 = -1;

/// String or binary column.
///
/// The data file holds `[len][payload]` records; the index file holds,
/// per row, the 8-byte offset of that row's record or [`NULL_OFFSET`].
/// Strings are stored as UTF-16LE, so `len` counts bytes, not characters.
/// An empty string has a record of its own and is distinct from null.
#[derive(Debug)]
pub struct VarColumn {
    name: String,
    kind: ColumnKind,
    header: HeaderWidth,
    data: Arc<CompositeFile>,
    data_id: usize,
    index: Arc<CompositeFile>,
    index_id: usize,
}

impl VarColumn {
    /// Wraps the `(file, id)` pairs of the data and index files.
    ///
    /// # Errors
    ///
    /// [`ColumnError::TypeMismatch`] unless `kind` is String or Binary.
    pub fn new(
        name: &str,
        kind: ColumnKind,
        header: HeaderWidth,
        data: (Arc<CompositeFile>, usize),
        index: (Arc<CompositeFile>, usize),
    ) -> Result<Self, ColumnError> {
        if !matches!(kind, ColumnKind::String | ColumnKind::Binary) {
            return Err(ColumnError::TypeMismatch {
                column: name.to_string(),
                expected: "string or binary",
                found: kind.name(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            header,
            data: data.0,
            data_id: data.1,
            index: index.0,
            index_id: index.1,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width of the length prefix in front of each payload.
    pub fn header(&self) -> HeaderWidth {
        self.header
    }

    pub fn data_id(&self) -> usize {
        self.data_id
    }

    pub fn index_id(&self) -> usize {
        self.index_id
    }

    /// Value of `row`: `Str`, `Binary` or `Null`.
    ///
    /// # Errors
    ///
    /// [`ColumnError::Corruption`] for a negative offset other than
    /// [`NULL_OFFSET`] or a payload that is not valid UTF-16.
    pub fn get(&self, row: u64) -> Result<Value, ColumnError> {
        let at = self.index.read_i64(row * 8)?;
        if at == NULL_OFFSET {
            return Ok(Value::Null);
        }
        if at < 0 {
            return Err(ColumnError::Corruption(format!(
                "column '{}' row {row}: negative data offset {at}",
                self.name
            )));
        }
        let at = at as u64;
        let hb = self.header.bytes();
        let len = self.header.decode(&self.data.read_vec(at, hb)?)?;
        let payload = self.data.read_vec(at + hb as u64, len)?;

        Ok(match self.kind {
            ColumnKind::String => Value::Str(decode_utf16(&payload)?),
            _ => Value::Binary(payload),
        })
    }

    /// Appends the payload of `value` to the data file and points `row` at it.
    ///
    /// # Errors
    ///
    /// [`ColumnError::ValueTooLong`] when the payload exceeds the header
    /// width, [`ColumnError::TypeMismatch`] for a value of another kind.
    pub fn set(&self, row: u64, value: &Value, files: &mut FileTxState) -> Result<(), ColumnError> {
        let slot = row * 8;
        let payload = match (self.kind, value) {
            (_, Value::Null) => {
                self.index.write_i64(slot, NULL_OFFSET)?;
                files.append_offsets[self.index_id] = slot + 8;
                return Ok(());
            }
            (ColumnKind::String, Value::Str(s)) => encode_utf16(s),
            (ColumnKind::Binary, Value::Binary(b)) => b.clone(),
            (kind, other) => return Err(mismatch(&self.name, kind.name(), other)),
        };

        if payload.len() > self.header.max_len() {
            return Err(ColumnError::ValueTooLong {
                column: self.name.clone(),
                len: payload.len(),
                max: self.header.max_len(),
            });
        }

        let hb = self.header.bytes();
        let mut record = vec![0u8; hb + payload.len()];
        self.header.encode(payload.len(), &mut record)?;
        record[hb..].copy_from_slice(&payload);

        let at = files.append_offsets[self.data_id];
        self.data.write_bytes(at, &record)?;
        self.index.write_i64(slot, at as i64)?;

        files.append_offsets[self.data_id] = at + record.len() as u64;
        files.append_offsets[self.index_id] = slot + 8;
        Ok(())
    }
}
