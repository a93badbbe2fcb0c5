//! # Journal schema
//!
//! Describes the columns of a journal, the designated timestamp column,
//! and the dynamic [`Value`] representation rows travel in. Struct
//! binding lives in [`record`]: a [`RecordMapping`] is resolved against
//! the schema once and then reused for every append and read.

pub mod record;


pub use record::{BoundMapping, FieldBinding, RecordMapping};

use std::collections::HashSet;

use thiserror::Error;

/// Errors raised while building a schema or converting values.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The schema definition is unusable.
    #[error("invalid schema: {0}")]
    Invalid(String),

    /// A column name or index does not exist.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A value or typed accessor does not match the column kind.
    #[error("type mismatch on column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A `Value` conversion failed outside any column context.
    #[error("value mismatch: expected {expected}, found {found}")]
    ValueMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

// ------------------------------------------------------------------------------------------------
// Column kinds
// ------------------------------------------------------------------------------------------------

/// The closed set of column encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Byte,
    Bool,
    Int16,
    Int32,
    Int64,
    Double,
    /// Epoch milliseconds stored as `i64`.
    DateTime,
    String,
    Symbol,
    Binary,
}

impl ColumnKind {
    /// Byte width of a fixed-width kind, `None` for variable-length kinds.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ColumnKind::Byte | ColumnKind::Bool => Some(1),
            ColumnKind::Int16 => Some(2),
            ColumnKind::Int32 => Some(4),
            ColumnKind::Int64 | ColumnKind::Double | ColumnKind::DateTime => Some(8),
            ColumnKind::String | ColumnKind::Symbol | ColumnKind::Binary => None,
        }
    }

    /// True for kinds stored one slot per row.
    pub fn is_fixed(self) -> bool {
        self.fixed_width().is_some()
    }

    /// Lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ColumnKind::Byte => "byte",
            ColumnKind::Bool => "bool",
            ColumnKind::Int16 => "int16",
            ColumnKind::Int32 => "int32",
            ColumnKind::Int64 => "int64",
            ColumnKind::Double => "double",
            ColumnKind::DateTime => "datetime",
            ColumnKind::String => "string",
            ColumnKind::Symbol => "symbol",
            ColumnKind::Binary => "binary",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Column definition
// ------------------------------------------------------------------------------------------------

/// Definition of one schema field plus the sizing hints storage uses.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,

    /// Maximum value size: characters for strings/symbols, bytes for binary.
    /// Selects the length-header width.
    pub max_size: usize,

    /// Expected average value size, used for chunk sizing.
    pub avg_size: usize,

    /// Expected number of distinct values (symbol hash capacity).
    pub distinct_count_hint: usize,

    /// Symbol columns only: maintain a per-partition value → rows index.
    pub indexed: bool,

    /// Fixed-width columns only: track nulls in the row bitset.
    pub nullable: bool,
}

impl ColumnDef {
    /// A column with default hints: `max_size` 255, `avg_size` 16 and
    /// 256 distinct values. Not indexed and not nullable.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_size: 255,
            avg_size: 16,
            distinct_count_hint: 256,
            indexed: false,
            nullable: false,
        }
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn avg_size(mut self, avg_size: usize) -> Self {
        self.avg_size = avg_size;
        self
    }

    pub fn distinct(mut self, distinct_count_hint: usize) -> Self {
        self.distinct_count_hint = distinct_count_hint;
        self
    }

    /// Valid on symbol columns only; [`JournalSchema::new`] checks it.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Valid on fixed-width columns only.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Maximum payload in bytes for variable-length kinds.
    pub fn max_payload_bytes(&self) -> usize {
        match self.kind {
            // UTF-16 code units.
            ColumnKind::String | ColumnKind::Symbol => self.max_size.saturating_mul(2),
            _ => self.max_size,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Partitioning
// ------------------------------------------------------------------------------------------------

/// Time granularity of journal partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionBy {
    Day,
    Month,
    Year,
    /// A single unbounded partition.
    None,
}

// ------------------------------------------------------------------------------------------------
// Schema
// ------------------------------------------------------------------------------------------------

/// Validated, immutable description of a journal's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalSchema {
    columns: Vec<ColumnDef>,
    timestamp: usize,
    /// Column indexes tracked by the null bitset, in bit order.
    nullable: Vec<usize>,
}

impl JournalSchema {
    /// Builds a schema, validating names, kinds and the timestamp column.
    pub fn new(columns: Vec<ColumnDef>, timestamp_column: &str) -> Result<Self, SchemaError> {
        if columns.is_empty() {
            return Err(SchemaError::Invalid("schema has no columns".into()));
        }

        let mut seen = HashSet::new();
        for col in &columns {
            if col.name.is_empty() {
                return Err(SchemaError::Invalid("column name must not be empty".into()));
            }
            if col.name.starts_with('_') {
                return Err(SchemaError::Invalid(format!(
                    "column name '{}' uses the reserved '_' prefix",
                    col.name
                )));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::Invalid(format!("duplicate column '{}'", col.name)));
            }
            if col.indexed && col.kind != ColumnKind::Symbol {
                return Err(SchemaError::Invalid(format!(
                    "column '{}': only symbol columns can be indexed",
                    col.name
                )));
            }
            if col.nullable && !col.kind.is_fixed() {
                return Err(SchemaError::Invalid(format!(
                    "column '{}': nullable applies to fixed-width columns only",
                    col.name
                )));
            }
            if col.kind == ColumnKind::Symbol && col.distinct_count_hint == 0 {
                return Err(SchemaError::Invalid(format!(
                    "symbol column '{}' needs a non-zero distinct count hint",
                    col.name
                )));
            }
        }

        let timestamp = columns
            .iter()
            .position(|c| c.name == timestamp_column)
            .ok_or_else(|| SchemaError::UnknownColumn(timestamp_column.to_string()))?;
        let ts = &columns[timestamp];
        if !matches!(ts.kind, ColumnKind::Int64 | ColumnKind::DateTime) || ts.nullable {
            return Err(SchemaError::Invalid(format!(
                "timestamp column '{}' must be a non-nullable int64 or datetime",
                ts.name
            )));
        }

        let nullable = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.nullable)
            .map(|(i, _)| i)
            .collect();

        Ok(Self {
            columns,
            timestamp,
            nullable,
        })
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column at `index`, or [`SchemaError::UnknownColumn`].
    pub fn column(&self, index: usize) -> Result<&ColumnDef, SchemaError> {
        self.columns
            .get(index)
            .ok_or_else(|| SchemaError::UnknownColumn(format!("#{index}")))
    }

    /// Position of the column called `name`, or [`SchemaError::UnknownColumn`].
    pub fn column_index(&self, name: &str) -> Result<usize, SchemaError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))
    }

    /// Index of the designated timestamp column.
    pub fn timestamp_index(&self) -> usize {
        self.timestamp
    }

    /// Nullable fixed-width columns in bitset order.
    pub fn nullable_columns(&self) -> &[usize] {
        &self.nullable
    }

    /// Position of `column` in the null bitset.
    pub fn null_bit(&self, column: usize) -> Option<usize> {
        self.nullable.iter().position(|&c| c == column)
    }

    /// Symbol columns in schema order; the position is the symbol table id.
    pub fn symbol_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Symbol)
            .map(|(i, _)| i)
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// Values
// ------------------------------------------------------------------------------------------------

/// One field of a row in dynamic form.
///
/// Symbol and string columns both read back as [`Value::Str`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Byte(u8),
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
    DateTime(i64),
    Str(String),
    Binary(Vec<u8>),
}

/// A full row in schema column order.
pub type Row = Vec<Value>;

macro_rules! value_into {
    ($($fn:ident => $ty:ty, $expected:literal, $($pat:pat => $out:expr),+);* $(;)?) => {
        $(
            #[doc = concat!("Unwraps a `", $expected, "` value, or fails with [`SchemaError::ValueMismatch`].")]
            pub fn $fn(self) -> Result<$ty, SchemaError> {
                match self {
                    $($pat => Ok($out),)+
                    other => Err(SchemaError::ValueMismatch {
                        expected: $expected,
                        found: other.type_name(),
                    }),
                }
            }
        )*
    };
}

impl Value {
    /// Lowercase kind name; `"null"` for [`Value::Null`].
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Byte(_) => "byte",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Double(_) => "double",
            Value::DateTime(_) => "datetime",
            Value::Str(_) => "string",
            Value::Binary(_) => "binary",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value can be stored in a column of `kind`.
    pub fn fits(&self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (Value::Null, _)
                | (Value::Byte(_), ColumnKind::Byte)
                | (Value::Bool(_), ColumnKind::Bool)
                | (Value::Int16(_), ColumnKind::Int16)
                | (Value::Int32(_), ColumnKind::Int32)
                | (Value::Int64(_), ColumnKind::Int64)
                | (Value::Int64(_), ColumnKind::DateTime)
                | (Value::DateTime(_), ColumnKind::DateTime)
                | (Value::DateTime(_), ColumnKind::Int64)
                | (Value::Double(_), ColumnKind::Double)
                | (Value::Str(_), ColumnKind::String)
                | (Value::Str(_), ColumnKind::Symbol)
                | (Value::Binary(_), ColumnKind::Binary)
        )
    }

    value_into! {
        into_u8 => u8, "byte", Value::Byte(v) => v;
        into_bool => bool, "bool", Value::Bool(v) => v;
        into_i16 => i16, "int16", Value::Int16(v) => v;
        into_i32 => i32, "int32", Value::Int32(v) => v;
        into_i64 => i64, "int64", Value::Int64(v) => v, Value::DateTime(v) => v;
        into_f64 => f64, "double", Value::Double(v) => v;
        into_string => String, "string", Value::Str(v) => v;
        into_opt_string => Option<String>, "string", Value::Str(v) => Some(v), Value::Null => None;
        into_bytes => Vec<u8>, "binary", Value::Binary(v) => v;
        into_opt_bytes => Option<Vec<u8>>, "binary", Value::Binary(v) => Some(v), Value::Null => None;
    }
}
