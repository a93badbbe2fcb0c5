//! Static binding between a user record type and a journal schema.
//!
//! A [`RecordMapping`] lists `(column name, kind, getter, setter)` entries.
//! [`RecordMapping::bind`] resolves every name to a column index against a
//! concrete schema and checks kinds once; the resulting [`BoundMapping`]
//! converts records to rows and back with no further lookups.

use super::{ColumnKind, JournalSchema, Row, SchemaError, Value};

/// Reads one field of `R` as a column value.
pub type Getter<R> = fn(&R) -> Value;
/// Writes a column value into one field of `R`.
pub type Setter<R> = fn(&mut R, Value) -> Result<(), SchemaError>;

/// One field of a record type.
pub struct FieldBinding<R> {
    /// Schema column name.
    pub column: &'static str,
    /// Kind the field converts to; must match the column.
    pub kind: ColumnKind,
    pub get: Getter<R>,
    pub set: Setter<R>,
}

impl<R> Clone for FieldBinding<R> {
    fn clone(&self) -> Self {
        Self {
            column: self.column,
            kind: self.kind,
            get: self.get,
            set: self.set,
        }
    }
}

/// Unresolved list of field bindings for `R`.
pub struct RecordMapping<R> {
    fields: Vec<FieldBinding<R>>,
}

impl<R> Default for RecordMapping<R> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<R> RecordMapping<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field bound to the column called `column`.
    ///
    /// Nothing is checked until [`bind`](Self::bind).
    pub fn field(mut self, column: &'static str, kind: ColumnKind, get: Getter<R>, set: Setter<R>) -> Self {
        self.fields.push(FieldBinding { column, kind, get, set });
        self
    }

    /// Resolves the mapping against `schema`.
    ///
    /// Every field must name an existing column of the same kind, no column
    /// may be bound twice, and the timestamp column must be bound.
    pub fn bind(self, schema: &JournalSchema) -> Result<BoundMapping<R>, SchemaError> {
        let mut slots: Vec<(usize, FieldBinding<R>)> = Vec::with_capacity(self.fields.len());

        for field in self.fields {
            let index = schema.column_index(field.column)?;
            let def = schema.column(index)?;
            if def.kind != field.kind {
                return Err(SchemaError::TypeMismatch {
                    column: def.name.clone(),
                    expected: def.kind.name(),
                    found: field.kind.name(),
                });
            }
            if slots.iter().any(|(i, _)| *i == index) {
                return Err(SchemaError::Invalid(format!("column '{}' bound twice", def.name)));
            }
            slots.push((index, field));
        }

        if !slots.iter().any(|(i, _)| *i == schema.timestamp_index()) {
            return Err(SchemaError::Invalid(format!(
                "record mapping does not bind timestamp column '{}'",
                schema.columns()[schema.timestamp_index()].name
            )));
        }

        Ok(BoundMapping {
            slots,
            width: schema.len(),
        })
    }
}

/// A mapping resolved against one schema.
pub struct BoundMapping<R> {
    slots: Vec<(usize, FieldBinding<R>)>,
    width: usize,
}

impl<R> BoundMapping<R> {
    /// Checks that `schema` has the layout this mapping was bound against.
    ///
    /// # Errors
    ///
    /// [`SchemaError::Invalid`] when the column count differs or a bound
    /// column sits at another index, [`SchemaError::TypeMismatch`] when a
    /// bound column changed kind.
    pub fn check_schema(&self, schema: &JournalSchema) -> Result<(), SchemaError> {
        if schema.len() != self.width {
            return Err(SchemaError::Invalid(format!(
                "mapping bound to {} columns, schema has {}",
                self.width,
                schema.len()
            )));
        }
        for (index, field) in &self.slots {
            let def = schema.column(*index)?;
            if def.name != field.column {
                return Err(SchemaError::Invalid(format!(
                    "mapping expects column '{}' at #{index}, schema has '{}'",
                    field.column, def.name
                )));
            }
            if def.kind != field.kind {
                return Err(SchemaError::TypeMismatch {
                    column: def.name.clone(),
                    expected: def.kind.name(),
                    found: field.kind.name(),
                });
            }
        }
        Ok(())
    }

    /// Builds a full row; unbound columns are `Null`.
    pub fn to_row(&self, record: &R) -> Row {
        let mut row = vec![Value::Null; self.width];
        for (index, field) in &self.slots {
            row[*index] = (field.get)(record);
        }
        row
    }

    /// Populates a default `R` from `row`.
    pub fn from_row(&self, row: Row) -> Result<R, SchemaError>
    where
        R: Default,
    {
        if row.len() != self.width {
            return Err(SchemaError::Invalid(format!(
                "row has {} values, schema has {} columns",
                row.len(),
                self.width
            )));
        }
        let mut record = R::default();
        let mut row: Vec<Option<Value>> = row.into_iter().map(Some).collect();
        for (index, field) in &self.slots {
            let value = row[*index].take().unwrap_or(Value::Null);
            (field.set)(&mut record, value).map_err(|e| match e {
                SchemaError::ValueMismatch { expected, found } => SchemaError::TypeMismatch {
                    column: field.column.to_string(),
                    expected,
                    found,
                },
                other => other,
            })?;
        }
        Ok(record)
    }

    /// Column indices the mapping writes, in field order.
    pub fn columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots.iter().map(|(i, _)| *i)
    }
}
