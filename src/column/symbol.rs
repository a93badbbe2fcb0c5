use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{ColumnError, decode_utf16, encode_utf16, mismatch};
use crate::encoding::HeaderWidth;
use crate::index::{HashIndex, KeyBlockState};
use crate::schema::Value;
use crate::storage::CompositeFile;
use crate::tx::{FileTxState, SymbolTxData};

/// Key stored for a null symbol.
pub const NULL_KEY: i32 = -1;

/// Upper bound on decode cache slots per column.
const MAX_CACHE_SLOTS: u64 = 4096;

/// Polynomial rolling hash over UTF-16 code units, reduced to a bucket.
///
/// Writers and readers must agree on this function and `capacity`.
pub fn symbol_hash(value: &str, capacity: u64) -> u64 {
    let mut h: i32 = 0;
    for unit in value.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    (h & i32::MAX) as u64 % capacity.max(1)
}

// ------------------------------------------------------------------------------------------------
// SymbolTable
// ------------------------------------------------------------------------------------------------

/// Journal-wide dictionary of one symbol column.
///
/// Files: `.symd` (length-prefixed UTF-16 values), `.symi` (8-byte offset
/// per key) and the `.symr.k`/`.symr.r` hash index from bucket to keys.
#[derive(Debug)]
pub struct SymbolTable {
    name: String,
    table_id: usize,
    capacity: u64,
    header: HeaderWidth,
    data: Arc<CompositeFile>,
    data_id: usize,
    offsets: Arc<CompositeFile>,
    offsets_id: usize,
    dedup: HashIndex,
}

impl SymbolTable {
    /// Assembles a table from its opened files.
    ///
    /// `capacity` is the dedup hash bucket count, normally the column's
    /// distinct-count hint.
    pub fn new(
        name: &str,
        table_id: usize,
        capacity: u64,
        header: HeaderWidth,
        data: (Arc<CompositeFile>, usize),
        offsets: (Arc<CompositeFile>, usize),
        dedup: HashIndex,
    ) -> Self {
        Self {
            name: name.to_string(),
            table_id,
            capacity: capacity.max(1),
            header,
            data: data.0,
            data_id: data.1,
            offsets: offsets.0,
            offsets_id: offsets.1,
            dedup,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position among the journal's symbol tables; indexes key counts.
    pub fn table_id(&self) -> usize {
        self.table_id
    }

    /// Dedup hash bucket count.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Hash index from value bucket to the keys hashed into it.
    pub fn dedup(&self) -> &HashIndex {
        &self.dedup
    }

    /// Files of this table with their ids.
    pub fn files(&self) -> [(usize, &Arc<CompositeFile>); 4] {
        [
            (self.data_id, &self.data),
            (self.offsets_id, &self.offsets),
            (self.dedup.key_file_id(), self.dedup.key_file()),
            (self.dedup.row_file_id(), self.dedup.row_file()),
        ]
    }

    /// Seeds the transaction state from the committed files.
    ///
    /// `key_count` and `pointer` come from the tx record; the header copies
    /// may run ahead of it after an interrupted commit.
    pub fn begin(&self, tx: &mut SymbolTxData, key_count: u64, pointer: Option<u64>) -> Result<(), ColumnError> {
        tx.key_counts[self.table_id] = key_count;
        tx.files.append_offsets[self.data_id] = self.data.append_offset()?;
        tx.files.append_offsets[self.offsets_id] = key_count * 8;
        self.dedup.begin(&mut tx.files, pointer)?;
        Ok(())
    }

    /// Dictionary value of `key`.
    ///
    /// # Errors
    ///
    /// [`ColumnError::Corruption`] if the key's offset entry is negative;
    /// storage errors if `key` lies past the written entries.
    pub fn value(&self, key: u64) -> Result<String, ColumnError> {
        let at = self.offsets.read_i64(key * 8)?;
        if at < 0 {
            return Err(ColumnError::Corruption(format!(
                "symbol table '{}' key {key}: bad offset {at}",
                self.name
            )));
        }
        let at = at as u64;
        let hb = self.header.bytes();
        let len = self.header.decode(&self.data.read_vec(at, hb)?)?;
        decode_utf16(&self.data.read_vec(at + hb as u64, len)?)
    }

    /// Key of `value` among the first `key_count` keys, if present.
    pub fn lookup(&self, value: &str, key_count: u64, kb: &KeyBlockState) -> Result<Option<u64>, ColumnError> {
        let bucket = symbol_hash(value, self.capacity);
        for key in self.dedup.values(bucket, key_count, kb)? {
            if self.value(key)? == value {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Returns the key of `value`, adding it to the dictionary if new.
    ///
    /// New keys are dense: the next key is the current key count. The
    /// addition only becomes durable when the symbol store commits `tx`.
    ///
    /// # Errors
    ///
    /// [`ColumnError::ValueTooLong`] if `value` exceeds the column's
    /// maximum size.
    pub fn put(&self, value: &str, tx: &mut SymbolTxData) -> Result<u64, ColumnError> {
        let key_count = tx.key_counts[self.table_id];
        let kb = tx.files.key_blocks[self.dedup.slot()];
        if let Some(key) = self.lookup(value, key_count, &kb)? {
            return Ok(key);
        }

        let key = key_count;
        if key > i32::MAX as u64 {
            return Err(ColumnError::Corruption(format!(
                "symbol table '{}' exhausted the key space",
                self.name
            )));
        }

        let payload = encode_utf16(value);
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

        let files = &mut tx.files;
        let at = files.append_offsets[self.data_id];
        self.data.write_bytes(at, &record)?;
        self.offsets.write_i64(key * 8, at as i64)?;
        files.append_offsets[self.data_id] = at + record.len() as u64;
        files.append_offsets[self.offsets_id] = (key + 1) * 8;

        let bucket = symbol_hash(value, self.capacity);
        self.dedup.add(bucket, key, files)?;

        tx.key_counts[self.table_id] = key + 1;
        tx.dirty = true;
        trace!(table = %self.name, key, bucket, "added symbol");
        Ok(key)
    }

    /// Every dictionary value among the first `key_count` keys, in key order.
    pub fn values(&self, key_count: u64) -> Result<Vec<String>, ColumnError> {
        (0..key_count).map(|k| self.value(k)).collect()
    }
}

// ------------------------------------------------------------------------------------------------
// SymbolColumn
// ------------------------------------------------------------------------------------------------

type CacheSlot = Option<(u64, Arc<str>)>;

/// Per-partition symbol field: a 4-byte key per row (`.d`) and, when
/// indexed, a key → local rows hash index (`.k`/`.r`).
#[derive(Debug)]
pub struct SymbolColumn {
    name: String,
    table: Arc<SymbolTable>,
    keys: Arc<CompositeFile>,
    keys_id: usize,
    index: Option<HashIndex>,
    cache: Mutex<Vec<CacheSlot>>,
}

impl SymbolColumn {
    /// Binds a partition's key file (and optional inverted index) to the
    /// journal-wide `table`.
    pub fn new(
        name: &str,
        table: Arc<SymbolTable>,
        keys: (Arc<CompositeFile>, usize),
        index: Option<HashIndex>,
    ) -> Self {
        let slots = table.capacity().min(MAX_CACHE_SLOTS) as usize;
        Self {
            name: name.to_string(),
            table,
            keys: keys.0,
            keys_id: keys.1,
            index,
            cache: Mutex::new(vec![None; slots]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dictionary shared with every partition.
    pub fn table(&self) -> &Arc<SymbolTable> {
        &self.table
    }

    pub fn keys_id(&self) -> usize {
        self.keys_id
    }

    /// Inverted index from key to local rows, when the column is indexed.
    pub fn index(&self) -> Option<&HashIndex> {
        self.index.as_ref()
    }

    /// Dictionary key of `row`, or `None` for null.
    pub fn key(&self, row: u64) -> Result<Option<u64>, ColumnError> {
        let key = self.keys.read_i32(row * 4)?;
        match key {
            NULL_KEY => Ok(None),
            k if k < 0 => Err(ColumnError::Corruption(format!(
                "column '{}' row {row}: bad symbol key {k}",
                self.name
            ))),
            k => Ok(Some(k as u64)),
        }
    }

    /// Decoded value of `row`, or `Null`.
    pub fn get(&self, row: u64) -> Result<Value, ColumnError> {
        match self.key(row)? {
            None => Ok(Value::Null),
            Some(key) => Ok(Value::Str(self.decode(key)?.to_string())),
        }
    }

    /// Resolves `key` through the slot cache, falling back to the dictionary.
    fn decode(&self, key: u64) -> Result<Arc<str>, ColumnError> {
        let slots = {
            let cache = self.lock_cache()?;
            if cache.is_empty() {
                return Ok(Arc::from(self.table.value(key)?));
            }
            let slot = (key % cache.len() as u64) as usize;
            if let Some((cached, value)) = &cache[slot] {
                if *cached == key {
                    return Ok(Arc::clone(value));
                }
            }
            cache.len()
        };

        let value: Arc<str> = Arc::from(self.table.value(key)?);
        let slot = (key % slots as u64) as usize;
        self.lock_cache()?[slot] = Some((key, Arc::clone(&value)));
        Ok(value)
    }

    /// Stores the key of `value` at `row`, interning it first.
    ///
    /// Indexed columns also append `row` to the key's inverted list.
    ///
    /// # Errors
    ///
    /// [`ColumnError::TypeMismatch`] for a non-string value, plus the
    /// errors of [`SymbolTable::put`].
    pub fn set(
        &self,
        row: u64,
        value: &Value,
        files: &mut FileTxState,
        symbols: &mut SymbolTxData,
    ) -> Result<(), ColumnError> {
        let key = match value {
            Value::Null => None,
            Value::Str(s) => Some(self.table.put(s, symbols)?),
            other => return Err(mismatch(&self.name, "symbol", other)),
        };

        let stored = match key {
            Some(k) => k as i32,
            None => NULL_KEY,
        };
        if let (Some(k), Value::Str(s)) = (key, value) {
            self.remember(k, s)?;
        }
        self.keys.write_i32(row * 4, stored)?;
        files.append_offsets[self.keys_id] = row * 4 + 4;

        if let (Some(index), Some(key)) = (&self.index, key) {
            index.add(key, row, files)?;
        }
        Ok(())
    }

    /// Local rows holding `value`, newest first, below `row_count`.
    ///
    /// A value missing from the dictionary yields no rows.
    ///
    /// # Errors
    ///
    /// [`ColumnError::NotIndexed`] when the column has no inverted index.
    pub fn rows(
        &self,
        value: &str,
        row_count: u64,
        files: &FileTxState,
        symbols: &SymbolTxData,
    ) -> Result<Vec<u64>, ColumnError> {
        let index = self
            .index
            .as_ref()
            .ok_or_else(|| ColumnError::NotIndexed(self.name.clone()))?;
        let Some(key) = self.table.lookup(
            value,
            symbols.key_counts[self.table.table_id()],
            &symbols.files.key_blocks[self.table.dedup().slot()],
        )?
        else {
            return Ok(Vec::new());
        };
        Ok(index.values(key, row_count, &files.key_blocks[index.slot()])?)
    }

    /// Keys freed by a rollback are handed out again, so every write
    /// overwrites the slot of the key it stores.
    fn remember(&self, key: u64, value: &str) -> Result<(), ColumnError> {
        let mut cache = self.lock_cache()?;
        if cache.is_empty() {
            return Ok(());
        }
        let slot = (key % cache.len() as u64) as usize;
        let fresh = match &cache[slot] {
            Some((cached, v)) => *cached != key || v.as_ref() != value,
            None => true,
        };
        if fresh {
            cache[slot] = Some((key, Arc::from(value)));
        }
        Ok(())
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, Vec<CacheSlot>>, ColumnError> {
        self.cache
            .lock()
            .map_err(|_| ColumnError::Corruption("symbol cache lock poisoned".into()))
    }
}
