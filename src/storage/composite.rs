//! Chunked, memory-mapped raw file.
//!
//! A [`CompositeFile`] divides its address space into `1 << bit_hint`
//! byte chunks. A chunk is mapped on first touch and cached in a growable
//! table. The table itself is an immutable `Arc<Vec<_>>` snapshot: growth
//! builds a new vector, populates the new slot, and only then publishes
//! it by swapping the `Arc` under a short write lock. Readers clone the
//! current snapshot and never observe a half-initialised slot.
//!
//! Chunk creation, file growth and `flush` are serialised by the file
//! mutex. Reads and writes against already-mapped chunks take no lock
//! beyond the momentary snapshot clone.
//!
//! Accesses that straddle a chunk boundary are split: the part that fits
//! in the current chunk is handled, then the remainder recurses with the
//! adjusted offset.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::{Mmap, MmapOptions, MmapRaw};
use tracing::{debug, trace};

use super::{FILE_HEADER_SIZE, StorageError, validate_bit_hint};

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Never grows, never writes. Chunks are mapped up to the current EOF.
    ReadOnly,
    /// Created if missing; grows in whole chunks.
    ReadWrite,
}

enum ChunkMap {
    ReadWrite(MmapRaw),
    ReadOnly(Mmap),
}

/// One mapped chunk.
struct Chunk {
    map: ChunkMap,
}

impl Chunk {
    fn len(&self) -> usize {
        match &self.map {
            ChunkMap::ReadWrite(m) => m.len(),
            ChunkMap::ReadOnly(m) => m.len(),
        }
    }

    fn read(&self, at: usize, dst: &mut [u8]) {
        debug_assert!(at + dst.len() <= self.len());
        let src = match &self.map {
            ChunkMap::ReadWrite(m) => m.as_ptr(),
            ChunkMap::ReadOnly(m) => m.as_ptr(),
        };
        // SAFETY: the caller has checked `at + dst.len() <= self.len()`, the
        // mapping lives as long as `self`, and `dst` is a distinct Rust
        // allocation so the ranges cannot overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(src.add(at), dst.as_mut_ptr(), dst.len());
        }
    }

    fn write(&self, at: usize, src: &[u8]) -> Result<(), StorageError> {
        match &self.map {
            ChunkMap::ReadWrite(m) => {
                debug_assert!(at + src.len() <= m.len());
                // SAFETY: bounds checked by the caller; the journal has a
                // single writer, and readers only consult bytes below their
                // snapshot's committed offsets, which the writer never
                // rewrites in place.
                unsafe {
                    std::ptr::copy_nonoverlapping(src.as_ptr(), m.as_mut_ptr().add(at), src.len());
                }
                Ok(())
            }
            ChunkMap::ReadOnly(_) => Err(StorageError::ReadOnly("mapped read-only".into())),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match &self.map {
            ChunkMap::ReadWrite(m) => m.flush(),
            ChunkMap::ReadOnly(_) => Ok(()),
        }
    }
}

type ChunkTable = Arc<Vec<Option<Arc<Chunk>>>>;

/// A raw file addressed by logical offset over lazily mapped chunks.
///
/// See the [module-level documentation](self) for the concurrency model.
pub struct CompositeFile {
    path: PathBuf,
    mode: FileMode,
    bit_hint: u32,
    chunk_size: u64,

    /// File handle; its lock also serialises chunk mapping and flush.
    file: Mutex<File>,

    /// Published chunk snapshot.
    table: RwLock<ChunkTable>,

    #[cfg(test)]
    fail_header_write: AtomicBool,
}

impl std::fmt::Debug for CompositeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("bit_hint", &self.bit_hint)
            .finish_non_exhaustive()
    }
}

macro_rules! typed_access {
    ($($read:ident, $write:ident, $ty:ty);* $(;)?) => {
        $(
            #[doc = concat!("Reads a little-endian `", stringify!($ty), "` at `offset`.")]
            pub fn $read(&self, offset: u64) -> Result<$ty, StorageError> {
                let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                self.read_bytes(offset, &mut bytes)?;
                Ok(<$ty>::from_le_bytes(bytes))
            }

            #[doc = concat!("Writes a little-endian `", stringify!($ty), "` at `offset`.")]
            pub fn $write(&self, offset: u64, value: $ty) -> Result<(), StorageError> {
                self.write_bytes(offset, &value.to_le_bytes())
            }
        )*
    };
}

impl CompositeFile {
    /// Opens (or, in [`FileMode::ReadWrite`], creates) a raw file.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidConfig`] if `bit_hint` is outside
    /// `[MIN_BIT_HINT, MAX_BIT_HINT]`; [`StorageError::Io`] if the file
    /// cannot be opened.
    pub fn open(path: impl AsRef<Path>, mode: FileMode, bit_hint: u32) -> Result<Self, StorageError> {
        validate_bit_hint(bit_hint)?;
        let path = path.as_ref().to_path_buf();

        let file = match mode {
            FileMode::ReadWrite => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?,
            FileMode::ReadOnly => OpenOptions::new().read(true).open(&path)?,
        };

        debug!(path = %path.display(), ?mode, bit_hint, "opened composite file");

        Ok(Self {
            path,
            mode,
            bit_hint,
            chunk_size: 1u64 << bit_hint,
            file: Mutex::new(file),
            table: RwLock::new(Arc::new(Vec::new())),
            #[cfg(test)]
            fail_header_write: AtomicBool::new(false),
        })
    }

    /// Path the file was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }

    /// Chunk size exponent: chunks are `1 << bit_hint` bytes.
    pub fn bit_hint(&self) -> u32 {
        self.bit_hint
    }

    /// Number of chunks currently mapped.
    pub fn mapped_chunks(&self) -> usize {
        self.table
            .read()
            .map(|t| t.iter().filter(|c| c.is_some()).count())
            .unwrap_or(0)
    }

    // --------------------------------------------------------------------------------------------
    // Append offset header
    // --------------------------------------------------------------------------------------------

    /// Reads the committed append offset from the file header.
    ///
    /// A file that is empty on disk reports `0`.
    pub fn append_offset(&self) -> Result<u64, StorageError> {
        if self.mode == FileMode::ReadOnly && self.disk_len()? < FILE_HEADER_SIZE {
            return Ok(0);
        }
        let mut bytes = [0u8; 8];
        self.read_physical(0, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Persists a new append offset into the file header.
    ///
    /// This is the per-file commit point: readers size their view of the
    /// file from this header.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadOnly`] on a read-only file.
    pub fn set_append_offset(&self, value: u64) -> Result<(), StorageError> {
        self.check_writable()?;
        self.injected_failure()?;
        self.write_physical(0, &value.to_le_bytes())
    }

    /// Consumes a pending [`fail_next_header_write`](Self::fail_next_header_write).
    #[cfg(test)]
    pub(crate) fn injected_failure(&self) -> Result<(), StorageError> {
        if self.fail_header_write.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("injected header write failure")));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    pub(crate) fn injected_failure(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Makes the next header write fail: either
    /// [`set_append_offset`](Self::set_append_offset) or, on an index key
    /// file, publishing a key block.
    #[cfg(test)]
    pub(crate) fn fail_next_header_write(&self) {
        self.fail_header_write.store(true, Ordering::SeqCst);
    }

    // --------------------------------------------------------------------------------------------
    // Byte-range access
    // --------------------------------------------------------------------------------------------

    /// Fills `dst` with the bytes at logical `offset`.
    ///
    /// Logical offsets start after the 8-byte header.
    ///
    /// # Errors
    ///
    /// [`StorageError::OutOfBounds`] when a read-only file ends before
    /// `offset + dst.len()`.
    pub fn read_bytes(&self, offset: u64, dst: &mut [u8]) -> Result<(), StorageError> {
        self.read_physical(offset + FILE_HEADER_SIZE, dst)
    }

    /// Writes `src` at logical `offset`, growing the file as needed.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadOnly`] on a read-only file, [`StorageError::Io`]
    /// if growing or mapping the file fails.
    pub fn write_bytes(&self, offset: u64, src: &[u8]) -> Result<(), StorageError> {
        self.check_writable()?;
        self.write_physical(offset + FILE_HEADER_SIZE, src)
    }

    /// Reads `len` bytes at logical `offset` into a new vector.
    pub fn read_vec(&self, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut out = vec![0u8; len];
        self.read_bytes(offset, &mut out)?;
        Ok(out)
    }

    typed_access! {
        read_i16, write_i16, i16;
        read_i32, write_i32, i32;
        read_i64, write_i64, i64;
        read_u64, write_u64, u64;
        read_f64, write_f64, f64;
        read_u8, write_u8, u8;
    }

    /// Reads one byte at `offset` as a bool; any non-zero byte is `true`.
    pub fn read_bool(&self, offset: u64) -> Result<bool, StorageError> {
        Ok(self.read_u8(offset)? != 0)
    }

    /// Writes `value` as `0x00` / `0x01` at `offset`.
    pub fn write_bool(&self, offset: u64, value: bool) -> Result<(), StorageError> {
        self.write_u8(offset, u8::from(value))
    }

    fn read_physical(&self, pos: u64, dst: &mut [u8]) -> Result<(), StorageError> {
        if dst.is_empty() {
            return Ok(());
        }
        let index = (pos >> self.bit_hint) as usize;
        let at = (pos & (self.chunk_size - 1)) as usize;
        let room = self.chunk_size as usize - at;
        let (head, tail) = dst.split_at_mut(room.min(dst.len()));

        let chunk = self.chunk(index, at + head.len(), pos)?;
        chunk.read(at, head);

        if tail.is_empty() {
            Ok(())
        } else {
            self.read_physical(pos + head.len() as u64, tail)
        }
    }

    fn write_physical(&self, pos: u64, src: &[u8]) -> Result<(), StorageError> {
        if src.is_empty() {
            return Ok(());
        }
        let index = (pos >> self.bit_hint) as usize;
        let at = (pos & (self.chunk_size - 1)) as usize;
        let room = self.chunk_size as usize - at;
        let (head, tail) = src.split_at(room.min(src.len()));

        let chunk = self.chunk(index, at + head.len(), pos)?;
        chunk.write(at, head)?;

        if tail.is_empty() {
            Ok(())
        } else {
            self.write_physical(pos + head.len() as u64, tail)
        }
    }

    // --------------------------------------------------------------------------------------------
    // Chunk table
    // --------------------------------------------------------------------------------------------

    /// Returns chunk `index`, mapping it if it is absent or shorter than `min_len`.
    fn chunk(&self, index: usize, min_len: usize, pos: u64) -> Result<Arc<Chunk>, StorageError> {
        if let Some(chunk) = self.published(index, min_len)? {
            return Ok(chunk);
        }
        self.map_chunk(index, min_len, pos)
    }

    fn published(&self, index: usize, min_len: usize) -> Result<Option<Arc<Chunk>>, StorageError> {
        let table = self
            .table
            .read()
            .map_err(|_| StorageError::Internal("chunk table lock poisoned".into()))?;
        Ok(match table.get(index) {
            Some(Some(chunk)) if chunk.len() >= min_len => Some(Arc::clone(chunk)),
            _ => None,
        })
    }

    fn map_chunk(&self, index: usize, min_len: usize, pos: u64) -> Result<Arc<Chunk>, StorageError> {
        let file = self.lock_file()?;

        // Another thread may have mapped it while we waited.
        if let Some(chunk) = self.published(index, min_len)? {
            return Ok(chunk);
        }

        let start = index as u64 * self.chunk_size;
        let map = match self.mode {
            FileMode::ReadWrite => {
                let needed = start + self.chunk_size;
                if file.metadata()?.len() < needed {
                    file.set_len(needed)?;
                }
                let raw = MmapOptions::new()
                    .offset(start)
                    .len(self.chunk_size as usize)
                    .map_raw(&*file)?;
                ChunkMap::ReadWrite(raw)
            }
            FileMode::ReadOnly => {
                let file_len = file.metadata()?.len();
                let available = file_len.saturating_sub(start).min(self.chunk_size) as usize;
                if available < min_len {
                    return Err(StorageError::OutOfBounds {
                        offset: pos.saturating_sub(FILE_HEADER_SIZE),
                        len: min_len,
                        path: self.path.display().to_string(),
                    });
                }
                // SAFETY: journal files are only ever grown, never truncated,
                // while mapped; the mapped range lies within the current EOF.
                let map = unsafe {
                    MmapOptions::new()
                        .offset(start)
                        .len(available)
                        .map(&*file)?
                };
                ChunkMap::ReadOnly(map)
            }
        };

        let chunk = Arc::new(Chunk { map });
        self.publish(index, Arc::clone(&chunk))?;
        trace!(path = %self.path.display(), index, len = chunk.len(), "mapped chunk");
        Ok(chunk)
    }

    /// Swaps in a new table snapshot containing `chunk` at `index`.
    fn publish(&self, index: usize, chunk: Arc<Chunk>) -> Result<(), StorageError> {
        let mut table = self
            .table
            .write()
            .map_err(|_| StorageError::Internal("chunk table lock poisoned".into()))?;
        let mut next: Vec<Option<Arc<Chunk>>> = table.as_ref().clone();
        if next.len() <= index {
            next.resize(index + 1, None);
        }
        next[index] = Some(chunk);
        *table = Arc::new(next);
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Durability and lifecycle
    // --------------------------------------------------------------------------------------------

    /// Flushes every mapped chunk and the file metadata to disk.
    ///
    /// A no-op on read-only files.
    pub fn flush(&self) -> Result<(), StorageError> {
        if self.mode == FileMode::ReadOnly {
            return Ok(());
        }
        let file = self.lock_file()?;
        let snapshot = self
            .table
            .read()
            .map_err(|_| StorageError::Internal("chunk table lock poisoned".into()))?
            .clone();
        for chunk in snapshot.iter().flatten() {
            chunk.flush()?;
        }
        file.sync_all()?;
        Ok(())
    }

    /// Drops every mapping. Chunks still referenced by in-flight reads
    /// stay alive until those reads finish; later accesses remap lazily.
    pub fn release(&self) -> Result<(), StorageError> {
        let _file = self.lock_file()?;
        let mut table = self
            .table
            .write()
            .map_err(|_| StorageError::Internal("chunk table lock poisoned".into()))?;
        *table = Arc::new(Vec::new());
        Ok(())
    }

    fn disk_len(&self) -> Result<u64, StorageError> {
        Ok(self.lock_file()?.metadata()?.len())
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        match self.mode {
            FileMode::ReadWrite => Ok(()),
            FileMode::ReadOnly => Err(StorageError::ReadOnly(self.path.display().to_string())),
        }
    }

    fn lock_file(&self) -> Result<MutexGuard<'_, File>, StorageError> {
        self.file
            .lock()
            .map_err(|_| StorageError::Internal("file lock poisoned".into()))
    }
}
