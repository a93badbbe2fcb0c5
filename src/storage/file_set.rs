use std::path::Path;
use std::sync::Arc;

use super::{CompositeFile, FileMode, StorageError};

/// The raw files of one partition (or of the symbol store), numbered in
/// the order they were opened.
///
/// A file's id is its slot in [`FileTxState::append_offsets`], so a
/// transaction can track every file of a partition with one flat vector.
/// Ids are never reused or reordered while the set is alive; reopening a
/// partition in the same order reproduces the same numbering.
///
/// [`FileTxState::append_offsets`]: crate::tx::FileTxState::append_offsets
#[derive(Debug, Default)]
pub struct FileSet {
    files: Vec<Arc<CompositeFile>>,
}

impl FileSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path` and assigns it the next id.
    ///
    /// Returns the shared handle together with its id.
    ///
    /// # Errors
    ///
    /// Propagates [`CompositeFile::open`] failures; the set is unchanged
    /// when opening fails.
    pub fn open(
        &mut self,
        path: impl AsRef<Path>,
        mode: FileMode,
        bit_hint: u32,
    ) -> Result<(Arc<CompositeFile>, usize), StorageError> {
        let file = Arc::new(CompositeFile::open(path, mode, bit_hint)?);
        let id = self.files.len();
        self.files.push(Arc::clone(&file));
        Ok((file, id))
    }

    /// Number of files, which is also the next id to be assigned.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// `true` before the first [`open`](Self::open).
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File with the given id.
    pub fn get(&self, id: usize) -> Option<&Arc<CompositeFile>> {
        self.files.get(id)
    }

    /// `(id, file)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<CompositeFile>)> {
        self.files.iter().enumerate()
    }

    /// Flushes every file to disk.
    ///
    /// # Errors
    ///
    /// Stops at the first file that fails to flush.
    pub fn flush_all(&self) -> Result<(), StorageError> {
        for file in &self.files {
            file.flush()?;
        }
        Ok(())
    }

    /// Unmaps every file; the handles stay usable and remap on next access.
    ///
    /// # Errors
    ///
    /// Stops at the first file that fails to release.
    pub fn release_all(&self) -> Result<(), StorageError> {
        for file in &self.files {
            file.release()?;
        }
        Ok(())
    }
}
