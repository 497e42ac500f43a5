//! In-memory storage for tests and crash simulation.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::fileset::FileSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Handles created from the same [`InMemoryFileSet`] entry (or via
/// [`InMemoryBackend::handle`]) share one buffer, so "reopening" a file
/// observes everything written through earlier handles. That makes crash
/// scenarios easy to stage: keep the file set alive, drop the log, truncate
/// a buffer mid-record, reopen.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns another handle onto the same buffer.
    #[must_use]
    pub fn handle(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Returns a copy of all data in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        // No pending writes in memory.
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, current_size
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

/// An in-memory set of numbered log files.
///
/// Clone the set (cheap, shared) and hand one clone to the log; keep the
/// other to inspect or mutilate files after the log is dropped.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFileSet {
    files: Arc<RwLock<BTreeMap<u64, InMemoryBackend>>>,
}

impl InMemoryFileSet {
    /// Creates a new empty file set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSet for InMemoryFileSet {
    fn list(&self) -> StorageResult<Vec<u64>> {
        Ok(self.files.read().keys().copied().collect())
    }

    fn open(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let files = self.files.read();
        let backend = files
            .get(&number)
            .ok_or(StorageError::NoSuchFile { number })?;
        Ok(Box::new(backend.handle()))
    }

    fn create(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let mut files = self.files.write();
        let backend = files.entry(number).or_default();
        Ok(Box::new(backend.handle()))
    }

    fn remove(&self, number: u64) -> StorageResult<()> {
        let mut files = self.files.write();
        if files.remove(&number).is_none() {
            return Err(StorageError::NoSuchFile { number });
        }
        Ok(())
    }
}
