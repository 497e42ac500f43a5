//! Numbered-file-set trait for the rotating log.

use crate::backend::StorageBackend;
use crate::error::StorageResult;

/// A set of monotonically numbered append-only files.
///
/// The write-ahead log rotates across fixed-maximum-size files; this trait
/// is the seam between that rotation logic and the medium holding the
/// files. Numbers start at 0, increase monotonically, and are never reused.
///
/// # Implementors
///
/// - [`super::DirectoryFileSet`] - files in a locked log directory
/// - [`super::InMemoryFileSet`] - shared buffers for tests
pub trait FileSet: Send + Sync {
    /// Returns the numbers of all existing files, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the set cannot be enumerated.
    fn list(&self) -> StorageResult<Vec<u64>>;

    /// Opens an existing file.
    ///
    /// Multiple handles to the same file observe the same bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NoSuchFile`] if the file does not
    /// exist.
    fn open(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>>;

    /// Creates a new empty file and returns a handle to it.
    ///
    /// For durable implementations the containing directory is synced so
    /// the new file survives a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    fn create(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>>;

    /// Removes a file from the set.
    ///
    /// Used by checkpointing to reclaim log files wholly below the
    /// checkpoint anchor. Removing a missing file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be removed.
    fn remove(&self, number: u64) -> StorageResult<()>;
}
