//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level append-only byte store.
///
/// Backends are **opaque**: they provide reads, appends, and durability
/// control, and nothing else. The log kernel owns all record framing;
/// backends never interpret the bytes they hold.
///
/// # Invariants
///
/// - `append` returns the offset where the data landed
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes buffered writes to the OS; `sync` makes them durable
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - for tests and crash simulation
/// - [`super::FileBackend`] - for persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs data and metadata to durable media.
    ///
    /// After this returns successfully, all previously appended data
    /// survives power loss.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes.
    ///
    /// This is the offset where the next `append` will write.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the storage to the given size.
    ///
    /// Used to cut a torn record off the log tail after a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}
