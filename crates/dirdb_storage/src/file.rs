//! File-based storage: a persistent backend and the locked log directory.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::fileset::FileSet;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Advisory lock file guarding a log directory.
const LOCK_FILE: &str = "LOCK";

/// Name of a numbered log file.
fn log_file_name(number: u64) -> String {
    format!("wal-{number:010}.log")
}

/// A file-based storage backend.
///
/// Data survives process restarts. `flush()` pushes buffered writes to the
/// OS; `sync()` calls `File::sync_all` so the bytes survive power loss.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileInner { file, size }),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        inner.file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let offset = inner.size;

        if data.is_empty() {
            return Ok(offset);
        }

        inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_all(data)?;
        inner.size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.lock().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut inner = self.inner.lock();

        if new_size > inner.size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, inner.size
                ),
            )));
        }

        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;

        Ok(())
    }
}

/// A locked directory of numbered log files.
///
/// Holds an exclusive advisory lock (`LOCK` file) for its entire lifetime,
/// so only one process can write the log at a time. File creations and
/// removals fsync the directory; without that, the rename journal of the
/// filesystem may lose the metadata update in a crash.
#[derive(Debug)]
pub struct DirectoryFileSet {
    path: PathBuf,
    _lock_file: File,
}

impl DirectoryFileSet {
    /// Opens or creates a log directory and acquires its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("log directory does not exist: {}", path.display()),
                )));
            }
        }

        if !path.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", path.display()),
            )));
        }

        let lock_path = path.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, number: u64) -> PathBuf {
        self.path.join(log_file_name(number))
    }

    /// Fsyncs the directory so file creations/removals are durable.
    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journaling covers metadata durability; directory fsync is
        // not supported on Windows.
        Ok(())
    }
}

impl FileSet for DirectoryFileSet {
    fn list(&self) -> StorageResult<Vec<u64>> {
        let mut numbers = Vec::new();

        for dir_entry in fs::read_dir(&self.path)? {
            let name = dir_entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(digits) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".log")) {
                if let Ok(number) = digits.parse::<u64>() {
                    numbers.push(number);
                }
            }
        }

        numbers.sort_unstable();
        Ok(numbers)
    }

    fn open(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let path = self.file_path(number);
        if !path.exists() {
            return Err(StorageError::NoSuchFile { number });
        }
        Ok(Box::new(FileBackend::open(&path)?))
    }

    fn create(&self, number: u64) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = FileBackend::open(&self.file_path(number))?;
        self.sync_directory()?;
        Ok(Box::new(backend))
    }

    fn remove(&self, number: u64) -> StorageResult<()> {
        let path = self.file_path(number);
        if !path.exists() {
            return Err(StorageError::NoSuchFile { number });
        }
        fs::remove_file(&path)?;
        self.sync_directory()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();

        let offset1 = backend.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = backend.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(backend.size().unwrap(), 11);

        let data = backend.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello").unwrap();

        let result = backend.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 15);

            let data = backend.read_at(0, 15).unwrap();
            assert_eq!(&data, b"persistent data");
        }
    }

    #[test]
    fn file_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.bin");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"hello world").unwrap();
        backend.truncate(5).unwrap();

        assert_eq!(backend.size().unwrap(), 5);
        assert_eq!(&backend.read_at(0, 5).unwrap(), b"hello");
        assert!(backend.truncate(100).is_err());
    }

    #[test]
    fn directory_lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("log");

        let _set1 = DirectoryFileSet::open(&path, true).unwrap();

        let result = DirectoryFileSet::open(&path, true);
        assert!(matches!(result, Err(StorageError::Locked)));
    }

    #[test]
    fn directory_lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("log");

        {
            let _set = DirectoryFileSet::open(&path, true).unwrap();
        }

        let _set2 = DirectoryFileSet::open(&path, true).unwrap();
    }

    #[test]
    fn directory_open_fails_without_create() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nonexistent");

        assert!(DirectoryFileSet::open(&path, false).is_err());
    }

    #[test]
    fn directory_file_set_lifecycle() {
        let temp = tempdir().unwrap();
        let set = DirectoryFileSet::open(&temp.path().join("log"), true).unwrap();

        assert!(set.list().unwrap().is_empty());

        let mut f0 = set.create(0).unwrap();
        f0.append(b"abc").unwrap();
        let _f1 = set.create(1).unwrap();

        assert_eq!(set.list().unwrap(), vec![0, 1]);

        // A second handle sees the same bytes.
        let reader = set.open(0).unwrap();
        assert_eq!(&reader.read_at(0, 3).unwrap(), b"abc");

        set.remove(0).unwrap();
        assert_eq!(set.list().unwrap(), vec![1]);
        assert!(matches!(set.open(0), Err(StorageError::NoSuchFile { number: 0 })));
        assert!(set.remove(0).is_err());
    }

    #[test]
    fn log_file_names_are_zero_padded() {
        assert_eq!(log_file_name(0), "wal-0000000000.log");
        assert_eq!(log_file_name(42), "wal-0000000042.log");
    }
}
