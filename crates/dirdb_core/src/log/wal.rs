//! The write-ahead log.

use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};
use crate::log::record::{CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use crate::log::{LogAnchor, LogScanner, UserLogRecord};
use crate::types::Lsn;
use dirdb_storage::{DirectoryFileSet, FileSet, StorageBackend};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct WalInner {
    backend: Box<dyn StorageBackend>,
    file_number: u64,
    file_size: u64,
}

/// The rotating write-ahead log.
///
/// Appends go to the highest-numbered file until it would exceed the
/// configured maximum size, at which point a new file with the next number
/// is created. Each appended record receives the next LSN; LSN order and
/// log position order always agree.
///
/// Opening the log repairs a torn tail: a final record left incomplete by
/// a crash is truncated away with a warning. Damage anywhere else fails
/// the open with [`CoreError::InvalidLog`].
pub struct Wal {
    file_set: Arc<dyn FileSet>,
    config: LogConfig,
    // Highest assigned LSN + 1. Only mutated while `inner` is held, so
    // LSN order matches append order; read lock-free by `current_lsn`.
    next_lsn: AtomicI64,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Opens the log over a file set, scanning it end to end and
    /// repairing a torn tail.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLog`] if the file numbers are not
    /// contiguous or the log content is corrupted beyond a torn tail.
    pub fn open(config: LogConfig, file_set: Arc<dyn FileSet>) -> CoreResult<Self> {
        let mut files = file_set.list()?;
        if files.is_empty() {
            file_set.create(0)?;
            files.push(0);
        }
        for pair in files.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(CoreError::invalid_log(format!(
                    "log file gap: {} followed by {}",
                    pair[0], pair[1]
                )));
            }
        }

        let mut scanner = LogScanner::new(Arc::clone(&file_set), files.clone());
        let mut rec = UserLogRecord::with_capacity(config.buffer_capacity);
        while scanner.next_record(&mut rec)? {}

        if scanner.torn_tail() {
            // A torn tail can only sit in the final file.
            let mut backend = file_set.open(scanner.last_good_file_number())?;
            let size = backend.size()?;
            warn!(
                file = scanner.last_good_file_number(),
                from = size,
                to = scanner.last_good_offset(),
                "truncating torn log tail"
            );
            backend.truncate(scanner.last_good_offset())?;
            backend.sync()?;
        }

        let tail_file = *files
            .last()
            .ok_or_else(|| CoreError::invalid_log("empty log file set"))?;
        let backend = file_set.open(tail_file)?;
        let file_size = backend.size()?;
        let next_lsn = if scanner.last_lsn().is_known() {
            scanner.last_lsn().as_i64() + 1
        } else {
            1
        };

        Ok(Self {
            file_set,
            config,
            next_lsn: AtomicI64::new(next_lsn),
            inner: Mutex::new(WalInner {
                backend,
                file_number: tail_file,
                file_size,
            }),
        })
    }

    /// Opens the log in a directory, taking the directory lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing (and
    /// `create_if_missing` is off), already locked, or holds an invalid
    /// log.
    pub fn open_dir(path: &Path, config: LogConfig) -> CoreResult<Self> {
        let file_set = DirectoryFileSet::open(path, config.create_if_missing)?;
        Self::open(config, Arc::new(file_set))
    }

    /// Appends a record, assigning it the next LSN.
    ///
    /// Rotates to a new file first if the current file would exceed the
    /// configured maximum size. The assigned position is stamped onto
    /// `rec` and returned; the record is **not** durable until
    /// [`Self::flush`] returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the append or a rotation fails.
    pub fn append(&self, rec: &mut UserLogRecord) -> CoreResult<LogAnchor> {
        let payload = rec.payload();
        let frame_len = HEADER_SIZE + payload.len() + CRC_SIZE;

        let mut inner = self.inner.lock();
        if inner.file_size > 0 && inner.file_size + frame_len as u64 > self.config.max_file_size {
            let next = inner.file_number + 1;
            inner.backend.sync()?;
            inner.backend = self.file_set.create(next)?;
            inner.file_number = next;
            inner.file_size = 0;
            debug!(file = next, "rotated to new log file");
        }

        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);

        let mut frame = Vec::with_capacity(frame_len);
        frame.extend_from_slice(&LOG_MAGIC);
        frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
        frame.push(rec.kind().as_byte());
        frame.extend_from_slice(&lsn.to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&frame);
        frame.extend_from_slice(&hasher.finalize().to_le_bytes());

        let offset = inner.backend.append(&frame)?;
        inner.file_size = offset + frame.len() as u64;

        let anchor = LogAnchor::new(inner.file_number, offset, Lsn::new(lsn));
        rec.set_anchor(anchor);
        Ok(anchor)
    }

    /// Makes all appended records durable (or flushes them to the OS when
    /// `sync_on_commit` is off).
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if self.config.sync_on_commit {
            inner.backend.sync()?;
        } else {
            inner.backend.flush()?;
        }
        Ok(())
    }

    /// The configuration the log was opened with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// The highest LSN assigned so far, or `lsn:0` for a fresh log.
    #[must_use]
    pub fn current_lsn(&self) -> Lsn {
        Lsn::new(self.next_lsn.load(Ordering::SeqCst) - 1)
    }

    /// The position just past the last appended record.
    pub fn tail_anchor(&self) -> LogAnchor {
        let inner = self.inner.lock();
        LogAnchor::new(inner.file_number, inner.file_size, self.current_lsn())
    }

    /// Returns a scanner over the whole log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file set cannot be enumerated.
    pub fn scanner(&self) -> CoreResult<LogScanner> {
        let files = self.file_set.list()?;
        Ok(LogScanner::new(Arc::clone(&self.file_set), files))
    }

    /// Returns a scanner starting at `anchor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file set cannot be enumerated.
    pub fn scanner_from(&self, anchor: LogAnchor) -> CoreResult<LogScanner> {
        let files = self.file_set.list()?;
        Ok(LogScanner::from_anchor(
            Arc::clone(&self.file_set),
            files,
            anchor,
        ))
    }

    /// Removes all log files numbered below `file_number`, returning how
    /// many were removed.
    ///
    /// The current tail file is never removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn remove_files_before(&self, file_number: u64) -> CoreResult<usize> {
        let tail = self.inner.lock().file_number;
        let limit = file_number.min(tail);
        let mut removed = 0;
        for number in self.file_set.list()? {
            if number < limit {
                self.file_set.remove(number)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::record::encode_abort;
    use crate::types::TxnId;
    use dirdb_storage::InMemoryFileSet;

    fn open_mem(config: LogConfig) -> (Wal, Arc<InMemoryFileSet>) {
        let file_set = Arc::new(InMemoryFileSet::new());
        let wal = Wal::open(config.sync_on_commit(false), file_set.clone()).unwrap();
        (wal, file_set)
    }

    fn append_abort(wal: &Wal, txn: i64) -> LogAnchor {
        let mut rec = UserLogRecord::new();
        encode_abort(TxnId::new(txn), &mut rec);
        let anchor = wal.append(&mut rec).unwrap();
        wal.flush().unwrap();
        anchor
    }

    #[test]
    fn fresh_log_starts_at_lsn_one() {
        let (wal, _) = open_mem(LogConfig::new());
        assert_eq!(wal.current_lsn(), Lsn::new(0));

        let anchor = append_abort(&wal, 1);
        assert_eq!(anchor.lsn, Lsn::new(1));
        assert_eq!(anchor.file_number, 0);
        assert_eq!(anchor.offset, 0);
        assert_eq!(wal.current_lsn(), Lsn::new(1));
    }

    #[test]
    fn lsns_are_strictly_increasing() {
        let (wal, _) = open_mem(LogConfig::new());
        let mut prev = Lsn::UNKNOWN;
        for txn in 0..20 {
            let anchor = append_abort(&wal, txn);
            assert!(!prev.is_known() || anchor.lsn > prev);
            prev = anchor.lsn;
        }
    }

    #[test]
    fn rotation_creates_new_files() {
        let (wal, file_set) = open_mem(LogConfig::new().max_file_size(64));
        for txn in 0..10 {
            append_abort(&wal, txn);
        }
        let files = file_set.list().unwrap();
        assert!(files.len() > 1, "expected rotation, got {files:?}");
        assert_eq!(files, (0..files.len() as u64).collect::<Vec<_>>());
    }

    #[test]
    fn reopen_continues_lsn_sequence() {
        let file_set = Arc::new(InMemoryFileSet::new());
        let config = LogConfig::new().sync_on_commit(false);
        {
            let wal = Wal::open(config.clone(), file_set.clone()).unwrap();
            for txn in 0..3 {
                append_abort(&wal, txn);
            }
        }
        let wal = Wal::open(config, file_set.clone()).unwrap();
        assert_eq!(wal.current_lsn(), Lsn::new(3));
        let anchor = append_abort(&wal, 99);
        assert_eq!(anchor.lsn, Lsn::new(4));
    }

    #[test]
    fn scan_returns_records_in_order() {
        let (wal, _) = open_mem(LogConfig::new().max_file_size(64));
        for txn in 0..8 {
            append_abort(&wal, txn);
        }
        let mut scanner = wal.scanner().unwrap();
        let mut rec = UserLogRecord::new();
        let mut count = 0;
        let mut prev = Lsn::UNKNOWN;
        while scanner.next_record(&mut rec).unwrap() {
            assert!(!prev.is_known() || rec.anchor().lsn > prev);
            prev = rec.anchor().lsn;
            count += 1;
        }
        assert_eq!(count, 8);
        assert!(!scanner.torn_tail());
    }

    #[test]
    fn scan_from_anchor_skips_earlier_records() {
        let (wal, _) = open_mem(LogConfig::new().max_file_size(64));
        let mut anchors = Vec::new();
        for txn in 0..8 {
            anchors.push(append_abort(&wal, txn));
        }
        // Two records per file at this size, so the anchor sits mid-file
        // in a rotated-to file.
        let from = anchors[5];
        assert!(from.file_number > 0);
        assert!(from.offset > 0);

        let mut scanner = wal.scanner_from(from).unwrap();
        let mut rec = UserLogRecord::new();
        let mut seen = Vec::new();
        while scanner.next_record(&mut rec).unwrap() {
            seen.push(rec.anchor());
        }
        assert_eq!(seen, anchors[5..]);
        assert!(!scanner.torn_tail());

        let frame = (HEADER_SIZE + 8 + CRC_SIZE) as u64;
        let last = anchors[7];
        assert_eq!(scanner.last_good_file_number(), last.file_number);
        assert_eq!(scanner.last_good_offset(), last.offset + frame);
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let file_set = Arc::new(InMemoryFileSet::new());
        let config = LogConfig::new().sync_on_commit(false);
        let clean_size;
        {
            let wal = Wal::open(config.clone(), file_set.clone()).unwrap();
            for txn in 0..3 {
                append_abort(&wal, txn);
            }
            clean_size = wal.tail_anchor().offset;
        }
        // Simulate a crash mid-append: half a frame at the tail.
        {
            let mut backend = file_set.open(0).unwrap();
            backend.append(&LOG_MAGIC).unwrap();
            backend.append(&[1, 0, 1]).unwrap();
        }

        let wal = Wal::open(config, file_set.clone()).unwrap();
        assert_eq!(wal.current_lsn(), Lsn::new(3));
        let backend = file_set.open(0).unwrap();
        assert_eq!(backend.size().unwrap(), clean_size);
    }

    #[test]
    fn garbage_tail_is_truncated_on_open() {
        let file_set = Arc::new(InMemoryFileSet::new());
        let config = LogConfig::new().sync_on_commit(false);
        {
            let wal = Wal::open(config.clone(), file_set.clone()).unwrap();
            append_abort(&wal, 1);
        }
        {
            let mut backend = file_set.open(0).unwrap();
            backend.append(b"not a record at all").unwrap();
        }
        let wal = Wal::open(config, file_set).unwrap();
        assert_eq!(wal.current_lsn(), Lsn::new(1));
    }

    #[test]
    fn corruption_before_tail_fails_open() {
        let file_set = Arc::new(InMemoryFileSet::new());
        let config = LogConfig::new().sync_on_commit(false);
        let second_offset;
        {
            let wal = Wal::open(config.clone(), file_set.clone()).unwrap();
            append_abort(&wal, 1);
            second_offset = append_abort(&wal, 2).offset;
            append_abort(&wal, 3);
        }
        // Flip a payload byte in the middle record. Two good records
        // follow it, so this cannot be a torn tail.
        {
            let handle = file_set.open(0).unwrap();
            let size = handle.size().unwrap();
            let mut data = handle.read_at(0, size as usize).unwrap();
            let target = second_offset as usize + HEADER_SIZE;
            data[target] ^= 0xFF;
            let mut backend = file_set.open(0).unwrap();
            backend.truncate(0).unwrap();
            backend.append(&data).unwrap();
        }
        let result = Wal::open(config, file_set);
        assert!(matches!(result, Err(CoreError::InvalidLog { .. })));
    }

    #[test]
    fn file_gap_fails_open() {
        let file_set = Arc::new(InMemoryFileSet::new());
        file_set.create(0).unwrap();
        file_set.create(2).unwrap();
        let result = Wal::open(LogConfig::new(), file_set);
        assert!(matches!(result, Err(CoreError::InvalidLog { .. })));
    }

    #[test]
    fn open_dir_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal");
        let config = LogConfig::new().max_file_size(64);
        {
            let wal = Wal::open_dir(&path, config.clone()).unwrap();
            // The directory is locked while the log is open.
            assert!(matches!(
                Wal::open_dir(&path, config.clone()),
                Err(CoreError::Storage(_))
            ));
            for txn in 0..5 {
                append_abort(&wal, txn);
            }
        }
        let wal = Wal::open_dir(&path, config).unwrap();
        assert_eq!(wal.current_lsn(), Lsn::new(5));

        let mut scanner = wal.scanner().unwrap();
        let mut rec = UserLogRecord::new();
        let mut count = 0;
        while scanner.next_record(&mut rec).unwrap() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    proptest::proptest! {
        /// Cutting a single-file log at any byte offset must look like a
        /// torn tail: the scan stops at the last whole record and never
        /// reports corruption.
        #[test]
        fn truncation_anywhere_scans_to_clean_prefix(cut in 0u64..200, records in 1usize..6) {
            let file_set = Arc::new(InMemoryFileSet::new());
            let config = LogConfig::new().sync_on_commit(false);
            {
                let wal = Wal::open(config.clone(), file_set.clone()).unwrap();
                for txn in 0..records as i64 {
                    append_abort(&wal, txn);
                }
            }
            let size = {
                let mut backend = file_set.open(0).unwrap();
                let size = backend.size().unwrap();
                backend.truncate(cut.min(size)).unwrap();
                backend.size().unwrap()
            };

            let files: Arc<dyn FileSet> = file_set.clone();
            let mut scanner = LogScanner::new(files, vec![0]);
            let mut rec = UserLogRecord::new();
            let mut seen = 0u64;
            while scanner.next_record(&mut rec).unwrap() {
                seen += 1;
            }
            let frame = (HEADER_SIZE + 8 + CRC_SIZE) as u64;
            proptest::prop_assert_eq!(seen, size / frame);
            proptest::prop_assert_eq!(scanner.last_good_offset(), seen * frame);
            proptest::prop_assert_eq!(scanner.torn_tail(), size % frame != 0);
        }
    }

    #[test]
    fn remove_files_before_spares_tail() {
        let (wal, file_set) = open_mem(LogConfig::new().max_file_size(64));
        for txn in 0..10 {
            append_abort(&wal, txn);
        }
        let tail = wal.tail_anchor().file_number;
        assert!(tail > 0);

        let removed = wal.remove_files_before(u64::MAX).unwrap();
        assert_eq!(removed as u64, tail);
        assert_eq!(file_set.list().unwrap(), vec![tail]);
    }
}
