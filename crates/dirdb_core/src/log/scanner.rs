//! Forward log scanner.
//!
//! Reads record frames in order across the numbered files, verifying the
//! framing, CRC, and LSN monotonicity of each. The scanner's central job
//! beyond iteration is classification: damage that a crash mid-append can
//! produce (an incomplete or garbage tail in the *final* file) terminates
//! the scan cleanly at the last good record, while damage a crash cannot
//! explain surfaces as [`CoreError::InvalidLog`].

use crate::error::{CoreError, CoreResult};
use crate::log::record::{CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use crate::log::{LogAnchor, LogRecordKind, UserLogRecord};
use crate::types::Lsn;
use dirdb_storage::{FileSet, StorageBackend};
use std::sync::Arc;

/// A forward scan over the log's records.
pub struct LogScanner {
    file_set: Arc<dyn FileSet>,
    files: Vec<u64>,
    file_idx: usize,
    backend: Option<Box<dyn StorageBackend>>,
    file_number: u64,
    file_size: u64,
    offset: u64,
    last_good_file_number: u64,
    last_good_offset: u64,
    last_lsn: Lsn,
    torn: bool,
    finished: bool,
}

impl LogScanner {
    /// Creates a scanner over the given files, starting at the first.
    pub(crate) fn new(file_set: Arc<dyn FileSet>, files: Vec<u64>) -> Self {
        let first = files.first().copied().unwrap_or(0);
        Self {
            file_set,
            files,
            file_idx: 0,
            backend: None,
            file_number: first,
            file_size: 0,
            offset: 0,
            last_good_file_number: first,
            last_good_offset: 0,
            last_lsn: Lsn::UNKNOWN,
            torn: false,
            finished: false,
        }
    }

    /// Creates a scanner starting at `anchor`'s position.
    pub(crate) fn from_anchor(
        file_set: Arc<dyn FileSet>,
        files: Vec<u64>,
        anchor: LogAnchor,
    ) -> Self {
        let files: Vec<u64> = files
            .into_iter()
            .filter(|&n| n >= anchor.file_number)
            .collect();
        let mut scanner = Self::new(file_set, files);
        scanner.offset = anchor.offset;
        scanner.last_good_offset = anchor.offset;
        scanner
    }

    /// Reads the next record into `rec`.
    ///
    /// Returns `Ok(true)` when a record was read, `Ok(false)` at the end
    /// of the log (including a torn tail).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLog`] for damage a crash cannot
    /// produce, and storage errors if the files cannot be read.
    pub fn next_record(&mut self, rec: &mut UserLogRecord) -> CoreResult<bool> {
        loop {
            if self.finished {
                return Ok(false);
            }
            if self.backend.is_none() && !self.enter_file()? {
                return Ok(false);
            }
            if self.offset == self.file_size {
                // Clean end of this file; move to the next.
                self.backend = None;
                self.file_idx += 1;
                self.offset = 0;
                continue;
            }
            return self.read_frame(rec);
        }
    }

    /// File number of the last cleanly read position.
    #[must_use]
    pub fn last_good_file_number(&self) -> u64 {
        self.last_good_file_number
    }

    /// Offset just past the last cleanly read record in
    /// [`Self::last_good_file_number`].
    #[must_use]
    pub fn last_good_offset(&self) -> u64 {
        self.last_good_offset
    }

    /// LSN of the last record read, or [`Lsn::UNKNOWN`] if none.
    #[must_use]
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    /// Returns true if the scan ended at a torn tail rather than a clean
    /// end of log.
    #[must_use]
    pub fn torn_tail(&self) -> bool {
        self.torn
    }

    fn enter_file(&mut self) -> CoreResult<bool> {
        let Some(&number) = self.files.get(self.file_idx) else {
            self.finished = true;
            return Ok(false);
        };
        let backend = self.file_set.open(number)?;
        self.file_size = backend.size()?;
        self.file_number = number;
        if self.offset == 0 {
            // A file boundary is always a clean truncation point.
            self.last_good_file_number = number;
            self.last_good_offset = 0;
        }
        self.backend = Some(backend);
        Ok(true)
    }

    fn in_final_file(&self) -> bool {
        self.file_idx + 1 == self.files.len()
    }

    fn stop_torn(&mut self) -> CoreResult<bool> {
        self.torn = true;
        self.finished = true;
        Ok(false)
    }

    fn read_frame(&mut self, rec: &mut UserLogRecord) -> CoreResult<bool> {
        let final_file = self.in_final_file();
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| CoreError::invalid_log("scanner has no open file"))?;

        if self.offset + HEADER_SIZE as u64 > self.file_size {
            if final_file {
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "incomplete record header mid-log in file {}",
                self.file_number
            )));
        }
        let header = backend.read_at(self.offset, HEADER_SIZE)?;

        if header[0..4] != LOG_MAGIC {
            if final_file {
                // Garbage where a record should start; a crash can leave
                // this only at the tail.
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "bad record magic mid-log in file {}",
                self.file_number
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != LOG_VERSION {
            if final_file {
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "unsupported record version {version} in file {}",
                self.file_number
            )));
        }
        let Some(kind) = LogRecordKind::from_byte(header[6]) else {
            if final_file {
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "unknown record kind {} in file {}",
                header[6], self.file_number
            )));
        };
        let lsn = Lsn::new(i64::from_le_bytes(
            header[7..15]
                .try_into()
                .map_err(|_| CoreError::invalid_log("short record header"))?,
        ));
        let payload_len = u32::from_le_bytes(
            header[15..19]
                .try_into()
                .map_err(|_| CoreError::invalid_log("short record header"))?,
        ) as u64;

        let frame_end = self.offset + HEADER_SIZE as u64 + payload_len + CRC_SIZE as u64;
        if frame_end > self.file_size {
            if final_file {
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "truncated record mid-log in file {}",
                self.file_number
            )));
        }

        let body = backend.read_at(
            self.offset + HEADER_SIZE as u64,
            (payload_len + CRC_SIZE as u64) as usize,
        )?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);
        let stored_crc = u32::from_le_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| CoreError::invalid_log("short record trailer"))?,
        );
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            // A torn append can leave a half-written frame only at the
            // very tail; a checksum failure with more log after it is
            // media corruption.
            if final_file && frame_end == self.file_size {
                return self.stop_torn();
            }
            return Err(CoreError::invalid_log(format!(
                "record checksum mismatch at {}:{}",
                self.file_number, self.offset
            )));
        }

        if self.last_lsn.is_known() && lsn <= self.last_lsn {
            return Err(CoreError::invalid_log(format!(
                "non-increasing {lsn} after {} at {}:{}",
                self.last_lsn, self.file_number, self.offset
            )));
        }

        rec.reset(kind);
        rec.buffer_mut().extend_from_slice(payload);
        rec.set_anchor(LogAnchor::new(self.file_number, self.offset, lsn));

        self.last_lsn = lsn;
        self.offset = frame_end;
        self.last_good_file_number = self.file_number;
        self.last_good_offset = frame_end;
        Ok(true)
    }
}
