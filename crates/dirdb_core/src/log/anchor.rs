//! Durable log positions.

use crate::types::Lsn;
use std::fmt;

/// The durable position of a log record: file number, byte offset within
/// that file, and the record's LSN.
///
/// Anchors order the same way the log does: by `(file_number, offset)`.
/// The LSN rides along for convenience and agrees with that order for any
/// two anchors taken from the same log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogAnchor {
    /// Number of the log file holding the record.
    pub file_number: u64,
    /// Byte offset of the record's frame within the file.
    pub offset: u64,
    /// LSN assigned to the record.
    pub lsn: Lsn,
}

impl LogAnchor {
    /// Creates an anchor at the given position.
    #[must_use]
    pub const fn new(file_number: u64, offset: u64, lsn: Lsn) -> Self {
        Self {
            file_number,
            offset,
            lsn,
        }
    }

    /// Returns true if this anchor names an actual record position.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.lsn.is_known()
    }
}

impl Default for LogAnchor {
    fn default() -> Self {
        Self {
            file_number: 0,
            offset: 0,
            lsn: Lsn::UNKNOWN,
        }
    }
}

impl PartialOrd for LogAnchor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogAnchor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.file_number, self.offset).cmp(&(other.file_number, other.offset))
    }
}

impl fmt::Display for LogAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.lsn, self.file_number, self.offset)
    }
}
