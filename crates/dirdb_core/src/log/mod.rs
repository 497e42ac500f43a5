//! The rotating write-ahead log.
//!
//! The log is a sequence of framed records spread across monotonically
//! numbered files. Records are assigned strictly increasing LSNs at append
//! time; a [`LogAnchor`] names a record's durable position. The [`Wal`]
//! owns append, rotation, and durability; the [`LogScanner`] reads records
//! forward and decides whether a damaged tail is a torn crash artifact or
//! real corruption.

mod anchor;
mod record;
mod scanner;
mod wal;

pub use anchor::LogAnchor;
pub use record::{LogRecord, LogRecordKind, UserLogRecord};
pub use scanner::LogScanner;
pub use wal::Wal;

pub(crate) use record::{decode_txn_id, encode_abort, encode_checkpoint, encode_commit};
