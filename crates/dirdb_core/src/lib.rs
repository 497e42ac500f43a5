//! # dirdb core
//!
//! The transactional durability kernel beneath a partitioned directory
//! entry/index store: a rotating write-ahead log plus an
//! optimistic-concurrency transaction manager.
//!
//! This crate provides:
//! - A multi-file write-ahead log with monotonic LSN assignment ([`Wal`])
//! - A forward scanner that distinguishes a torn tail from media
//!   corruption ([`LogScanner`])
//! - The log-edit hierarchy recorded by transactions and replayed during
//!   recovery ([`LogEdit`])
//! - Read-only and read-write transactions with commit-time write-write
//!   conflict detection ([`TransactionManager`])
//! - Crash recovery by idempotent replay ([`replay`])
//!
//! The entry/index store itself is reached through the [`Partition`] trait;
//! [`MemPartition`] is the in-memory reference implementation.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dirdb_core::{
//!     EntryChange, EntryModification, LogConfig, LogEdit, MemPartition,
//!     TransactionManager, U64KeyCodec, Wal,
//! };
//! use dirdb_storage::InMemoryFileSet;
//!
//! let wal = Arc::new(Wal::open(LogConfig::new(), Arc::new(InMemoryFileSet::new())).unwrap());
//! let partition = Arc::new(MemPartition::<u64>::new());
//! let manager = TransactionManager::open(wal, partition, Arc::new(U64KeyCodec)).unwrap();
//!
//! let mut txn = manager.begin_read_write();
//! txn.add_edit(LogEdit::Entry(EntryModification::new(
//!     txn.txn_id(),
//!     1,
//!     EntryChange::Put { data: b"cn=admin".to_vec() },
//! )))
//! .unwrap();
//! let commit_lsn = manager.commit(&mut txn).unwrap();
//! assert!(commit_lsn.as_i64() > 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod edit;
pub mod error;
pub mod log;
pub mod partition;
pub mod recovery;
pub mod txn;
pub mod types;

pub use config::LogConfig;
pub use edit::{
    EntryChange, EntryModification, IndexModification, IndexOp, LogEdit, WriteTarget,
};
pub use error::{CoreError, CoreResult};
pub use log::{LogAnchor, LogRecord, LogRecordKind, LogScanner, UserLogRecord, Wal};
pub use partition::{MemPartition, Partition, StoredEntry};
pub use recovery::{replay, RecoveryReport};
pub use txn::{CommittedTxn, ReadOnlyTxn, ReadWriteTxn, TransactionManager, TxnState};
pub use types::{IndexId, Key, KeyCodec, Lsn, TxnId, U64KeyCodec};
