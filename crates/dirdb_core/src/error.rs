//! Error types for the dirdb kernel.

use std::io;
use thiserror::Error;

/// Result type for kernel operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kernel operations.
///
/// The variants fall into three classes with distinct handling:
///
/// - `Storage` / `Io` - fatal I/O failure of an append, flush, or scan.
///   Fatal to the in-progress transaction; never retried internally.
/// - `TxnConflict` - a commit-time write-write conflict. Recoverable: the
///   transaction is known-aborted and the caller may retry with a fresh
///   one.
/// - `InvalidLog` - log content that cannot be explained as a torn tail.
///   Fatal to recovery and startup; requires operator intervention.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dirdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Log content is corrupted beyond what a crash can produce.
    #[error("invalid log: {message}")]
    InvalidLog {
        /// Description of the corruption.
        message: String,
    },

    /// A read-write transaction's write set overlaps a concurrently
    /// committed transaction's write set.
    #[error("transaction {txn_id} conflicts with committed transaction {conflicting_txn}")]
    TxnConflict {
        /// The transaction whose commit failed.
        txn_id: i64,
        /// The committed transaction it raced with.
        conflicting_txn: i64,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid-log error.
    pub fn invalid_log(message: impl Into<String>) -> Self {
        Self::InvalidLog {
            message: message.into(),
        }
    }

    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transaction-conflict error.
    pub fn conflict(txn_id: i64, conflicting_txn: i64) -> Self {
        Self::TxnConflict {
            txn_id,
            conflicting_txn,
        }
    }

    /// Returns true if this is a recoverable commit-time conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TxnConflict { .. })
    }
}
