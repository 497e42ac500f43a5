//! Transactions and the transaction manager.
//!
//! Read-write transactions buffer their edits locally and validate at
//! commit time: after the commit record is durable, the transaction's
//! write set is checked against every transaction that committed since it
//! began. An overlap aborts the late committer (a durable abort marker
//! voids its commit record); disjoint writers never block each other.

mod manager;
mod state;

pub use manager::TransactionManager;
pub use state::{CommittedTxn, ReadOnlyTxn, ReadWriteTxn, TxnState};
