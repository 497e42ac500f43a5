//! Transaction handles and committed-transaction history entries.

use crate::edit::{LogEdit, WriteTarget};
use crate::error::{CoreError, CoreResult};
use crate::log::{LogAnchor, UserLogRecord};
use crate::types::{Lsn, TxnId};
use std::collections::HashSet;
use std::sync::Arc;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting edits; outcome undecided.
    Active,
    /// Validated and applied.
    Committed,
    /// Rolled back, either explicitly or by a commit-time conflict.
    Aborted,
}

/// A transaction that committed, as remembered for conflict detection.
///
/// The manager keeps these until no active transaction began before the
/// commit, at which point no future committer can need them.
#[derive(Debug)]
pub struct CommittedTxn<K> {
    txn_id: TxnId,
    start_lsn: Lsn,
    commit_lsn: Lsn,
    write_set: HashSet<WriteTarget<K>>,
}

impl<K> CommittedTxn<K> {
    pub(crate) fn new(
        txn_id: TxnId,
        start_lsn: Lsn,
        commit_lsn: Lsn,
        write_set: HashSet<WriteTarget<K>>,
    ) -> Self {
        Self {
            txn_id,
            start_lsn,
            commit_lsn,
            write_set,
        }
    }

    /// The transaction's id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The LSN snapshot taken when the transaction began.
    #[must_use]
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// The LSN of its commit record.
    #[must_use]
    pub fn commit_lsn(&self) -> Lsn {
        self.commit_lsn
    }

    /// The locations it wrote.
    #[must_use]
    pub fn write_set(&self) -> &HashSet<WriteTarget<K>> {
        &self.write_set
    }
}

/// A read-only transaction.
///
/// Never conflicts and never logs. It carries the transactions that
/// committed at or after its start LSN so a reader can tell which
/// committed changes postdate its snapshot.
#[derive(Debug)]
pub struct ReadOnlyTxn<K> {
    txn_id: TxnId,
    start_lsn: Lsn,
    state: TxnState,
    txns_to_check: Vec<Arc<CommittedTxn<K>>>,
}

impl<K> ReadOnlyTxn<K> {
    pub(crate) fn new(
        txn_id: TxnId,
        start_lsn: Lsn,
        txns_to_check: Vec<Arc<CommittedTxn<K>>>,
    ) -> Self {
        Self {
            txn_id,
            start_lsn,
            state: TxnState::Active,
            txns_to_check,
        }
    }

    /// The transaction's id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The LSN snapshot taken when the transaction began.
    #[must_use]
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// The transaction's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Transactions that committed at or after this one's start LSN.
    #[must_use]
    pub fn txns_to_check(&self) -> &[Arc<CommittedTxn<K>>] {
        &self.txns_to_check
    }

    /// Returns true if a change with the given LSN was committed before
    /// this transaction's snapshot.
    #[must_use]
    pub fn is_visible(&self, change_lsn: Lsn) -> bool {
        change_lsn <= self.start_lsn
    }

    pub(crate) fn finish(&mut self, state: TxnState) {
        self.state = state;
    }
}

/// A read-write transaction.
///
/// Edits accumulate locally; nothing is logged or applied until commit.
/// The record buffer is owned by the transaction so commit can encode
/// without allocating under the manager's locks.
#[derive(Debug)]
pub struct ReadWriteTxn<K> {
    txn_id: TxnId,
    start_lsn: Lsn,
    state: TxnState,
    edits: Vec<LogEdit<K>>,
    commit_lsn: Option<Lsn>,
    record: UserLogRecord,
}

impl<K: Clone + Eq + std::hash::Hash> ReadWriteTxn<K> {
    pub(crate) fn new(txn_id: TxnId, start_lsn: Lsn, buffer_capacity: usize) -> Self {
        Self {
            txn_id,
            start_lsn,
            state: TxnState::Active,
            edits: Vec::new(),
            commit_lsn: None,
            record: UserLogRecord::with_capacity(buffer_capacity),
        }
    }

    /// The transaction's id.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The LSN snapshot taken when the transaction began.
    #[must_use]
    pub fn start_lsn(&self) -> Lsn {
        self.start_lsn
    }

    /// The transaction's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// The edits recorded so far, in order.
    #[must_use]
    pub fn edits(&self) -> &[LogEdit<K>] {
        &self.edits
    }

    /// The commit record's LSN, once committed.
    #[must_use]
    pub fn commit_lsn(&self) -> Option<Lsn> {
        self.commit_lsn
    }

    /// Records an edit.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is no
    /// longer active or the edit belongs to a different transaction.
    pub fn add_edit(&mut self, edit: LogEdit<K>) -> CoreResult<()> {
        self.ensure_active()?;
        if edit.txn_id() != self.txn_id {
            return Err(CoreError::invalid_operation(format!(
                "edit for {} added to {}",
                edit.txn_id(),
                self.txn_id
            )));
        }
        self.edits.push(edit);
        Ok(())
    }

    /// The set of locations this transaction writes.
    #[must_use]
    pub fn write_set(&self) -> HashSet<WriteTarget<K>> {
        self.edits.iter().map(LogEdit::target).collect()
    }

    pub(crate) fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Committed => Err(CoreError::invalid_operation(format!(
                "{} already committed",
                self.txn_id
            ))),
            TxnState::Aborted => Err(CoreError::invalid_operation(format!(
                "{} already aborted",
                self.txn_id
            ))),
        }
    }

    /// Split borrow for commit: the record buffer to encode into and the
    /// edits to encode.
    pub(crate) fn record_and_edits(&mut self) -> (&mut UserLogRecord, &[LogEdit<K>]) {
        (&mut self.record, &self.edits)
    }

    pub(crate) fn record_mut(&mut self) -> &mut UserLogRecord {
        &mut self.record
    }

    pub(crate) fn set_commit_lsn(&mut self, lsn: Lsn) {
        self.commit_lsn = Some(lsn);
    }

    /// Stamps the commit record's anchor onto the transaction and every
    /// edit.
    pub(crate) fn stamp(&mut self, anchor: LogAnchor) {
        self.commit_lsn = Some(anchor.lsn);
        for edit in &mut self.edits {
            edit.set_anchor(anchor);
        }
    }

    pub(crate) fn finish(&mut self, state: TxnState) {
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{EntryChange, EntryModification};

    fn txn() -> ReadWriteTxn<u64> {
        ReadWriteTxn::new(TxnId::new(1), Lsn::new(0), 0)
    }

    fn put(txn_id: i64, entry_id: u64) -> LogEdit<u64> {
        LogEdit::Entry(EntryModification::new(
            TxnId::new(txn_id),
            entry_id,
            EntryChange::Put { data: vec![0] },
        ))
    }

    #[test]
    fn edits_accumulate_in_order() {
        let mut txn = txn();
        txn.add_edit(put(1, 10)).unwrap();
        txn.add_edit(put(1, 11)).unwrap();
        assert_eq!(txn.edits().len(), 2);
        assert_eq!(txn.write_set().len(), 2);
    }

    #[test]
    fn wrong_txn_id_rejected() {
        let mut txn = txn();
        assert!(txn.add_edit(put(2, 10)).is_err());
    }

    #[test]
    fn finished_txn_rejects_edits() {
        let mut txn = txn();
        txn.finish(TxnState::Aborted);
        assert!(txn.add_edit(put(1, 10)).is_err());
        assert!(txn.ensure_active().is_err());
    }

    #[test]
    fn duplicate_targets_collapse_in_write_set() {
        let mut txn = txn();
        txn.add_edit(put(1, 10)).unwrap();
        txn.add_edit(put(1, 10)).unwrap();
        assert_eq!(txn.edits().len(), 2);
        assert_eq!(txn.write_set().len(), 1);
    }

    #[test]
    fn read_only_visibility() {
        let txn = ReadOnlyTxn::<u64>::new(TxnId::new(2), Lsn::new(5), Vec::new());
        assert!(txn.is_visible(Lsn::new(5)));
        assert!(txn.is_visible(Lsn::new(1)));
        assert!(!txn.is_visible(Lsn::new(6)));
    }
}
