//! The transaction manager.

use crate::edit::WriteTarget;
use crate::error::{CoreError, CoreResult};
use crate::log::{encode_abort, encode_checkpoint, encode_commit, LogAnchor, Wal};
use crate::partition::Partition;
use crate::recovery::{replay, RecoveryReport};
use crate::txn::state::{CommittedTxn, ReadOnlyTxn, ReadWriteTxn, TxnState};
use crate::types::{Key, KeyCodec, Lsn, TxnId};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct ActiveTxn {
    txn_id: TxnId,
    start_lsn: Lsn,
}

/// Active read-write transactions and the committed history still needed
/// to validate them.
struct TxnRegistry<K> {
    active: Vec<ActiveTxn>,
    committed: VecDeque<Arc<CommittedTxn<K>>>,
}

impl<K> TxnRegistry<K> {
    /// Transactions that committed at or after `start_lsn`.
    fn committed_since(&self, start_lsn: Lsn) -> Vec<Arc<CommittedTxn<K>>> {
        self.committed
            .iter()
            .filter(|c| c.commit_lsn() >= start_lsn)
            .cloned()
            .collect()
    }

    fn deregister_and_prune(&mut self, txn_id: TxnId) {
        self.active.retain(|a| a.txn_id != txn_id);
        self.prune();
    }

    /// Drops history entries no active transaction can still depend on.
    ///
    /// An entry is needed as long as some active transaction began at or
    /// before its commit; with no active transactions the whole history
    /// can go.
    fn prune(&mut self) {
        match self.active.iter().map(|a| a.start_lsn).min() {
            None => self.committed.clear(),
            Some(min_start) => {
                while let Some(front) = self.committed.front() {
                    if front.commit_lsn() < min_start {
                        self.committed.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

/// Coordinates transactions over one log and one partition.
///
/// Opening the manager replays the log into the partition, so a freshly
/// opened manager always sees the effects of every durable commit.
///
/// Commit protocol for a read-write transaction:
///
/// 1. the commit record (all edits) is appended and made durable;
/// 2. under the registry lock, the write set is checked against every
///    transaction that committed at or after this one's start LSN;
/// 3. on overlap, a durable abort marker voids the commit record and the
///    commit fails with [`CoreError::TxnConflict`];
/// 4. otherwise the transaction is published to the history and its
///    edits are applied to the partition.
///
/// Validation and publication happen atomically under one lock, so of two
/// racing committers with overlapping writes, exactly one succeeds.
pub struct TransactionManager<K: Key, P: Partition<K>> {
    wal: Arc<Wal>,
    partition: Arc<P>,
    codec: Arc<dyn KeyCodec<K>>,
    next_txn_id: AtomicI64,
    registry: Mutex<TxnRegistry<K>>,
    report: RecoveryReport,
}

impl<K: Key, P: Partition<K>> TransactionManager<K, P> {
    /// Opens a manager, replaying the log into the partition first.
    ///
    /// # Errors
    ///
    /// Returns an error if replay fails.
    pub fn open(wal: Arc<Wal>, partition: Arc<P>, codec: Arc<dyn KeyCodec<K>>) -> CoreResult<Self> {
        let report = replay(&wal, &*partition, &*codec)?;
        let next_txn_id = report.max_txn_id + 1;
        Ok(Self {
            wal,
            partition,
            codec,
            next_txn_id: AtomicI64::new(next_txn_id),
            registry: Mutex::new(TxnRegistry {
                active: Vec::new(),
                committed: VecDeque::new(),
            }),
            report,
        })
    }

    /// What opening this manager replayed.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// The log this manager commits through.
    #[must_use]
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// The partition this manager commits into.
    #[must_use]
    pub fn partition(&self) -> &Arc<P> {
        &self.partition
    }

    /// Begins a read-only transaction.
    ///
    /// Cheap: no log record is written. The start LSN and the dependent
    /// commit list are snapshotted together under the registry lock, so
    /// the list is complete for that LSN.
    pub fn begin_read_only(&self) -> ReadOnlyTxn<K> {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let registry = self.registry.lock();
        let start_lsn = self.wal.current_lsn();
        let deps = registry.committed_since(start_lsn);
        debug!(%txn_id, %start_lsn, "begin read-only");
        ReadOnlyTxn::new(txn_id, start_lsn, deps)
    }

    /// Begins a read-write transaction.
    ///
    /// Cheap: no log record is written until commit.
    pub fn begin_read_write(&self) -> ReadWriteTxn<K> {
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        let mut registry = self.registry.lock();
        let start_lsn = self.wal.current_lsn();
        registry.active.push(ActiveTxn { txn_id, start_lsn });
        debug!(%txn_id, %start_lsn, "begin read-write");
        ReadWriteTxn::new(txn_id, start_lsn, self.wal.config().buffer_capacity)
    }

    /// Transactions that committed at or after `txn`'s start LSN so far.
    ///
    /// This is the list `txn` will be validated against if it committed
    /// right now; commit recomputes it under the same lock that
    /// publishes new commits, so the committed-time list is never
    /// missing a racing writer.
    #[must_use]
    pub fn txns_to_check(&self, txn: &ReadWriteTxn<K>) -> Vec<Arc<CommittedTxn<K>>> {
        self.registry.lock().committed_since(txn.start_lsn())
    }

    /// Commits a read-write transaction, returning its commit LSN.
    ///
    /// A transaction with no edits commits trivially: nothing is logged
    /// and the current LSN is returned.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TxnConflict`] if a transaction with an overlapping
    ///   write set committed since this one began. The transaction is
    ///   aborted; retry with a fresh one.
    /// - [`CoreError::InvalidOperation`] if the transaction is not
    ///   active.
    /// - Storage errors if the log cannot be written; the transaction's
    ///   fate is then unknown until the next recovery. In particular, if
    ///   the failure strikes while voiding a conflicting commit, the
    ///   transaction is aborted locally but its commit record remains
    ///   unvoided in the log, and the next recovery will replay it as
    ///   committed unless an operator intervenes.
    pub fn commit(&self, txn: &mut ReadWriteTxn<K>) -> CoreResult<Lsn> {
        txn.ensure_active()?;
        let txn_id = txn.txn_id();

        if txn.edits().is_empty() {
            self.registry.lock().deregister_and_prune(txn_id);
            let lsn = self.wal.current_lsn();
            txn.set_commit_lsn(lsn);
            txn.finish(TxnState::Committed);
            debug!(%txn_id, "trivial commit");
            return Ok(lsn);
        }

        // Log first: the commit record must be durable before validation
        // so an overlap can be voided by a durable abort marker.
        {
            let (record, edits) = txn.record_and_edits();
            encode_commit(txn_id, edits, &*self.codec, record);
            self.wal.append(record)?;
            self.wal.flush()?;
        }
        let anchor = txn.record_mut().anchor();
        txn.stamp(anchor);

        let write_set = txn.write_set();
        let conflict = {
            let mut registry = self.registry.lock();
            match find_conflict(&registry, txn.start_lsn(), txn_id, &write_set) {
                Some(other) => {
                    registry.deregister_and_prune(txn_id);
                    Some(other)
                }
                None => {
                    registry.committed.push_back(Arc::new(CommittedTxn::new(
                        txn_id,
                        txn.start_lsn(),
                        anchor.lsn,
                        write_set,
                    )));
                    registry.deregister_and_prune(txn_id);
                    None
                }
            }
        };

        if let Some(other) = conflict {
            // Aborted locally before touching the log again: even if the
            // marker below cannot be written, this transaction must not
            // look active.
            txn.finish(TxnState::Aborted);
            warn!(%txn_id, conflicting = other.as_i64(), "commit conflict, aborted");
            let record = txn.record_mut();
            encode_abort(txn_id, record);
            self.wal.append(record)?;
            self.wal.flush()?;
            return Err(CoreError::conflict(txn_id.as_i64(), other.as_i64()));
        }

        for edit in txn.edits() {
            edit.apply(&*self.partition, anchor.lsn, false);
        }
        txn.finish(TxnState::Committed);
        debug!(%txn_id, commit_lsn = %anchor.lsn, edits = txn.edits().len(), "committed");
        Ok(anchor.lsn)
    }

    /// Aborts a read-write transaction.
    ///
    /// Nothing was logged for it yet, so nothing needs voiding.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not
    /// active.
    pub fn abort(&self, txn: &mut ReadWriteTxn<K>) -> CoreResult<()> {
        txn.ensure_active()?;
        self.registry.lock().deregister_and_prune(txn.txn_id());
        txn.finish(TxnState::Aborted);
        debug!(txn_id = %txn.txn_id(), "aborted");
        Ok(())
    }

    /// Finishes a read-only transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not
    /// active.
    pub fn commit_read_only(&self, txn: &mut ReadOnlyTxn<K>) -> CoreResult<()> {
        self.finish_read_only(txn, TxnState::Committed)
    }

    /// Abandons a read-only transaction. Equivalent to committing it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] if the transaction is not
    /// active.
    pub fn abort_read_only(&self, txn: &mut ReadOnlyTxn<K>) -> CoreResult<()> {
        self.finish_read_only(txn, TxnState::Aborted)
    }

    fn finish_read_only(&self, txn: &mut ReadOnlyTxn<K>, state: TxnState) -> CoreResult<()> {
        if txn.state() != TxnState::Active {
            return Err(CoreError::invalid_operation(format!(
                "{} already finished",
                txn.txn_id()
            )));
        }
        txn.finish(state);
        Ok(())
    }

    /// Checkpoints: makes the partition durable, logs a checkpoint
    /// record, and removes log files no longer needed for recovery.
    ///
    /// Returns the anchor the checkpoint covers.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition sync or the log write fails.
    pub fn checkpoint(&self) -> CoreResult<LogAnchor> {
        // Everything at or below the tail anchor is in the partition
        // once sync returns; files wholly below its file can go.
        self.partition.sync()?;
        let anchor = self.wal.tail_anchor();

        let mut rec = crate::log::UserLogRecord::new();
        encode_checkpoint(anchor, &mut rec);
        self.wal.append(&mut rec)?;
        self.wal.flush()?;

        let removed = self.wal.remove_files_before(anchor.file_number)?;
        info!(%anchor, removed_files = removed, "checkpoint complete");
        Ok(anchor)
    }

    /// Number of active read-write transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry.lock().active.len()
    }

    /// Number of committed transactions retained for validation.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.registry.lock().committed.len()
    }
}

/// Finds a committed transaction whose write set overlaps `write_set`
/// among those that committed at or after `start_lsn`.
fn find_conflict<K: Key>(
    registry: &TxnRegistry<K>,
    start_lsn: Lsn,
    txn_id: TxnId,
    write_set: &HashSet<WriteTarget<K>>,
) -> Option<TxnId> {
    registry
        .committed
        .iter()
        .filter(|c| c.txn_id() != txn_id && c.commit_lsn() >= start_lsn)
        .find(|c| !c.write_set().is_disjoint(write_set))
        .map(|c| c.txn_id())
}
