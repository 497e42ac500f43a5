//! Log edits: the individual changes a transaction records and replay
//! re-applies.
//!
//! A commit record carries a list of [`LogEdit`]s in the order the
//! transaction made them. Each edit knows how to apply itself to a
//! [`Partition`], both at commit time and idempotently during recovery.

use crate::partition::{Partition, StoredEntry};
use crate::types::{IndexId, Lsn, TxnId};
use crate::LogAnchor;
use tracing::debug;

/// The change a transaction makes to a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    /// Insert or replace the entry with the given serialized data.
    Put {
        /// Opaque serialized entry data.
        data: Vec<u8>,
    },
    /// Remove the entry.
    Delete,
}

/// Outcome of resolving an entry change against the current stored state.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EntryOutcome {
    /// Leave the entry as it is.
    Unchanged,
    /// Write this value.
    Write(StoredEntry),
    /// Remove the entry.
    Remove,
}

/// A change to one entry, recorded by a transaction.
#[derive(Debug, Clone)]
pub struct EntryModification<K> {
    txn_id: TxnId,
    anchor: LogAnchor,
    entry_id: K,
    change: EntryChange,
}

impl<K> EntryModification<K> {
    /// Creates an entry modification for a transaction.
    #[must_use]
    pub fn new(txn_id: TxnId, entry_id: K, change: EntryChange) -> Self {
        Self {
            txn_id,
            anchor: LogAnchor::default(),
            entry_id,
            change,
        }
    }

    /// The transaction that made this change.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The entry being changed.
    #[must_use]
    pub fn entry_id(&self) -> &K {
        &self.entry_id
    }

    /// The change itself.
    #[must_use]
    pub fn change(&self) -> &EntryChange {
        &self.change
    }

    /// Resolves this change against the entry's current stored state.
    ///
    /// During recovery, a change whose LSN is at or below the entry's
    /// last-applied LSN has already taken effect and resolves to
    /// [`EntryOutcome::Unchanged`].
    pub(crate) fn resolve(
        &self,
        current: Option<&StoredEntry>,
        change_lsn: Lsn,
        recovery: bool,
    ) -> EntryOutcome {
        if recovery {
            if let Some(entry) = current {
                if entry.last_applied >= change_lsn {
                    return EntryOutcome::Unchanged;
                }
            }
        }
        match &self.change {
            EntryChange::Put { data } => {
                EntryOutcome::Write(StoredEntry::new(data.clone(), change_lsn))
            }
            EntryChange::Delete => {
                if current.is_some() {
                    EntryOutcome::Remove
                } else {
                    EntryOutcome::Unchanged
                }
            }
        }
    }
}

/// The four ways a committed transaction touches an index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexOp {
    /// Add an entry id to the forward slot for a key.
    InsertForward = 1,
    /// Remove an entry id from the forward slot for a key.
    RemoveForward = 2,
    /// Add a key to the reverse slot for an entry id.
    InsertReverse = 3,
    /// Remove a key from the reverse slot for an entry id.
    RemoveReverse = 4,
}

impl IndexOp {
    /// Decodes an operation from its wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::InsertForward),
            2 => Some(Self::RemoveForward),
            3 => Some(Self::InsertReverse),
            4 => Some(Self::RemoveReverse),
            _ => None,
        }
    }

    /// Returns the wire byte for this operation.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A change to one index slot, recorded by a transaction.
#[derive(Debug, Clone)]
pub struct IndexModification<K> {
    txn_id: TxnId,
    anchor: LogAnchor,
    index: IndexId,
    key: Vec<u8>,
    entry_id: K,
    op: IndexOp,
}

impl<K> IndexModification<K> {
    /// Creates an index modification for a transaction.
    #[must_use]
    pub fn new(txn_id: TxnId, index: IndexId, key: Vec<u8>, entry_id: K, op: IndexOp) -> Self {
        Self {
            txn_id,
            anchor: LogAnchor::default(),
            index,
            key,
            entry_id,
            op,
        }
    }

    /// The transaction that made this change.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The index being changed.
    #[must_use]
    pub fn index(&self) -> IndexId {
        self.index
    }

    /// The index key being changed.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The entry id the operation adds or removes.
    #[must_use]
    pub fn entry_id(&self) -> &K {
        &self.entry_id
    }

    /// The operation.
    #[must_use]
    pub fn op(&self) -> IndexOp {
        self.op
    }
}

/// The location a single edit writes to, used as the unit of conflict
/// detection.
///
/// Two transactions conflict when they commit overlapping sets of write
/// targets. An entry and an index slot are distinct targets even when the
/// index slot mentions the same entry id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WriteTarget<K> {
    /// A whole entry.
    Entry(K),
    /// One index slot.
    Index {
        /// The index.
        index: IndexId,
        /// The key within the index.
        key: Vec<u8>,
    },
}

/// A single change recorded in a transaction's commit record.
#[derive(Debug, Clone)]
pub enum LogEdit<K> {
    /// An entry write or delete.
    Entry(EntryModification<K>),
    /// An index slot change.
    Index(IndexModification<K>),
}

impl<K: Clone> LogEdit<K> {
    /// The transaction that made this edit.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        match self {
            Self::Entry(m) => m.txn_id,
            Self::Index(m) => m.txn_id,
        }
    }

    /// The anchor of the commit record carrying this edit, once logged.
    #[must_use]
    pub fn anchor(&self) -> LogAnchor {
        match self {
            Self::Entry(m) => m.anchor,
            Self::Index(m) => m.anchor,
        }
    }

    /// Stamps the anchor of the commit record carrying this edit.
    pub(crate) fn set_anchor(&mut self, anchor: LogAnchor) {
        match self {
            Self::Entry(m) => m.anchor = anchor,
            Self::Index(m) => m.anchor = anchor,
        }
    }

    /// The location this edit writes to.
    #[must_use]
    pub fn target(&self) -> WriteTarget<K> {
        match self {
            Self::Entry(m) => WriteTarget::Entry(m.entry_id.clone()),
            Self::Index(m) => WriteTarget::Index {
                index: m.index,
                key: m.key.clone(),
            },
        }
    }

    /// Applies this edit to a partition.
    ///
    /// `change_lsn` is the LSN of the commit record carrying the edit.
    /// With `recovery` set, application is idempotent: changes the
    /// partition has already seen (per its last-applied LSNs) are
    /// skipped, as are deletes of entries that no longer exist.
    pub fn apply<P: Partition<K>>(&self, partition: &P, change_lsn: Lsn, recovery: bool) {
        match self {
            Self::Entry(m) => {
                let current = partition.entry(&m.entry_id);
                match m.resolve(current.as_ref(), change_lsn, recovery) {
                    EntryOutcome::Unchanged => {
                        if recovery {
                            debug!(txn_id = m.txn_id.as_i64(), %change_lsn, "skipping already-applied entry change");
                        }
                    }
                    EntryOutcome::Write(entry) => {
                        partition.write_entry(m.entry_id.clone(), entry);
                    }
                    EntryOutcome::Remove => {
                        partition.remove_entry(&m.entry_id);
                    }
                }
            }
            Self::Index(m) => {
                if recovery && partition.index_lsn(m.index, &m.key) >= change_lsn {
                    debug!(txn_id = m.txn_id.as_i64(), %change_lsn, "skipping already-applied index change");
                    return;
                }
                partition.apply_index(m.index, &m.key, &m.entry_id, m.op, change_lsn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::MemPartition;

    fn put(txn: i64, id: u64, data: &[u8]) -> LogEdit<u64> {
        LogEdit::Entry(EntryModification::new(
            TxnId::new(txn),
            id,
            EntryChange::Put {
                data: data.to_vec(),
            },
        ))
    }

    #[test]
    fn put_then_delete() {
        let partition = MemPartition::<u64>::new();

        put(1, 10, b"cn=root").apply(&partition, Lsn::new(1), false);
        assert_eq!(partition.entry_data(&10), Some(b"cn=root".to_vec()));

        let del = LogEdit::Entry(EntryModification::new(TxnId::new(2), 10, EntryChange::Delete));
        del.apply(&partition, Lsn::new(2), false);
        assert!(partition.entry(&10).is_none());
    }

    #[test]
    fn recovery_skips_already_applied_entry_change() {
        let partition = MemPartition::<u64>::new();
        partition.write_entry(5, StoredEntry::new(b"new".to_vec(), Lsn::new(5)));

        // A change with the same LSN as the entry's last-applied LSN has
        // already taken effect.
        put(1, 5, b"old").apply(&partition, Lsn::new(5), true);
        assert_eq!(partition.entry_data(&5), Some(b"new".to_vec()));

        // A later change still applies.
        put(2, 5, b"newer").apply(&partition, Lsn::new(6), true);
        assert_eq!(partition.entry_data(&5), Some(b"newer".to_vec()));
    }

    #[test]
    fn recovery_delete_of_missing_entry_is_noop() {
        let partition = MemPartition::<u64>::new();
        let del = LogEdit::Entry(EntryModification::new(TxnId::new(1), 3, EntryChange::Delete));
        del.apply(&partition, Lsn::new(4), true);
        assert!(partition.is_empty());
    }

    #[test]
    fn recovery_skips_already_applied_index_change() {
        let partition = MemPartition::<u64>::new();
        let idx = IndexId::new(1);
        partition.apply_index(idx, b"k", &1, IndexOp::InsertForward, Lsn::new(8));

        let stale = LogEdit::Index(IndexModification::new(
            TxnId::new(1),
            idx,
            b"k".to_vec(),
            1,
            IndexOp::RemoveForward,
        ));
        stale.apply(&partition, Lsn::new(8), true);
        assert_eq!(partition.forward_ids(idx, b"k"), vec![1]);
    }

    #[test]
    fn write_targets_distinguish_entries_from_slots() {
        let entry = put(1, 7, b"x").target();
        let index = LogEdit::<u64>::Index(IndexModification::new(
            TxnId::new(1),
            IndexId::new(0),
            7u64.to_le_bytes().to_vec(),
            7,
            IndexOp::InsertForward,
        ))
        .target();
        assert_ne!(entry, index);
        assert_eq!(entry, WriteTarget::Entry(7));
    }

    #[test]
    fn index_op_bytes_roundtrip() {
        for op in [
            IndexOp::InsertForward,
            IndexOp::RemoveForward,
            IndexOp::InsertReverse,
            IndexOp::RemoveReverse,
        ] {
            assert_eq!(IndexOp::from_byte(op.as_byte()), Some(op));
        }
        assert_eq!(IndexOp::from_byte(0), None);
        assert_eq!(IndexOp::from_byte(5), None);
    }
}
