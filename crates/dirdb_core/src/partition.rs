//! The partition seam: the entry/index store the kernel writes into.
//!
//! The kernel never owns the store; it reaches it through the
//! [`Partition`] trait when committing and when replaying the log after a
//! crash. [`MemPartition`] is the in-memory reference implementation used
//! throughout the tests.

use crate::types::{IndexId, Key, Lsn};
use crate::CoreResult;
use crate::edit::IndexOp;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

/// An entry's stored value together with the LSN of the change that last
/// wrote it.
///
/// The LSN makes replay idempotent: re-applying a change whose LSN is at
/// or below `last_applied` is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Opaque serialized entry data.
    pub data: Vec<u8>,
    /// LSN of the change that last wrote this entry.
    pub last_applied: Lsn,
}

impl StoredEntry {
    /// Creates a stored entry.
    #[must_use]
    pub fn new(data: Vec<u8>, last_applied: Lsn) -> Self {
        Self { data, last_applied }
    }
}

/// The entry/index store a transaction manager commits into.
///
/// A partition holds entries keyed by `K` plus forward and reverse index
/// slots. Every mutation carries the LSN of the log record driving it so
/// the store can persist it alongside the data, which is what makes crash
/// replay idempotent.
pub trait Partition<K>: Send + Sync {
    /// Returns the current stored entry for `entry_id`, if present.
    fn entry(&self, entry_id: &K) -> Option<StoredEntry>;

    /// Writes (inserts or replaces) an entry.
    fn write_entry(&self, entry_id: K, entry: StoredEntry);

    /// Removes an entry. Removing a missing entry is a no-op.
    fn remove_entry(&self, entry_id: &K);

    /// Returns the LSN of the last change applied to the given index
    /// slot, or [`Lsn::UNKNOWN`] if the slot has never been touched.
    fn index_lsn(&self, index: IndexId, key: &[u8]) -> Lsn;

    /// Applies an index operation to the slot `(index, key)`, recording
    /// `change_lsn` as the slot's last-applied LSN.
    fn apply_index(&self, index: IndexId, key: &[u8], entry_id: &K, op: IndexOp, change_lsn: Lsn);

    /// Makes all previously applied changes durable.
    ///
    /// Called before a checkpoint record is logged; once this returns the
    /// log below the checkpoint is no longer needed for recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be persisted.
    fn sync(&self) -> CoreResult<()>;
}

/// In-memory partition.
///
/// Forward slots map an index key to the set of entry ids carrying it;
/// reverse slots map an entry id back to the index keys it carries, which
/// is what lets an update remove stale index values without re-reading the
/// old entry.
#[derive(Debug, Default)]
pub struct MemPartition<K: Key> {
    entries: RwLock<HashMap<K, StoredEntry>>,
    forward: RwLock<HashMap<(IndexId, Vec<u8>), BTreeSet<K>>>,
    reverse: RwLock<HashMap<(IndexId, K), BTreeSet<Vec<u8>>>>,
    index_lsns: RwLock<HashMap<(IndexId, Vec<u8>), Lsn>>,
}

impl<K: Key> MemPartition<K> {
    /// Creates an empty partition.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            forward: RwLock::new(HashMap::new()),
            reverse: RwLock::new(HashMap::new()),
            index_lsns: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a copy of an entry's data, if present.
    #[must_use]
    pub fn entry_data(&self, entry_id: &K) -> Option<Vec<u8>> {
        self.entries.read().get(entry_id).map(|e| e.data.clone())
    }

    /// Returns the entry ids in the forward slot `(index, key)`, sorted.
    #[must_use]
    pub fn forward_ids(&self, index: IndexId, key: &[u8]) -> Vec<K> {
        self.forward
            .read()
            .get(&(index, key.to_vec()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the index keys in the reverse slot `(index, entry_id)`,
    /// sorted.
    #[must_use]
    pub fn reverse_keys(&self, index: IndexId, entry_id: &K) -> Vec<Vec<u8>> {
        self.reverse
            .read()
            .get(&(index, entry_id.clone()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl<K: Key> Partition<K> for MemPartition<K> {
    fn entry(&self, entry_id: &K) -> Option<StoredEntry> {
        self.entries.read().get(entry_id).cloned()
    }

    fn write_entry(&self, entry_id: K, entry: StoredEntry) {
        self.entries.write().insert(entry_id, entry);
    }

    fn remove_entry(&self, entry_id: &K) {
        self.entries.write().remove(entry_id);
    }

    fn index_lsn(&self, index: IndexId, key: &[u8]) -> Lsn {
        self.index_lsns
            .read()
            .get(&(index, key.to_vec()))
            .copied()
            .unwrap_or(Lsn::UNKNOWN)
    }

    fn apply_index(&self, index: IndexId, key: &[u8], entry_id: &K, op: IndexOp, change_lsn: Lsn) {
        match op {
            IndexOp::InsertForward => {
                self.forward
                    .write()
                    .entry((index, key.to_vec()))
                    .or_default()
                    .insert(entry_id.clone());
            }
            IndexOp::RemoveForward => {
                let mut forward = self.forward.write();
                if let Some(set) = forward.get_mut(&(index, key.to_vec())) {
                    set.remove(entry_id);
                    if set.is_empty() {
                        forward.remove(&(index, key.to_vec()));
                    }
                }
            }
            IndexOp::InsertReverse => {
                self.reverse
                    .write()
                    .entry((index, entry_id.clone()))
                    .or_default()
                    .insert(key.to_vec());
            }
            IndexOp::RemoveReverse => {
                let mut reverse = self.reverse.write();
                if let Some(set) = reverse.get_mut(&(index, entry_id.clone())) {
                    set.remove(key);
                    if set.is_empty() {
                        reverse.remove(&(index, entry_id.clone()));
                    }
                }
            }
        }
        self.index_lsns
            .write()
            .insert((index, key.to_vec()), change_lsn);
    }

    fn sync(&self) -> CoreResult<()> {
        // Nothing buffered; everything already lives in memory.
        Ok(())
    }
}
