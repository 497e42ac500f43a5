//! Crash recovery by log replay.
//!
//! Replay runs in two passes. An abort marker voids a commit record that
//! *precedes* it in the log, so the set of voided transactions must be
//! known before any commit is applied: the first pass collects abort
//! markers (plus the id and LSN high-water marks), the second applies the
//! edits of every surviving commit in log order.
//!
//! Application is idempotent. Entries and index slots remember the LSN of
//! the change that last wrote them, and replay skips changes the store
//! has already seen, so replaying from the start of the retained log is
//! always safe no matter where the last checkpoint was.

use crate::error::CoreResult;
use crate::log::{decode_txn_id, LogRecord, LogRecordKind, UserLogRecord, Wal};
use crate::partition::Partition;
use crate::types::{Key, KeyCodec, Lsn, TxnId};
use std::collections::HashSet;
use tracing::{debug, info};

/// What a replay found and applied.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Commit records whose edits were applied.
    pub replayed_commits: usize,
    /// Commit records voided by a later abort marker.
    pub voided_commits: usize,
    /// Highest LSN seen in the log, or [`Lsn::UNKNOWN`] for an empty log.
    pub max_lsn: Lsn,
    /// Highest transaction id seen in the log.
    pub max_txn_id: i64,
}

/// Replays the log into a partition.
///
/// The log must already be open (and therefore tail-repaired); replay
/// itself treats any scan failure as fatal.
///
/// # Errors
///
/// Returns an error if the log cannot be scanned or decoded.
pub fn replay<K: Key, P: Partition<K>>(
    wal: &Wal,
    partition: &P,
    codec: &dyn KeyCodec<K>,
) -> CoreResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut rec = UserLogRecord::new();

    // Pass 1: find voided transactions and the high-water marks.
    let mut voided: HashSet<TxnId> = HashSet::new();
    let mut scanner = wal.scanner()?;
    while scanner.next_record(&mut rec)? {
        report.max_lsn = rec.anchor().lsn;
        match rec.kind() {
            LogRecordKind::Commit => {
                let txn_id = decode_txn_id(rec.payload())?;
                report.max_txn_id = report.max_txn_id.max(txn_id.as_i64());
            }
            LogRecordKind::Abort => {
                let txn_id = decode_txn_id(rec.payload())?;
                report.max_txn_id = report.max_txn_id.max(txn_id.as_i64());
                voided.insert(txn_id);
            }
            LogRecordKind::Checkpoint => {}
        }
    }

    // Pass 2: apply surviving commits in log order.
    let mut scanner = wal.scanner()?;
    while scanner.next_record(&mut rec)? {
        if rec.kind() != LogRecordKind::Commit {
            continue;
        }
        let change_lsn = rec.anchor().lsn;
        match LogRecord::decode(rec.kind(), rec.payload(), codec)? {
            LogRecord::Commit { txn_id, edits } => {
                if voided.contains(&txn_id) {
                    debug!(%txn_id, %change_lsn, "skipping voided commit");
                    report.voided_commits += 1;
                    continue;
                }
                for edit in &edits {
                    edit.apply(partition, change_lsn, true);
                }
                report.replayed_commits += 1;
            }
            _ => {}
        }
    }

    info!(
        replayed = report.replayed_commits,
        voided = report.voided_commits,
        max_lsn = %report.max_lsn,
        "log replay complete"
    );
    Ok(report)
}
