//! Log record framing and payload codec.
//!
//! Every record is framed as:
//!
//! ```text
//! magic "DWAL" | version u16 | kind u8 | lsn i64 | payload len u32 | payload | crc32
//! ```
//!
//! All integers are little-endian. The CRC covers the header and payload,
//! so a flipped bit anywhere in the frame is detected. The frame is built
//! by the log at append time; this module owns the payload encodings for
//! the three record kinds.

use crate::edit::{
    EntryChange, EntryModification, IndexModification, IndexOp, LogEdit,
};
use crate::error::{CoreError, CoreResult};
use crate::types::{IndexId, KeyCodec, Lsn, TxnId};
use crate::LogAnchor;

/// Magic bytes opening every record frame.
pub(crate) const LOG_MAGIC: [u8; 4] = *b"DWAL";

/// Current frame format version.
pub(crate) const LOG_VERSION: u16 = 1;

/// Frame header size: magic (4) + version (2) + kind (1) + lsn (8) +
/// payload length (4).
pub(crate) const HEADER_SIZE: usize = 19;

/// Trailing CRC size.
pub(crate) const CRC_SIZE: usize = 4;

const EDIT_TAG_ENTRY: u8 = 1;
const EDIT_TAG_INDEX: u8 = 2;

const CHANGE_TAG_PUT: u8 = 1;
const CHANGE_TAG_DELETE: u8 = 2;

/// The three record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordKind {
    /// A transaction's full list of edits, logged at commit.
    Commit = 1,
    /// Voids an earlier commit record whose validation failed.
    Abort = 2,
    /// Marks that the partition was durable up to an anchor.
    Checkpoint = 3,
}

impl LogRecordKind {
    /// Decodes a kind from its wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Commit),
            2 => Some(Self::Abort),
            3 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Returns the wire byte for this kind.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A reusable record buffer.
///
/// Holds one record's payload plus its kind and, once appended or
/// scanned, its anchor. Reusing one across appends or scan iterations
/// avoids reallocating the payload buffer.
#[derive(Debug)]
pub struct UserLogRecord {
    buf: Vec<u8>,
    kind: LogRecordKind,
    anchor: LogAnchor,
}

impl UserLogRecord {
    /// Creates an empty record buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty record buffer with the given payload capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            kind: LogRecordKind::Commit,
            anchor: LogAnchor::default(),
        }
    }

    /// The record's payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// The record's kind.
    #[must_use]
    pub fn kind(&self) -> LogRecordKind {
        self.kind
    }

    /// The record's durable position, once appended or scanned.
    #[must_use]
    pub fn anchor(&self) -> LogAnchor {
        self.anchor
    }

    /// Clears the payload (retaining capacity) and sets the kind.
    pub fn reset(&mut self, kind: LogRecordKind) {
        self.buf.clear();
        self.kind = kind;
        self.anchor = LogAnchor::default();
    }

    /// Mutable access to the payload buffer for encoding.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    pub(crate) fn set_anchor(&mut self, anchor: LogAnchor) {
        self.anchor = anchor;
    }
}

impl Default for UserLogRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded log record.
#[derive(Debug)]
pub enum LogRecord<K> {
    /// A transaction's committed edits.
    Commit {
        /// The committing transaction.
        txn_id: TxnId,
        /// Its edits, in the order they were made.
        edits: Vec<LogEdit<K>>,
    },
    /// Voids the commit record of `txn_id`.
    Abort {
        /// The voided transaction.
        txn_id: TxnId,
    },
    /// The partition was durable up to `anchor` when this was logged.
    Checkpoint {
        /// The durable tail position at checkpoint time.
        anchor: LogAnchor,
    },
}

/// Encodes a commit payload into `rec`.
pub(crate) fn encode_commit<K: 'static>(
    txn_id: TxnId,
    edits: &[LogEdit<K>],
    codec: &dyn KeyCodec<K>,
    rec: &mut UserLogRecord,
) {
    rec.reset(LogRecordKind::Commit);
    let buf = rec.buffer_mut();
    buf.extend_from_slice(&txn_id.as_i64().to_le_bytes());
    buf.extend_from_slice(&(edits.len() as u32).to_le_bytes());
    for edit in edits {
        match edit {
            LogEdit::Entry(m) => {
                buf.push(EDIT_TAG_ENTRY);
                codec.encode(m.entry_id(), buf);
                match m.change() {
                    EntryChange::Put { data } => {
                        buf.push(CHANGE_TAG_PUT);
                        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                        buf.extend_from_slice(data);
                    }
                    EntryChange::Delete => buf.push(CHANGE_TAG_DELETE),
                }
            }
            LogEdit::Index(m) => {
                buf.push(EDIT_TAG_INDEX);
                buf.extend_from_slice(&m.index().as_u32().to_le_bytes());
                buf.extend_from_slice(&(m.key().len() as u32).to_le_bytes());
                buf.extend_from_slice(m.key());
                codec.encode(m.entry_id(), buf);
                buf.push(m.op().as_byte());
            }
        }
    }
}

/// Encodes an abort payload into `rec`.
pub(crate) fn encode_abort(txn_id: TxnId, rec: &mut UserLogRecord) {
    rec.reset(LogRecordKind::Abort);
    rec.buffer_mut()
        .extend_from_slice(&txn_id.as_i64().to_le_bytes());
}

/// Encodes a checkpoint payload into `rec`.
pub(crate) fn encode_checkpoint(anchor: LogAnchor, rec: &mut UserLogRecord) {
    rec.reset(LogRecordKind::Checkpoint);
    let buf = rec.buffer_mut();
    buf.extend_from_slice(&anchor.file_number.to_le_bytes());
    buf.extend_from_slice(&anchor.offset.to_le_bytes());
    buf.extend_from_slice(&anchor.lsn.as_i64().to_le_bytes());
}

/// Reads the transaction id opening a commit or abort payload without
/// decoding the rest.
pub(crate) fn decode_txn_id(payload: &[u8]) -> CoreResult<TxnId> {
    let mut cursor = 0;
    Ok(TxnId::new(read_i64(payload, &mut cursor)?))
}

impl<K: 'static> LogRecord<K> {
    /// Decodes a record from its kind and payload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLog`] if the payload is truncated,
    /// carries unknown tags, or has trailing bytes.
    pub fn decode(
        kind: LogRecordKind,
        payload: &[u8],
        codec: &dyn KeyCodec<K>,
    ) -> CoreResult<Self> {
        let mut cursor = 0;
        let record = match kind {
            LogRecordKind::Commit => {
                let txn_id = TxnId::new(read_i64(payload, &mut cursor)?);
                let count = read_u32(payload, &mut cursor)? as usize;
                let mut edits = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    edits.push(decode_edit(txn_id, payload, &mut cursor, codec)?);
                }
                Self::Commit { txn_id, edits }
            }
            LogRecordKind::Abort => Self::Abort {
                txn_id: TxnId::new(read_i64(payload, &mut cursor)?),
            },
            LogRecordKind::Checkpoint => {
                let file_number = read_u64(payload, &mut cursor)?;
                let offset = read_u64(payload, &mut cursor)?;
                let lsn = Lsn::new(read_i64(payload, &mut cursor)?);
                Self::Checkpoint {
                    anchor: LogAnchor::new(file_number, offset, lsn),
                }
            }
        };
        if cursor != payload.len() {
            return Err(CoreError::invalid_log(format!(
                "{} trailing bytes after record payload",
                payload.len() - cursor
            )));
        }
        Ok(record)
    }
}

fn decode_edit<K: 'static>(
    txn_id: TxnId,
    payload: &[u8],
    cursor: &mut usize,
    codec: &dyn KeyCodec<K>,
) -> CoreResult<LogEdit<K>> {
    match read_u8(payload, cursor)? {
        EDIT_TAG_ENTRY => {
            let entry_id = codec.decode(payload, cursor)?;
            let change = match read_u8(payload, cursor)? {
                CHANGE_TAG_PUT => {
                    let len = read_u32(payload, cursor)? as usize;
                    EntryChange::Put {
                        data: read_bytes(payload, cursor, len)?.to_vec(),
                    }
                }
                CHANGE_TAG_DELETE => EntryChange::Delete,
                tag => {
                    return Err(CoreError::invalid_log(format!(
                        "unknown entry change tag {tag}"
                    )))
                }
            };
            Ok(LogEdit::Entry(EntryModification::new(txn_id, entry_id, change)))
        }
        EDIT_TAG_INDEX => {
            let index = IndexId::new(read_u32(payload, cursor)?);
            let key_len = read_u32(payload, cursor)? as usize;
            let key = read_bytes(payload, cursor, key_len)?.to_vec();
            let entry_id = codec.decode(payload, cursor)?;
            let op_byte = read_u8(payload, cursor)?;
            let op = IndexOp::from_byte(op_byte).ok_or_else(|| {
                CoreError::invalid_log(format!("unknown index op {op_byte}"))
            })?;
            Ok(LogEdit::Index(IndexModification::new(
                txn_id, index, key, entry_id, op,
            )))
        }
        tag => Err(CoreError::invalid_log(format!("unknown edit tag {tag}"))),
    }
}

fn read_u8(payload: &[u8], cursor: &mut usize) -> CoreResult<u8> {
    let byte = *payload
        .get(*cursor)
        .ok_or_else(|| CoreError::invalid_log("unexpected end of record payload"))?;
    *cursor += 1;
    Ok(byte)
}

fn read_u32(payload: &[u8], cursor: &mut usize) -> CoreResult<u32> {
    let bytes: [u8; 4] = read_bytes(payload, cursor, 4)?
        .try_into()
        .map_err(|_| CoreError::invalid_log("unexpected end of record payload"))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64(payload: &[u8], cursor: &mut usize) -> CoreResult<u64> {
    let bytes: [u8; 8] = read_bytes(payload, cursor, 8)?
        .try_into()
        .map_err(|_| CoreError::invalid_log("unexpected end of record payload"))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_i64(payload: &[u8], cursor: &mut usize) -> CoreResult<i64> {
    let bytes: [u8; 8] = read_bytes(payload, cursor, 8)?
        .try_into()
        .map_err(|_| CoreError::invalid_log("unexpected end of record payload"))?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_bytes<'a>(payload: &'a [u8], cursor: &mut usize, len: usize) -> CoreResult<&'a [u8]> {
    let end = cursor
        .checked_add(len)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| CoreError::invalid_log("unexpected end of record payload"))?;
    let bytes = &payload[*cursor..end];
    *cursor = end;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::U64KeyCodec;

    fn sample_edits() -> Vec<LogEdit<u64>> {
        vec![
            LogEdit::Entry(EntryModification::new(
                TxnId::new(9),
                42,
                EntryChange::Put {
                    data: b"uid=grace,ou=eng".to_vec(),
                },
            )),
            LogEdit::Index(IndexModification::new(
                TxnId::new(9),
                IndexId::new(2),
                b"grace".to_vec(),
                42,
                IndexOp::InsertForward,
            )),
            LogEdit::Entry(EntryModification::new(TxnId::new(9), 7, EntryChange::Delete)),
        ]
    }

    #[test]
    fn commit_roundtrip() {
        let codec = U64KeyCodec;
        let mut rec = UserLogRecord::new();
        encode_commit(TxnId::new(9), &sample_edits(), &codec, &mut rec);

        assert_eq!(rec.kind(), LogRecordKind::Commit);
        assert_eq!(decode_txn_id(rec.payload()).unwrap(), TxnId::new(9));

        let decoded = LogRecord::decode(rec.kind(), rec.payload(), &codec).unwrap();
        match decoded {
            LogRecord::Commit { txn_id, edits } => {
                assert_eq!(txn_id, TxnId::new(9));
                assert_eq!(edits.len(), 3);
                match &edits[0] {
                    LogEdit::Entry(m) => {
                        assert_eq!(*m.entry_id(), 42);
                        assert_eq!(
                            *m.change(),
                            EntryChange::Put {
                                data: b"uid=grace,ou=eng".to_vec()
                            }
                        );
                    }
                    other => panic!("expected entry edit, got {other:?}"),
                }
                match &edits[1] {
                    LogEdit::Index(m) => {
                        assert_eq!(m.index(), IndexId::new(2));
                        assert_eq!(m.key(), b"grace");
                        assert_eq!(m.op(), IndexOp::InsertForward);
                    }
                    other => panic!("expected index edit, got {other:?}"),
                }
                match &edits[2] {
                    LogEdit::Entry(m) => assert_eq!(*m.change(), EntryChange::Delete),
                    other => panic!("expected entry edit, got {other:?}"),
                }
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn abort_roundtrip() {
        let mut rec = UserLogRecord::new();
        encode_abort(TxnId::new(3), &mut rec);
        match LogRecord::<u64>::decode(rec.kind(), rec.payload(), &U64KeyCodec).unwrap() {
            LogRecord::Abort { txn_id } => assert_eq!(txn_id, TxnId::new(3)),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[test]
    fn checkpoint_roundtrip() {
        let mut rec = UserLogRecord::new();
        let anchor = LogAnchor::new(4, 1024, Lsn::new(77));
        encode_checkpoint(anchor, &mut rec);
        match LogRecord::<u64>::decode(rec.kind(), rec.payload(), &U64KeyCodec).unwrap() {
            LogRecord::Checkpoint { anchor: decoded } => assert_eq!(decoded, anchor),
            other => panic!("expected checkpoint, got {other:?}"),
        }
    }

    #[test]
    fn truncated_payload_is_invalid() {
        let codec = U64KeyCodec;
        let mut rec = UserLogRecord::new();
        encode_commit(TxnId::new(1), &sample_edits(), &codec, &mut rec);

        let short = &rec.payload()[..rec.payload().len() - 1];
        assert!(LogRecord::decode(LogRecordKind::Commit, short, &codec).is_err());
    }

    #[test]
    fn trailing_bytes_are_invalid() {
        let mut rec = UserLogRecord::new();
        encode_abort(TxnId::new(1), &mut rec);
        rec.buffer_mut().push(0);
        assert!(LogRecord::<u64>::decode(LogRecordKind::Abort, rec.payload(), &U64KeyCodec).is_err());
    }

    #[test]
    fn unknown_edit_tag_is_invalid() {
        let mut rec = UserLogRecord::new();
        rec.reset(LogRecordKind::Commit);
        let buf = rec.buffer_mut();
        buf.extend_from_slice(&1i64.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.push(9); // bad tag
        assert!(LogRecord::<u64>::decode(rec.kind(), rec.payload(), &U64KeyCodec).is_err());
    }

    #[test]
    fn reset_retains_capacity() {
        let mut rec = UserLogRecord::with_capacity(256);
        rec.buffer_mut().extend_from_slice(&[0u8; 200]);
        let capacity = rec.buffer_mut().capacity();
        rec.reset(LogRecordKind::Abort);
        assert!(rec.payload().is_empty());
        assert_eq!(rec.kind(), LogRecordKind::Abort);
        assert!(rec.buffer_mut().capacity() >= capacity.min(256));
    }
}
