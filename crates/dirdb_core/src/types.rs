//! Core type definitions for the dirdb kernel.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use std::hash::Hash;

/// Log sequence number.
///
/// LSNs are assigned at log append under the single-writer lock, strictly
/// increase in append order, and totally order all committed changes.
/// [`Lsn::UNKNOWN`] marks a position that has not been assigned yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lsn(pub i64);

impl Lsn {
    /// Sentinel for "not yet assigned".
    pub const UNKNOWN: Lsn = Lsn(i64::MIN);

    /// Creates a new LSN.
    #[must_use]
    pub const fn new(lsn: i64) -> Self {
        Self(lsn)
    }

    /// Returns the raw LSN value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns true if this LSN has been assigned.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.0 != i64::MIN
    }
}

impl Default for Lsn {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "lsn:{}", self.0)
        } else {
            write!(f, "lsn:?")
        }
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically assigned and never reused within a
/// process lifetime; recovery seeds the counter past the highest id found
/// in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub i64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier for an index within the partition.
///
/// Index IDs are stable and assigned by the store when indices are created
/// (one per indexed attribute in a directory deployment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexId(pub u32);

impl IndexId {
    /// Creates a new index ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "idx:{}", self.0)
    }
}

/// Marker trait for entry-identifier key types.
///
/// The kernel is generic over the key identifying entries in the store: it
/// must be totally ordered, hashable, and cheaply cloneable. The typical
/// concrete key is a 64-bit entry-id counter.
pub trait Key: Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static> Key for T {}

/// Pluggable serializer for the key type.
///
/// Injected into the transaction manager and the record codec so log
/// records can carry arbitrary key types. Variable-size keys must encode
/// their own length.
pub trait KeyCodec<K>: Send + Sync + 'static {
    /// Appends the encoded key to `buf`.
    fn encode(&self, key: &K, buf: &mut Vec<u8>);

    /// Decodes a key from `payload` starting at `*cursor`, advancing the
    /// cursor past the consumed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidLog`] if the payload is exhausted or
    /// malformed.
    fn decode(&self, payload: &[u8], cursor: &mut usize) -> CoreResult<K>;
}

/// Codec for `u64` keys (fixed 8-byte little-endian).
#[derive(Debug, Clone, Copy, Default)]
pub struct U64KeyCodec;

impl KeyCodec<u64> for U64KeyCodec {
    fn encode(&self, key: &u64, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&key.to_le_bytes());
    }

    fn decode(&self, payload: &[u8], cursor: &mut usize) -> CoreResult<u64> {
        if *cursor + 8 > payload.len() {
            return Err(CoreError::invalid_log("unexpected end of key"));
        }
        let bytes: [u8; 8] = payload[*cursor..*cursor + 8]
            .try_into()
            .map_err(|_| CoreError::invalid_log("invalid u64 key"))?;
        *cursor += 8;
        Ok(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_unknown_is_not_known() {
        assert!(!Lsn::UNKNOWN.is_known());
        assert!(Lsn::new(0).is_known());
        assert!(Lsn::UNKNOWN < Lsn::new(i64::MIN + 1));
    }

    #[test]
    fn lsn_ordering() {
        assert!(Lsn::new(1) < Lsn::new(2));
        assert_eq!(format!("{}", Lsn::new(7)), "lsn:7");
        assert_eq!(format!("{}", Lsn::UNKNOWN), "lsn:?");
    }

    #[test]
    fn txn_id_display() {
        assert_eq!(format!("{}", TxnId::new(42)), "txn:42");
    }

    #[test]
    fn u64_codec_roundtrip() {
        let codec = U64KeyCodec;
        let mut buf = Vec::new();
        codec.encode(&0xDEAD_BEEF_u64, &mut buf);

        let mut cursor = 0;
        let decoded = codec.decode(&buf, &mut cursor).unwrap();
        assert_eq!(decoded, 0xDEAD_BEEF);
        assert_eq!(cursor, 8);
    }

    #[test]
    fn u64_codec_short_payload_fails() {
        let codec = U64KeyCodec;
        let mut cursor = 0;
        assert!(codec.decode(&[1, 2, 3], &mut cursor).is_err());
    }
}
