//! Journal entry format.
//!
//! Each entry is encoded as:
//! - Tag (1 byte): 0 = Store, 1 = Remove
//! - Sequence number (8 bytes, u64 little-endian)
//! - Key length (4 bytes, u32 little-endian)
//! - Key bytes
//! - Data length (4 bytes, u32 little-endian), Store only
//! - Data bytes, Store only
//!
//! Entries are self-delimiting, so a crash that truncates the final entry
//! is detectable on replay: the incomplete tail simply fails to decode.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the fixed entry prefix (tag + sequence + key length).
pub const ENTRY_PREFIX_SIZE: usize = 13;

/// Tag value for a Store entry.
pub const TAG_STORE: u8 = 0;

/// Tag value for a Remove entry.
pub const TAG_REMOVE: u8 = 1;

/// A single journaled mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// A key was stored with the given value.
    Store {
        /// Sequence number, strictly increasing in append order.
        seq: u64,
        /// The key bytes.
        key: Vec<u8>,
        /// The value bytes.
        value: Vec<u8>,
    },
    /// A key was removed (tombstone).
    Remove {
        /// Sequence number, strictly increasing in append order.
        seq: u64,
        /// The key bytes.
        key: Vec<u8>,
    },
}

impl JournalRecord {
    /// The entry's sequence number.
    pub fn seq(&self) -> u64 {
        match self {
            JournalRecord::Store { seq, .. } => *seq,
            JournalRecord::Remove { seq, .. } => *seq,
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &[u8] {
        match self {
            JournalRecord::Store { key, .. } => key,
            JournalRecord::Remove { key, .. } => key,
        }
    }

    /// Encodes the entry into bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        match self {
            JournalRecord::Store { seq, key, value } => {
                buf.put_u8(TAG_STORE);
                buf.put_u64_le(*seq);
                buf.put_u32_le(key.len() as u32);
                buf.put_slice(key);
                buf.put_u32_le(value.len() as u32);
                buf.put_slice(value);
            }
            JournalRecord::Remove { seq, key } => {
                buf.put_u8(TAG_REMOVE);
                buf.put_u64_le(*seq);
                buf.put_u32_le(key.len() as u32);
                buf.put_slice(key);
            }
        }
        buf.to_vec()
    }

    /// Decodes an entry from the front of `data`.
    ///
    /// Returns the entry and the number of bytes consumed. A buffer that
    /// ends mid-entry is corruption (a torn tail, to the caller).
    pub fn decode(mut data: &[u8]) -> Result<(Self, usize)> {
        let total = data.len();
        if total < ENTRY_PREFIX_SIZE {
            return Err(Error::corruption(format!(
                "journal entry prefix truncated: {} bytes",
                total
            )));
        }

        let tag = data.get_u8();
        let seq = data.get_u64_le();
        let key_len = data.get_u32_le() as usize;

        if data.len() < key_len {
            return Err(Error::corruption("journal entry key truncated"));
        }
        let key = data[..key_len].to_vec();
        data.advance(key_len);

        match tag {
            TAG_STORE => {
                if data.len() < 4 {
                    return Err(Error::corruption("journal entry value length truncated"));
                }
                let value_len = data.get_u32_le() as usize;
                if data.len() < value_len {
                    return Err(Error::corruption("journal entry value truncated"));
                }
                let value = data[..value_len].to_vec();
                data.advance(value_len);
                let consumed = total - data.len();
                Ok((JournalRecord::Store { seq, key, value }, consumed))
            }
            TAG_REMOVE => {
                let consumed = total - data.len();
                Ok((JournalRecord::Remove { seq, key }, consumed))
            }
            other => Err(Error::corruption(format!(
                "invalid journal entry tag: {}",
                other
            ))),
        }
    }

    /// The encoded size of this entry.
    pub fn encoded_size(&self) -> usize {
        match self {
            JournalRecord::Store { key, value, .. } => {
                ENTRY_PREFIX_SIZE + key.len() + 4 + value.len()
            }
            JournalRecord::Remove { key, .. } => ENTRY_PREFIX_SIZE + key.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_encode_decode() {
        let record = JournalRecord::Store {
            seq: 42,
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        };

        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_size());
        assert_eq!(encoded[0], TAG_STORE);

        let (decoded, consumed) = JournalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_remove_encode_decode() {
        let record = JournalRecord::Remove {
            seq: 7,
            key: b"gone".to_vec(),
        };

        let encoded = record.encode();
        assert_eq!(encoded[0], TAG_REMOVE);

        let (decoded, consumed) = JournalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn test_store_with_empty_value() {
        let record = JournalRecord::Store {
            seq: 1,
            key: b"k".to_vec(),
            value: Vec::new(),
        };
        let encoded = record.encode();
        let (decoded, _) = JournalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_back_to_back() {
        let first = JournalRecord::Store {
            seq: 1,
            key: b"a".to_vec(),
            value: b"1".to_vec(),
        };
        let second = JournalRecord::Remove {
            seq: 2,
            key: b"a".to_vec(),
        };

        let mut bytes = first.encode();
        bytes.extend_from_slice(&second.encode());

        let (d1, n1) = JournalRecord::decode(&bytes).unwrap();
        assert_eq!(d1, first);
        let (d2, n2) = JournalRecord::decode(&bytes[n1..]).unwrap();
        assert_eq!(d2, second);
        assert_eq!(n1 + n2, bytes.len());
    }

    #[test]
    fn test_decode_truncated() {
        let record = JournalRecord::Store {
            seq: 9,
            key: b"key".to_vec(),
            value: b"value".to_vec(),
        };
        let encoded = record.encode();

        // Every proper prefix must fail as a torn tail.
        for cut in 1..encoded.len() {
            let result = JournalRecord::decode(&encoded[..cut]);
            assert!(result.is_err(), "prefix of {} bytes decoded", cut);
        }
    }

    #[test]
    fn test_decode_bad_tag() {
        let mut encoded = JournalRecord::Remove {
            seq: 1,
            key: b"k".to_vec(),
        }
        .encode();
        encoded[0] = 0xCC;

        let result = JournalRecord::decode(&encoded);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }
}
