//! Record codec shared by the constant table and the reorganizer.
//!
//! A record is encoded as:
//! - Key length (4 bytes, u32 little-endian)
//! - Data length (4 bytes, u32 little-endian)
//! - Key bytes
//! - Data bytes
//!
//! Decoding is arena-based: callers hand in the byte region that is allowed
//! to contain records and every length field is validated against it before
//! any slice is taken. Length fields combined with an offset can therefore
//! never index outside the region, and a record that claims to run past the
//! region boundary is reported as corruption.

use crate::error::{Error, Result};
use bytes::BufMut;

/// Size of the fixed record header (key length + data length).
pub const RECORD_HEADER_SIZE: usize = 8;

/// Encodes a record into `buf`.
pub fn encode_record(buf: &mut impl BufMut, key: &[u8], data: &[u8]) {
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(key);
    buf.put_slice(data);
}

/// The encoded size of a record with the given key and data lengths.
pub fn encoded_len(key_len: usize, data_len: usize) -> usize {
    RECORD_HEADER_SIZE + key_len + data_len
}

/// A record decoded in place from an arena.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedRecord<'a> {
    /// The key bytes.
    pub key: &'a [u8],
    /// The data bytes.
    pub data: &'a [u8],
    /// Offset of the byte following this record within the arena.
    pub next: usize,
}

/// Decodes the record starting at `offset` within `arena[..end]`.
///
/// `end` is the declared end of the records region; a record whose header or
/// payload would cross it is corruption. All arithmetic is done in u64 so
/// hostile length fields cannot overflow usize on 32-bit targets.
pub fn decode_record(arena: &[u8], offset: usize, end: usize) -> Result<DecodedRecord<'_>> {
    if end > arena.len() || offset > end {
        return Err(Error::corruption(format!(
            "record region [{}, {}) outside arena of {} bytes",
            offset,
            end,
            arena.len()
        )));
    }
    if (end - offset) < RECORD_HEADER_SIZE {
        return Err(Error::corruption(format!(
            "truncated record header at offset {}",
            offset
        )));
    }

    let key_len = read_u32(arena, offset) as u64;
    let data_len = read_u32(arena, offset + 4) as u64;
    let total = RECORD_HEADER_SIZE as u64 + key_len + data_len;

    if total > (end - offset) as u64 {
        return Err(Error::corruption(format!(
            "record at offset {} claims {} bytes but region ends after {}",
            offset,
            total,
            end - offset
        )));
    }

    let key_start = offset + RECORD_HEADER_SIZE;
    let key_end = key_start + key_len as usize;
    let data_end = key_end + data_len as usize;

    Ok(DecodedRecord {
        key: &arena[key_start..key_end],
        data: &arena[key_end..data_end],
        next: data_end,
    })
}

/// Reads a little-endian u32 at `offset`. Caller guarantees bounds.
pub(crate) fn read_u32(arena: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        arena[offset],
        arena[offset + 1],
        arena[offset + 2],
        arena[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_decode() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, b"key1", b"value1");

        assert_eq!(buf.len(), encoded_len(4, 6));

        let rec = decode_record(&buf, 0, buf.len()).unwrap();
        assert_eq!(rec.key, b"key1");
        assert_eq!(rec.data, b"value1");
        assert_eq!(rec.next, buf.len());
    }

    #[test]
    fn test_empty_key_and_value() {
        // The format permits zero-length keys and values.
        let mut buf = BytesMut::new();
        encode_record(&mut buf, b"", b"");

        let rec = decode_record(&buf, 0, buf.len()).unwrap();
        assert_eq!(rec.key, b"");
        assert_eq!(rec.data, b"");
        assert_eq!(rec.next, RECORD_HEADER_SIZE);
    }

    #[test]
    fn test_sequential_records() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, b"a", b"1");
        encode_record(&mut buf, b"bb", b"22");

        let first = decode_record(&buf, 0, buf.len()).unwrap();
        assert_eq!(first.key, b"a");
        let second = decode_record(&buf, first.next, buf.len()).unwrap();
        assert_eq!(second.key, b"bb");
        assert_eq!(second.data, b"22");
        assert_eq!(second.next, buf.len());
    }

    #[test]
    fn test_truncated_header() {
        let buf = [0u8; 5];
        let result = decode_record(&buf, 0, buf.len());
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_length_past_region() {
        let mut buf = BytesMut::new();
        encode_record(&mut buf, b"key", b"value");
        let mut bytes = buf.to_vec();
        // Inflate the data length so the record runs past the region.
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());

        let result = decode_record(&bytes, 0, bytes.len());
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_offset_outside_region() {
        let buf = [0u8; 16];
        assert!(decode_record(&buf, 20, 16).is_err());
        assert!(decode_record(&buf, 0, 32).is_err());
    }
}
