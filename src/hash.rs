//! The format-defining hash function.
//!
//! Every slot index and probe position in a constant table is derived from
//! this 32-bit hash, so the exact bit pattern is part of the on-disk format:
//! a table written with any other hash is unreadable. The recurrence is the
//! 32-bit FNV-1a fold written in shift form, which is how the multiply by
//! the FNV prime (16777619) decomposes.

/// Seed value for [`hash`] (the FNV-1a 32-bit offset basis).
pub const HASH_SEED: u32 = 0x811c_9dc5;

/// Hashes a byte sequence to a 32-bit value.
///
/// Pure and total: defined for every input including the empty slice, and
/// always returns the same value for the same bytes. All arithmetic wraps
/// modulo 2^32.
pub fn hash(data: &[u8]) -> u32 {
    let mut h = HASH_SEED;
    for &c in data {
        h ^= u32::from(c);
        h = h
            .wrapping_add(h << 1)
            .wrapping_add(h << 4)
            .wrapping_add(h << 7)
            .wrapping_add(h << 8)
            .wrapping_add(h << 24);
    }
    h
}
