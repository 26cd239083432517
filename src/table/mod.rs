//! Constant table: the immutable, hash-indexed database file.
//!
//! ## File layout
//!
//! - Bytes `[0, 2048)`: 256 header slots, 8 bytes each:
//!   `position:u32 LE | tablesize:u32 LE`. `tablesize` is the entry count
//!   of the slot's open-addressing table.
//! - Bytes `[2048, records_end)`: records in insertion order, each
//!   `keylen:u32 LE | datalen:u32 LE | key | data`.
//! - Bytes `[records_end, EOF)`: the 256 open-addressing tables
//!   back-to-back, entries 8 bytes each: `hash:u32 LE | record_offset:u32 LE`
//!   (an offset of 0 marks an empty probe slot).
//!
//! A record with hash `h` belongs to header slot `h % 256` and its probe
//! sequence starts at slot `(h >> 8) % tablesize` of that slot's table.
//! Tables are sized to at least twice their entry count, so the load factor
//! never exceeds 50% and every probe chain ends at an empty slot.
//!
//! Once built, a table is never mutated in place; it is only replaced
//! wholesale by a newer file renamed over it.

pub mod builder;
pub mod reader;

pub use builder::TableBuilder;
pub use reader::TableReader;

/// Number of header slots (one per low byte of a key's hash).
pub const NUM_SLOTS: usize = 256;

/// Size of one header slot or probe-table entry in bytes.
pub const ENTRY_SIZE: usize = 8;

/// Size of the reserved header region: 256 slots of 8 bytes.
pub const HEADER_SIZE: usize = NUM_SLOTS * ENTRY_SIZE;

/// Largest byte offset addressable by the format's 32-bit pointers.
pub const MAX_FILE_SIZE: u64 = u32::MAX as u64;
