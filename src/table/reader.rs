//! Constant table reader.
//!
//! Opens a table file read-only through a memory map and serves lookups by
//! probing the on-disk open-addressing tables. The reader never mutates the
//! file and never blocks beyond the page-fault cost of the mapping.

use crate::error::{Error, Result};
use crate::hash::hash;
use crate::record::{decode_record, read_u32, DecodedRecord};
use crate::table::{ENTRY_SIZE, HEADER_SIZE, NUM_SLOTS};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Read-only view of a constant table file.
///
/// Usage:
/// ```no_run
/// use constdb::table::TableReader;
///
/// # fn main() -> Result<(), constdb::Error> {
/// let reader = TableReader::open("data.cdb")?;
/// for value in reader.lookup(b"key1") {
///     println!("found: {:?}", value?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TableReader {
    mmap: Mmap,
    /// End of the records region: the lowest probe-table position.
    records_end: usize,
}

impl TableReader {
    /// Opens and validates a table file.
    ///
    /// Fails with `NotFound` if the file does not exist and `Corruption` if
    /// the header or any slot is inconsistent with the file size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::not_found(format!("no constant table at {:?}", path))
            } else {
                Error::Io(e)
            }
        })?;

        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "file {:?} is {} bytes, smaller than the {} byte header",
                path, file_len, HEADER_SIZE
            )));
        }

        // Safety: the mapping is read-only and the format contract says a
        // published table is never modified in place, only replaced by
        // rename (which leaves this mapping intact).
        let mmap = unsafe { Mmap::map(&file)? };

        // Validate every slot against the file size and find where the
        // records region ends.
        let mut records_end = file_len;
        for slot in 0..NUM_SLOTS {
            let (position, table_size) = slot_entry(&mmap, slot);
            let table_bytes = table_size as u64 * ENTRY_SIZE as u64;
            if position < HEADER_SIZE as u64 || position + table_bytes > file_len {
                return Err(Error::corruption(format!(
                    "slot {}: table [{}, {}) outside file of {} bytes",
                    slot,
                    position,
                    position + table_bytes,
                    file_len
                )));
            }
            records_end = records_end.min(position);
        }

        Ok(Self {
            mmap,
            records_end: records_end as usize,
        })
    }

    /// Looks up all values stored under `key`, in insertion order.
    ///
    /// The returned iterator is lazy, finite, and restartable: a fresh call
    /// rescans from the same deterministic starting slot. An exhausted
    /// iterator proves absence (the probe chain reached an empty slot).
    pub fn lookup<'a>(&'a self, key: &'a [u8]) -> Lookup<'a> {
        let h = hash(key);
        let (position, table_size) = slot_entry(&self.mmap, (h as usize) % NUM_SLOTS);
        let start = if table_size == 0 {
            0
        } else {
            (h >> 8) as usize % table_size as usize
        };

        Lookup {
            reader: self,
            key,
            hash: h,
            table_pos: position as usize,
            table_size: table_size as usize,
            start,
            probed: 0,
            done: table_size == 0,
        }
    }

    /// Iterates every record in storage order.
    pub fn iter(&self) -> Records<'_> {
        Records {
            reader: self,
            offset: HEADER_SIZE,
            done: false,
        }
    }

    /// Number of bytes in the records region.
    pub fn records_len(&self) -> usize {
        self.records_end - HEADER_SIZE
    }

    /// Decodes the record at an absolute offset taken from a probe table.
    fn record_at(&self, offset: usize) -> Result<DecodedRecord<'_>> {
        if offset < HEADER_SIZE {
            return Err(Error::corruption(format!(
                "record offset {} points into the header",
                offset
            )));
        }
        decode_record(&self.mmap, offset, self.records_end)
    }
}

/// Reads the `(position, tablesize)` pair of a header slot.
fn slot_entry(mmap: &[u8], slot: usize) -> (u64, u32) {
    let off = slot * ENTRY_SIZE;
    (u64::from(read_u32(mmap, off)), read_u32(mmap, off + 4))
}

/// Lazy iterator over the values stored under one key.
///
/// Yields `Err` at most once (on a corrupt probe target) and then fuses.
pub struct Lookup<'a> {
    reader: &'a TableReader,
    key: &'a [u8],
    hash: u32,
    table_pos: usize,
    table_size: usize,
    start: usize,
    probed: usize,
    done: bool,
}

impl<'a> Iterator for Lookup<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        while self.probed < self.table_size {
            let slot = (self.start + self.probed) % self.table_size;
            self.probed += 1;

            let entry_off = self.table_pos + slot * ENTRY_SIZE;
            let stored_hash = read_u32(&self.reader.mmap, entry_off);
            let record_off = read_u32(&self.reader.mmap, entry_off + 4);

            // Empty slot: the probe chain ends here and absence is proven.
            if record_off == 0 {
                self.done = true;
                return None;
            }

            if stored_hash != self.hash {
                continue;
            }

            match self.reader.record_at(record_off as usize) {
                Ok(rec) => {
                    // Equal hashes may still be distinct keys.
                    if rec.key == self.key {
                        return Some(Ok(rec.data));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        // A full table without an empty slot cannot come from the builder
        // (load factor is capped at 50%), so exhaustion ends the search.
        self.done = true;
        None
    }
}

/// Iterator over every `(key, value)` record in storage order.
pub struct Records<'a> {
    reader: &'a TableReader,
    offset: usize,
    done: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<(&'a [u8], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.reader.records_end {
            return None;
        }

        match decode_record(&self.reader.mmap, self.offset, self.reader.records_end) {
            Ok(rec) => {
                self.offset = rec.next;
                Some(Ok((rec.key, rec.data)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
