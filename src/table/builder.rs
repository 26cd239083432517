//! Constant table builder.
//!
//! Builds a table file from a sequence of key-value pairs using the
//! classical two-pass construction: records are streamed to disk as they
//! arrive while `(hash, offset)` pairs accumulate in 256 in-memory buckets;
//! `finish` then lays out one open-addressing table per bucket, writes the
//! header, and atomically renames the finished file into place.

use crate::error::{Error, Result};
use crate::hash::hash;
use crate::record::{encode_record, encoded_len};
use crate::table::{ENTRY_SIZE, HEADER_SIZE, MAX_FILE_SIZE, NUM_SLOTS};
use bytes::{BufMut, BytesMut};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One pending index entry: the full hash and the record's byte offset.
#[derive(Debug, Clone, Copy)]
struct Pending {
    hash: u32,
    offset: u32,
}

/// TableBuilder builds a constant table file.
///
/// Records are written in the order given; duplicates are preserved, not
/// deduplicated. The file only appears at the destination path once
/// `finish` completes, so an aborted build never leaves a half-written
/// table visible.
///
/// Usage:
/// ```no_run
/// use constdb::table::TableBuilder;
///
/// # fn main() -> Result<(), constdb::Error> {
/// let mut builder = TableBuilder::create("data.cdb")?;
/// builder.add(b"key1", b"value1")?;
/// builder.add(b"key2", b"value2")?;
/// builder.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct TableBuilder {
    dest: PathBuf,
    tmp: PathBuf,
    writer: BufWriter<File>,
    /// Offset of the next record to be written.
    offset: u64,
    buckets: Vec<Vec<Pending>>,
    num_entries: u64,
}

impl TableBuilder {
    /// Creates a builder that will publish the table at `dest` on `finish`.
    ///
    /// The working file is `<dest>.tmp`; the canonical path is untouched
    /// until the final rename.
    pub fn create<P: AsRef<Path>>(dest: P) -> Result<Self> {
        let dest = dest.as_ref().to_path_buf();
        let mut tmp = dest.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);

        // Reserve the header region; it is rewritten with real slot data
        // in finish().
        writer.write_all(&[0u8; HEADER_SIZE])?;

        Ok(Self {
            dest,
            tmp,
            writer,
            offset: HEADER_SIZE as u64,
            buckets: vec![Vec::new(); NUM_SLOTS],
            num_entries: 0,
        })
    }

    /// Appends a record.
    ///
    /// Keys may repeat and may be empty; insertion order is preserved and
    /// observable through `TableReader::lookup`.
    pub fn add(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        let record_len = encoded_len(key.len(), data.len()) as u64;
        // Every offset stored in the index must fit in 32 bits, including
        // the probe tables that follow the records. Table sizes round
        // 2 * count up to a power of two, so a bucket can need up to four
        // slots per entry; budget that worst case here.
        let index_len = (self.num_entries + 1) * 4 * ENTRY_SIZE as u64;
        if self.offset + record_len + index_len > MAX_FILE_SIZE {
            return Err(Error::invalid_argument(
                "constant table would exceed the 4 GiB addressable range",
            ));
        }

        let mut buf = BytesMut::with_capacity(record_len as usize);
        encode_record(&mut buf, key, data);
        self.writer.write_all(&buf)?;

        let h = hash(key);
        self.buckets[(h as usize) % NUM_SLOTS].push(Pending {
            hash: h,
            offset: self.offset as u32,
        });

        self.offset += record_len;
        self.num_entries += 1;
        Ok(())
    }

    /// Number of records added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Writes the probe tables and header, syncs, and renames the file
    /// into place. Returns the total file size.
    pub fn finish(mut self) -> Result<u64> {
        // The add() estimate is conservative; verify the exact table sizes
        // before any position is cast down to 32 bits.
        let index_bytes: u64 = self
            .buckets
            .iter()
            .map(|b| probe_table_size(b.len()) as u64 * ENTRY_SIZE as u64)
            .sum();
        if self.offset + index_bytes > MAX_FILE_SIZE {
            self.abandon()?;
            return Err(Error::invalid_argument(
                "constant table would exceed the 4 GiB addressable range",
            ));
        }

        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        let mut position = self.offset;

        for bucket in &self.buckets {
            let table_size = probe_table_size(bucket.len());
            header.put_u32_le(position as u32);
            header.put_u32_le(table_size as u32);

            if table_size == 0 {
                continue;
            }

            // Place each entry at its start slot, probing linearly (with
            // wrap-around) past occupied slots. An offset of 0 marks empty.
            let mut slots = vec![(0u32, 0u32); table_size];
            for entry in bucket {
                let mut slot = (entry.hash >> 8) as usize % table_size;
                while slots[slot].1 != 0 {
                    slot = (slot + 1) % table_size;
                }
                slots[slot] = (entry.hash, entry.offset);
            }

            let mut buf = BytesMut::with_capacity(table_size * ENTRY_SIZE);
            for (h, off) in slots {
                buf.put_u32_le(h);
                buf.put_u32_le(off);
            }
            self.writer.write_all(&buf)?;
            position += buf.len() as u64;
        }

        // Header goes in last, over the reserved region.
        self.writer.seek(SeekFrom::Start(0))?;
        self.writer.write_all(&header)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        fs::rename(&self.tmp, &self.dest)?;
        // The rename itself lives in the directory entry; without this
        // sync a power loss can resurface the old file even though the
        // caller was told the new one is published.
        sync_parent_dir(&self.dest)?;
        log::debug!(
            "built constant table {:?}: {} records, {} bytes",
            self.dest,
            self.num_entries,
            position
        );

        Ok(position)
    }

    /// Abandons the build, removing the working file. The destination path
    /// is left untouched.
    pub fn abandon(self) -> Result<()> {
        let tmp = self.tmp.clone();
        drop(self.writer);
        if tmp.exists() {
            fs::remove_file(&tmp)?;
        }
        Ok(())
    }
}

/// Fsyncs the directory holding `path` so a completed rename survives
/// power loss.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Probe table size for a bucket: the next power of two at or above twice
/// the entry count, keeping the load factor at or below 50%.
fn probe_table_size(count: usize) -> usize {
    if count == 0 {
        0
    } else {
        (count * 2).next_power_of_two()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_table_size() {
        assert_eq!(probe_table_size(0), 0);
        assert_eq!(probe_table_size(1), 2);
        assert_eq!(probe_table_size(2), 4);
        assert_eq!(probe_table_size(3), 8);
        assert_eq!(probe_table_size(8), 16);

        // The power-of-two rounding never exceeds four slots per entry,
        // which is what add() budgets against the 32-bit offset space.
        for count in 1..1000 {
            assert!(probe_table_size(count) <= 4 * count, "count {}", count);
        }
    }

    #[test]
    fn test_add_refuses_past_addressable_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"key", b"value").unwrap();

        // Pretend billions of record bytes were already streamed out.
        builder.offset = MAX_FILE_SIZE - 8;
        let result = builder.add(b"key2", b"value2");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_finish_refuses_unaddressable_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"key", b"value").unwrap();

        // With the records region this close to the 32-bit limit, the
        // probe table would push positions past it; finish must refuse
        // rather than let the header offsets wrap.
        builder.offset = MAX_FILE_SIZE - 8;
        let result = builder.finish();
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!path.exists());
        assert!(!dir.path().join("huge.cdb.tmp").exists());
    }

    #[test]
    fn test_finish_publishes_in_subdirectory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let path = nested.join("table.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"key", b"value").unwrap();
        builder.finish().unwrap();

        assert!(path.exists());
        assert!(!nested.join("table.cdb.tmp").exists());
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.cdb");

        let builder = TableBuilder::create(&path).unwrap();
        assert_eq!(builder.num_entries(), 0);
        let size = builder.finish().unwrap();

        // Just the header: every slot empty.
        assert_eq!(size, HEADER_SIZE as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_canonical_path_untouched_until_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"key", b"value").unwrap();
        assert!(!path.exists(), "destination must not exist mid-build");

        builder.finish().unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("table.cdb.tmp").exists());
    }

    #[test]
    fn test_abandon_removes_working_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"key", b"value").unwrap();
        builder.abandon().unwrap();

        assert!(!path.exists());
        assert!(!dir.path().join("table.cdb.tmp").exists());
    }

    #[test]
    fn test_duplicate_and_empty_keys_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.cdb");

        let mut builder = TableBuilder::create(&path).unwrap();
        builder.add(b"dup", b"1").unwrap();
        builder.add(b"dup", b"2").unwrap();
        builder.add(b"", b"empty key").unwrap();
        assert_eq!(builder.num_entries(), 3);
        builder.finish().unwrap();
    }
}
