//! Journal writer.

use super::record::JournalRecord;
use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends mutation entries to the journal file.
///
/// Each append is written with a single `write_all` and, unless durability
/// is turned off, fsync'd before the call returns: a successful append
/// survives a crash, and a crash mid-append leaves at most a torn tail
/// that replay discards.
pub struct JournalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    file_size: u64,
    next_seq: u64,
    sync: bool,
}

impl JournalWriter {
    /// Opens the journal file in append mode, creating it if missing.
    ///
    /// `next_seq` is the sequence number the first append will receive;
    /// callers derive it from replaying the existing log.
    pub fn open<P: AsRef<Path>>(path: P, next_seq: u64, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();
        let writer = BufWriter::new(file);

        Ok(Self {
            path,
            writer,
            file_size,
            next_seq,
            sync,
        })
    }

    /// Appends a Store entry; returns its sequence number.
    pub fn append_store(&mut self, key: &[u8], value: &[u8]) -> Result<u64> {
        let seq = self.next_seq;
        self.append(&JournalRecord::Store {
            seq,
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        Ok(seq)
    }

    /// Appends a Remove (tombstone) entry; returns its sequence number.
    pub fn append_remove(&mut self, key: &[u8]) -> Result<u64> {
        let seq = self.next_seq;
        self.append(&JournalRecord::Remove {
            seq,
            key: key.to_vec(),
        })?;
        Ok(seq)
    }

    fn append(&mut self, record: &JournalRecord) -> Result<()> {
        let encoded = record.encode();
        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        if self.sync {
            self.writer.get_ref().sync_data()?;
        }
        self.file_size += encoded.len() as u64;
        self.next_seq += 1;
        Ok(())
    }

    /// Truncates the journal to empty after a reorganization has folded
    /// its entries into a fresh base. The sequence counter keeps counting.
    pub fn reset(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.file_size = 0;
        Ok(())
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Current journal file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path to the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sequence_numbers_increase() {
        let dir = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(dir.path().join("j"), 1, false).unwrap();

        assert_eq!(writer.append_store(b"a", b"1").unwrap(), 1);
        assert_eq!(writer.append_store(b"b", b"2").unwrap(), 2);
        assert_eq!(writer.append_remove(b"a").unwrap(), 3);
        assert_eq!(writer.next_seq(), 4);
    }

    #[test]
    fn test_file_size_tracks_appends() {
        let dir = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(dir.path().join("j"), 1, true).unwrap();

        assert_eq!(writer.file_size(), 0);
        writer.append_store(b"key", b"value").unwrap();
        let size = writer.file_size();
        assert!(size > 0);
        assert_eq!(size, std::fs::metadata(writer.path()).unwrap().len());
    }

    #[test]
    fn test_reset_truncates_but_keeps_sequence() {
        let dir = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(dir.path().join("j"), 1, false).unwrap();

        writer.append_store(b"a", b"1").unwrap();
        writer.append_store(b"b", b"2").unwrap();
        writer.reset().unwrap();

        assert_eq!(writer.file_size(), 0);
        assert_eq!(std::fs::metadata(writer.path()).unwrap().len(), 0);
        assert_eq!(writer.append_store(b"c", b"3").unwrap(), 3);
    }

    #[test]
    fn test_reopen_appends_after_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        {
            let mut writer = JournalWriter::open(&path, 1, true).unwrap();
            writer.append_store(b"a", b"1").unwrap();
        }

        let mut writer = JournalWriter::open(&path, 2, true).unwrap();
        let initial = writer.file_size();
        assert!(initial > 0);
        writer.append_store(b"b", b"2").unwrap();
        assert!(writer.file_size() > initial);
    }
}
