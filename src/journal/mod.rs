//! Journal log: the append-only mutation record layered on the base table.
//!
//! Every `store`/`remove` against the reliable store becomes one journal
//! entry, stamped with a monotonic sequence number and made durable before
//! the mutating call returns. Replaying the log in file order over the base
//! table reproduces the store's logical state; reorganization folds the log
//! into a fresh base and truncates it.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::JournalReader;
pub use record::JournalRecord;
pub use writer::JournalWriter;

use crate::error::Result;
use std::fs::OpenOptions;
use std::path::Path;

/// Journal manager coordinating replay and appends for one log file.
pub struct Journal {
    writer: JournalWriter,
}

impl Journal {
    /// Replays the log at `path`, discards any torn tail by truncating the
    /// file to its valid prefix, and opens a writer positioned after it.
    ///
    /// Returns the manager and the replayed entries in append order. The
    /// first append will be numbered one past the highest replayed
    /// sequence number.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<(Self, Vec<JournalRecord>)> {
        let path = path.as_ref();

        // Make sure the file exists so replay has something to open.
        OpenOptions::new().create(true).append(true).open(path)?;

        let (entries, valid_len) = JournalReader::open(path)?.replay_all()?;

        let actual_len = std::fs::metadata(path)?.len();
        if valid_len < actual_len {
            log::warn!(
                "truncating journal {:?} from {} to {} bytes (torn tail)",
                path,
                actual_len,
                valid_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }

        let next_seq = entries.last().map(|e| e.seq() + 1).unwrap_or(1);
        let writer = JournalWriter::open(path, next_seq, sync)?;

        Ok((Self { writer }, entries))
    }

    /// Replays the log without taking a writer or repairing the file.
    /// Used by read-only opens.
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<Vec<JournalRecord>> {
        if !path.as_ref().exists() {
            return Ok(Vec::new());
        }
        let (entries, _) = JournalReader::open(path)?.replay_all()?;
        Ok(entries)
    }

    /// Appends a Store entry; returns its sequence number.
    pub fn append_store(&mut self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.writer.append_store(key, value)
    }

    /// Appends a Remove entry; returns its sequence number.
    pub fn append_remove(&mut self, key: &[u8]) -> Result<u64> {
        self.writer.append_remove(key)
    }

    /// Truncates the log after reorganization.
    pub fn reset(&mut self) -> Result<()> {
        self.writer.reset()
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.writer.next_seq()
    }

    /// Current log size in bytes.
    pub fn file_size(&self) -> u64 {
        self.writer.file_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_fresh_log() {
        let dir = TempDir::new().unwrap();
        let (journal, entries) = Journal::open(dir.path().join("j"), true).unwrap();

        assert!(entries.is_empty());
        assert_eq!(journal.next_seq(), 1);
    }

    #[test]
    fn test_reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        {
            let (mut journal, _) = Journal::open(&path, true).unwrap();
            journal.append_store(b"a", b"1").unwrap();
            journal.append_store(b"b", b"2").unwrap();
        }

        let (mut journal, entries) = Journal::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(journal.append_store(b"c", b"3").unwrap(), 3);
    }

    #[test]
    fn test_open_repairs_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        {
            let (mut journal, _) = Journal::open(&path, true).unwrap();
            journal.append_store(b"kept", b"v").unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0u8; 6]).unwrap();
        }

        let (_journal, entries) = Journal::open(&path, true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = TempDir::new().unwrap();
        let entries = Journal::replay(dir.path().join("absent")).unwrap();
        assert!(entries.is_empty());
    }
}
