//! Journal reader for replay on open.

use super::record::{JournalRecord, ENTRY_PREFIX_SIZE, TAG_STORE};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Reads journal entries back in append order.
pub struct JournalReader {
    reader: BufReader<File>,
    /// Byte offset just past the last complete entry read so far.
    valid_len: u64,
}

impl JournalReader {
    /// Opens a journal file for replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path).map_err(Error::Io)?;
        Ok(Self {
            reader: BufReader::new(file),
            valid_len: 0,
        })
    }

    /// Reads the next entry.
    ///
    /// Returns `Ok(None)` at a clean end of file. An entry cut off by a
    /// crash decodes as corruption; `replay_all` treats that as the torn
    /// tail and stops there.
    pub fn read_next(&mut self) -> Result<Option<JournalRecord>> {
        let mut prefix = [0u8; ENTRY_PREFIX_SIZE];
        match read_exact_or_start_eof(&mut self.reader, &mut prefix) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(e),
        }

        let tag = prefix[0];
        let seq = u64::from_le_bytes(prefix[1..9].try_into().unwrap());
        let key_len =
            u32::from_le_bytes(prefix[9..13].try_into().unwrap()) as usize;

        let mut key = vec![0u8; key_len];
        self.read_payload(&mut key)?;

        let record = match tag {
            TAG_STORE => {
                let mut len_bytes = [0u8; 4];
                self.read_payload(&mut len_bytes)?;
                let value_len = u32::from_le_bytes(len_bytes) as usize;
                let mut value = vec![0u8; value_len];
                self.read_payload(&mut value)?;
                JournalRecord::Store { seq, key, value }
            }
            super::record::TAG_REMOVE => JournalRecord::Remove { seq, key },
            other => {
                return Err(Error::corruption(format!(
                    "invalid journal entry tag {} at offset {}",
                    other, self.valid_len
                )))
            }
        };

        self.valid_len += record.encoded_size() as u64;
        Ok(Some(record))
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::corruption(format!(
                    "journal entry truncated after offset {}",
                    self.valid_len
                ))
            } else {
                Error::Io(e)
            }
        })
    }

    /// Byte length of the valid prefix read so far.
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Replays all entries in append order.
    ///
    /// Stops at a torn or unreadable tail with a warning; the entries up to
    /// that point and the length of the valid prefix are returned so the
    /// caller can truncate the file. A mutation that never completed its
    /// append is not durable and is deliberately dropped here.
    pub fn replay_all(&mut self) -> Result<(Vec<JournalRecord>, u64)> {
        let mut entries = Vec::new();

        loop {
            match self.read_next() {
                Ok(Some(record)) => entries.push(record),
                Ok(None) => break,
                Err(Error::Corruption(msg)) => {
                    log::warn!(
                        "journal torn after {} complete entries ({} bytes): {}",
                        entries.len(),
                        self.valid_len,
                        msg
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok((entries, self.valid_len))
    }
}

/// Reads exactly `buf.len()` bytes, or returns `Ok(false)` if the stream
/// was already at end of file.
fn read_exact_or_start_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(Error::corruption(
                    "journal entry prefix cut off at end of file",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::writer::JournalWriter;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[test]
    fn test_replay_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        {
            let mut writer = JournalWriter::open(&path, 1, true).unwrap();
            writer.append_store(b"a", b"1").unwrap();
            writer.append_remove(b"a").unwrap();
            writer.append_store(b"b", b"2").unwrap();
        }

        let (entries, valid_len) = JournalReader::open(&path).unwrap().replay_all().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(valid_len, std::fs::metadata(&path).unwrap().len());

        let seqs: Vec<u64> = entries.iter().map(|e| e.seq()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(matches!(&entries[1], JournalRecord::Remove { key, .. } if key == b"a"));
    }

    #[test]
    fn test_empty_journal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");
        std::fs::File::create(&path).unwrap();

        let (entries, valid_len) = JournalReader::open(&path).unwrap().replay_all().unwrap();
        assert!(entries.is_empty());
        assert_eq!(valid_len, 0);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        {
            let mut writer = JournalWriter::open(&path, 1, true).unwrap();
            writer.append_store(b"safe", b"value").unwrap();
        }
        let complete_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash mid-append: half an entry at the tail.
        let half = JournalRecord::Store {
            seq: 2,
            key: b"torn".to_vec(),
            value: b"lost".to_vec(),
        }
        .encode();
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&half[..half.len() / 2]).unwrap();
        }

        let (entries, valid_len) = JournalReader::open(&path).unwrap().replay_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key(), b"safe");
        assert_eq!(valid_len, complete_len);
    }

    #[test]
    fn test_truncated_prefix_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("j");

        // Only 5 bytes: not even a full entry prefix.
        std::fs::write(&path, &[0u8; 5]).unwrap();

        let (entries, valid_len) = JournalReader::open(&path).unwrap().replay_all().unwrap();
        assert!(entries.is_empty());
        assert_eq!(valid_len, 0);
    }
}
