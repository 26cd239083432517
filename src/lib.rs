//! # constdb - A Constant/Reliable Key-Value Storage Engine
//!
//! constdb pairs an immutable, hash-indexed, memory-mapped database file
//! (the *constant table*) with a mutable layer on top of it (the *reliable
//! store*) that adds journaled writes, advisory locking, and compaction.
//!
//! ## Architecture
//!
//! - **ConstantTable**: an append-once file built in two passes and then
//!   only ever replaced wholesale, never edited in place
//! - **Journal**: an append-only log of Store/Remove entries, fsync'd per
//!   append, replayed on open
//! - **Overlay**: the in-memory map of journaled keys to their latest value
//!   or tombstone, shadowing the base table
//! - **LockManager**: advisory key-scoped and whole-store locks serializing
//!   writers and the reorganizer, in-memory or cross-process
//! - **Reorganization**: folds base plus journal into a fresh constant
//!   table, atomically swaps it in, and truncates the journal
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use constdb::{Options, ReliableStore};
//!
//! # fn main() -> Result<(), constdb::Error> {
//! let store = ReliableStore::open("./data.cdb", Options::default())?;
//!
//! store.store(b"key1", b"value1")?;
//! if let Some(value) = store.get(b"key1")? {
//!     println!("Found: {:?}", value);
//! }
//! store.remove(b"key1")?;
//!
//! // Compact: rebuild the base from the logical state, drop the journal.
//! store.reorganize()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod error;
pub mod hash;
pub mod journal;
pub mod lock;
pub mod record;
pub mod table;

// Re-exports
pub use config::Options;
pub use error::{Error, Result};
#[cfg(unix)]
pub use lock::FileLockManager;
pub use lock::{LockGuard, LockManager, LockScope, MemoryLockManager};

use journal::{Journal, JournalRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use table::{TableBuilder, TableReader};

/// The overlay maps each journaled key to its latest value, or to a
/// tombstone (`None`) if the latest entry was a Remove.
type Overlay = HashMap<Vec<u8>, Option<Vec<u8>>>;

/// The mutable store: a constant table base plus journal, overlay and
/// locks.
///
/// For a store at path `p`, three files are used: the base table `p`, the
/// journal `p.jnl`, and the lock file `p.lock`.
///
/// # Thread Safety
///
/// `ReliableStore` can be shared across threads via `Arc`. Mutations on the
/// same key serialize through the lock manager (which also covers other
/// processes holding the same files); `get` never locks and may observe
/// either side of an in-flight mutation on its key.
pub struct ReliableStore {
    /// Path of the base table file.
    path: PathBuf,

    /// Configuration options.
    options: Options,

    /// Memory-mapped base table; swapped wholesale by reorganization.
    reader: RwLock<TableReader>,

    /// Journaled state shadowing the base.
    overlay: RwLock<Overlay>,

    /// Mutation log; `None` on read-only handles.
    journal: Option<Mutex<Journal>>,

    /// Serializes writers and the reorganizer.
    locks: Arc<dyn LockManager>,
}

impl ReliableStore {
    /// Opens a store, creating an empty one if permitted by the options.
    ///
    /// On unix the default lock manager takes advisory file locks on
    /// `<path>.lock`, so handles in different processes exclude each other;
    /// elsewhere it falls back to in-process locks.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the base is missing and may not be created,
    /// `Corruption` if the base fails validation, or an I/O error.
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let locks = default_lock_manager(&with_suffix(path.as_ref(), ".lock"))?;
        Self::open_with_locks(path, options, locks)
    }

    /// Opens a store with a caller-supplied lock manager.
    ///
    /// Embedded single-process deployments can pass a
    /// [`MemoryLockManager`] here; the store logic is identical.
    pub fn open_with_locks<P: AsRef<Path>>(
        path: P,
        options: Options,
        locks: Arc<dyn LockManager>,
    ) -> Result<Self> {
        options.validate()?;

        let path = path.as_ref().to_path_buf();
        let journal_path = with_suffix(&path, ".jnl");

        if !path.exists() && options.create_if_missing {
            log::info!("creating empty base table at {:?}", path);
            TableBuilder::create(&path)?.finish()?;
        }

        let reader = TableReader::open(&path)?;

        let (journal, entries) = if options.read_only {
            (None, Journal::replay(&journal_path)?)
        } else {
            let (journal, entries) = Journal::open(&journal_path, options.sync_journal)?;
            (Some(Mutex::new(journal)), entries)
        };

        let mut overlay = Overlay::new();
        for entry in entries {
            match entry {
                JournalRecord::Store { key, value, .. } => {
                    overlay.insert(key, Some(value));
                }
                JournalRecord::Remove { key, .. } => {
                    overlay.insert(key, None);
                }
            }
        }

        if !overlay.is_empty() {
            log::info!(
                "replayed journal for {:?}: {} distinct keys shadow the base",
                path,
                overlay.len()
            );
        }

        Ok(Self {
            path,
            options,
            reader: RwLock::new(reader),
            overlay: RwLock::new(overlay),
            journal,
            locks,
        })
    }

    /// Retrieves the current value for a key.
    ///
    /// The overlay wins over the base (most recent mutation first); a base
    /// key with several records yields its first match. Returns `None` for
    /// absent or tombstoned keys. Never blocks on a lock.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.overlay.read().get(key) {
            return Ok(entry.clone());
        }

        let reader = self.reader.read();
        match reader.lookup(key).next() {
            Some(Ok(value)) => Ok(Some(value.to_vec())),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Stores a value, overwriting any prior value for the key.
    ///
    /// The entry is journaled durably before the overlay is updated, so a
    /// crash after `store` returns cannot lose the write.
    ///
    /// # Errors
    ///
    /// `LockTimeout` under contention (retry), `InvalidState` on a
    /// read-only handle, or an I/O error (fatal to this handle).
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let journal = self.writable_journal()?;
        let _guard = self
            .locks
            .acquire(LockScope::Key(key), self.options.lock_timeout)?;

        journal.lock().append_store(key, value)?;
        self.overlay.write().insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    /// Removes a key by journaling a tombstone.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key is absent from both overlay and base; also
    /// the `store` error cases.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let journal = self.writable_journal()?;
        let _guard = self
            .locks
            .acquire(LockScope::Key(key), self.options.lock_timeout)?;

        if !self.contains(key)? {
            return Err(Error::not_found(format!(
                "key {:?} not present",
                String::from_utf8_lossy(key)
            )));
        }

        journal.lock().append_remove(key)?;
        self.overlay.write().insert(key.to_vec(), None);
        Ok(())
    }

    /// Produces the full current logical record set: base records in
    /// storage order with overlay overrides applied and tombstones
    /// excluded, followed by overlay-only keys in sorted order.
    pub fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let reader = self.reader.read();
        let overlay = self.overlay.read();

        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut out = Vec::new();

        for record in reader.iter() {
            let (key, value) = record?;
            if !seen.insert(key.to_vec()) {
                // A later base record for a key already emitted; the first
                // match is the logical value.
                continue;
            }
            match overlay.get(key) {
                Some(Some(current)) => out.push((key.to_vec(), current.clone())),
                Some(None) => {} // tombstoned
                None => out.push((key.to_vec(), value.to_vec())),
            }
        }

        let mut fresh: Vec<(Vec<u8>, Vec<u8>)> = overlay
            .iter()
            .filter(|(key, _)| !seen.contains(*key))
            .filter_map(|(key, entry)| entry.as_ref().map(|v| (key.clone(), v.clone())))
            .collect();
        fresh.sort();
        out.extend(fresh);

        Ok(out)
    }

    /// Rebuilds the base table from the current logical state and
    /// truncates the journal.
    ///
    /// The new table is written beside the old one and renamed into place,
    /// so a crash mid-reorganization loses at most the reorganization
    /// itself, never prior durable state. Holds the whole-store lock,
    /// excluding all writers for the duration.
    pub fn reorganize(&self) -> Result<()> {
        let journal = self.writable_journal()?;
        let _guard = self
            .locks
            .acquire(LockScope::Store, self.options.lock_timeout)?;

        let logical = self.dump()?;
        log::info!(
            "reorganizing {:?}: {} live records, journal {} bytes",
            self.path,
            logical.len(),
            journal.lock().file_size()
        );

        let mut builder = TableBuilder::create(&self.path)?;
        for (key, value) in &logical {
            if let Err(e) = builder.add(key, value) {
                let _ = builder.abandon();
                return Err(e);
            }
        }
        builder.finish()?;

        // The rename has published the new base; remap, then drop the
        // journal whose entries it absorbed. A crash between these steps
        // only replays entries that are already in the base.
        *self.reader.write() = TableReader::open(&self.path)?;
        journal.lock().reset()?;
        self.overlay.write().clear();

        Ok(())
    }

    /// Reorganizes and closes the store.
    pub fn close_reorganize(self) -> Result<()> {
        self.reorganize()
    }

    /// Closes the store. Journal durability is per-append, so this only
    /// drops the handles.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Whether the store was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.journal.is_none()
    }

    /// Path of the base table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writable_journal(&self) -> Result<&Mutex<Journal>> {
        self.journal.as_ref().ok_or_else(|| {
            Error::invalid_state("store is open read-only")
        })
    }

    /// Key presence in overlay or base, without copying the value.
    fn contains(&self, key: &[u8]) -> Result<bool> {
        if let Some(entry) = self.overlay.read().get(key) {
            return Ok(entry.is_some());
        }
        let reader = self.reader.read();
        match reader.lookup(key).next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }
}

/// Appends `suffix` to a path's final component.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.to_path_buf().into_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(unix)]
fn default_lock_manager(lock_path: &Path) -> Result<Arc<dyn LockManager>> {
    Ok(Arc::new(FileLockManager::open(lock_path)?))
}

#[cfg(not(unix))]
fn default_lock_manager(_lock_path: &Path) -> Result<Arc<dyn LockManager>> {
    Ok(Arc::new(MemoryLockManager::new()))
}
