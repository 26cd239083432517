//! Advisory locking for writers and the reorganizer.
//!
//! Mutations are serialized by a [`LockManager`], not by an in-process
//! mutex alone, because the base and journal files may be shared across
//! processes. The manager is a trait so an embedded single-process store
//! can substitute the pure in-memory implementation without touching the
//! store logic.
//!
//! Policy: any number of key-scoped locks may coexist for different keys;
//! the whole-store scope (used only by reorganization) excludes every
//! key-scoped lock and vice versa. Read-only lookups never lock; they rely
//! on the atomic base-swap protocol for consistency.

use crate::error::{Error, Result};
use crate::hash::hash;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a lock protects.
#[derive(Debug, Clone, Copy)]
pub enum LockScope<'a> {
    /// Exclusive access to one key's mutation path.
    Key(&'a [u8]),
    /// Exclusive access to the whole store (reorganization).
    Store,
}

/// An acquired lock. Releases on drop, on every exit path.
pub struct LockGuard {
    _inner: Box<dyn Send>,
}

impl LockGuard {
    fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

/// Serializes writers and the reorganizer.
pub trait LockManager: Send + Sync {
    /// Acquires a lock on `scope`, waiting at most `timeout`.
    ///
    /// Fails with [`Error::LockTimeout`] if the deadline expires; callers
    /// retry with backoff.
    fn acquire(&self, scope: LockScope<'_>, timeout: Duration) -> Result<LockGuard>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LockTable {
    keys: HashSet<Vec<u8>>,
    store_locked: bool,
}

#[derive(Default)]
struct MemoryState {
    table: Mutex<LockTable>,
    cond: Condvar,
}

/// Pure in-memory lock manager for single-process (embedded) use.
///
/// Key scopes have exact-key granularity. Clones share one lock table.
#[derive(Clone, Default)]
pub struct MemoryLockManager {
    state: Arc<MemoryState>,
}

impl MemoryLockManager {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, scope: LockScope<'_>, timeout: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + timeout;
        let mut table = self.state.table.lock();

        match scope {
            LockScope::Key(key) => {
                while table.store_locked || table.keys.contains(key) {
                    if self.state.cond.wait_until(&mut table, deadline).timed_out() {
                        return Err(Error::lock_timeout(format!(
                            "key lock not acquired within {:?}",
                            timeout
                        )));
                    }
                }
                table.keys.insert(key.to_vec());
                Ok(LockGuard::new(MemoryKeyGuard {
                    state: Arc::clone(&self.state),
                    key: key.to_vec(),
                }))
            }
            LockScope::Store => {
                while table.store_locked || !table.keys.is_empty() {
                    if self.state.cond.wait_until(&mut table, deadline).timed_out() {
                        return Err(Error::lock_timeout(format!(
                            "whole-store lock not acquired within {:?}",
                            timeout
                        )));
                    }
                }
                table.store_locked = true;
                Ok(LockGuard::new(MemoryStoreGuard {
                    state: Arc::clone(&self.state),
                }))
            }
        }
    }
}

struct MemoryKeyGuard {
    state: Arc<MemoryState>,
    key: Vec<u8>,
}

impl Drop for MemoryKeyGuard {
    fn drop(&mut self) {
        self.state.table.lock().keys.remove(&self.key);
        self.state.cond.notify_all();
    }
}

struct MemoryStoreGuard {
    state: Arc<MemoryState>,
}

impl Drop for MemoryStoreGuard {
    fn drop(&mut self) {
        self.state.table.lock().store_locked = false;
        self.state.cond.notify_all();
    }
}

// ---------------------------------------------------------------------------
// File-based implementation (unix)
// ---------------------------------------------------------------------------

/// Cross-process lock manager using advisory fcntl byte-range locks on a
/// companion lock file.
///
/// Keys map to one of 256 one-byte ranges by `hash(key) % 256`, so two
/// distinct keys contend only when their hashes share a low byte; the
/// whole-store scope locks the entire file, conflicting with every range.
/// An inner in-memory gate (per bucket) keeps a single holder per range
/// within one process, which the per-fd semantics of the OS locks require.
/// The OS drops the file locks if the process dies.
#[cfg(unix)]
pub struct FileLockManager {
    file: Arc<std::fs::File>,
    gate: MemoryLockManager,
}

#[cfg(unix)]
impl FileLockManager {
    /// How long to sleep between lock attempts.
    const RETRY_INTERVAL: Duration = Duration::from_millis(1);

    /// Opens (creating if needed) the lock file at `path`.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            gate: MemoryLockManager::new(),
        })
    }

    /// Byte range within the lock file for a scope. A length of 0 means
    /// "to end of file", i.e. the whole file.
    fn range(scope: LockScope<'_>) -> (i64, i64) {
        match scope {
            LockScope::Store => (0, 0),
            LockScope::Key(key) => (1 + i64::from(bucket(key)), 1),
        }
    }

    fn try_lock_range(&self, start: i64, len: i64) -> Result<bool> {
        match fcntl_lock(&self.file, libc::F_WRLCK as libc::c_short, start, len) {
            Ok(()) => Ok(true),
            Err(e)
                if e.raw_os_error() == Some(libc::EACCES)
                    || e.raw_os_error() == Some(libc::EAGAIN) =>
            {
                Ok(false)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(unix)]
fn bucket(key: &[u8]) -> u8 {
    (hash(key) % 256) as u8
}

#[cfg(unix)]
impl LockManager for FileLockManager {
    fn acquire(&self, scope: LockScope<'_>, timeout: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + timeout;

        // Serialize holders of the same range within this process first.
        let bucket_key;
        let gate_scope = match scope {
            LockScope::Store => LockScope::Store,
            LockScope::Key(key) => {
                bucket_key = [bucket(key)];
                LockScope::Key(&bucket_key)
            }
        };
        let gate_guard = self.gate.acquire(gate_scope, timeout)?;

        let (start, len) = Self::range(scope);
        loop {
            if self.try_lock_range(start, len)? {
                return Ok(LockGuard::new(FileRangeGuard {
                    file: Arc::clone(&self.file),
                    start,
                    len,
                    _gate: gate_guard,
                }));
            }
            if Instant::now() >= deadline {
                return Err(Error::lock_timeout(format!(
                    "file lock not acquired within {:?}",
                    timeout
                )));
            }
            std::thread::sleep(Self::RETRY_INTERVAL);
        }
    }
}

#[cfg(unix)]
struct FileRangeGuard {
    file: Arc<std::fs::File>,
    start: i64,
    len: i64,
    _gate: LockGuard,
}

#[cfg(unix)]
impl Drop for FileRangeGuard {
    fn drop(&mut self) {
        let _ = fcntl_lock(&self.file, libc::F_UNLCK as libc::c_short, self.start, self.len);
    }
}

/// Issues a non-blocking fcntl lock command for one byte range.
///
/// Uses open-file-description locks where the platform has them so separate
/// opens of the lock file conflict even within one process.
#[cfg(unix)]
fn fcntl_lock(file: &std::fs::File, kind: libc::c_short, start: i64, len: i64) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
    const CMD: libc::c_int = libc::F_OFD_SETLK;
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
    const CMD: libc::c_int = libc::F_SETLK;

    // Safety: flock is plain data; zeroed is a valid initial value.
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = kind;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = start;
    lock.l_len = len;

    let rc = unsafe { libc::fcntl(file.as_raw_fd(), CMD, &lock) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
