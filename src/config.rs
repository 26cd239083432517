//! Configuration options for the reliable store.

use std::time::Duration;

/// Configuration options for opening a store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Build an empty base table if none exists at the path.
    /// Default: true
    pub create_if_missing: bool,

    /// Open read-only: no journal writer, mutations fail with
    /// `InvalidState`.
    /// Default: false
    pub read_only: bool,

    /// Fsync the journal on every append.
    /// Disabling trades durability for throughput.
    /// Default: true
    pub sync_journal: bool,

    /// How long `store`/`remove`/`reorganize` wait for their lock before
    /// failing with `LockTimeout`.
    /// Default: 5 seconds
    pub lock_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            sync_journal: true,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to build an empty base if none exists.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets read-only mode.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether journal appends fsync before returning.
    pub fn sync_journal(mut self, value: bool) -> Self {
        self.sync_journal = value;
        self
    }

    /// Sets the lock acquisition deadline.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Validates the options and returns an error if any are inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.read_only && self.create_if_missing {
            return Err(crate::Error::invalid_argument(
                "read_only and create_if_missing are mutually exclusive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.read_only);
        assert!(opts.sync_journal);
        assert_eq!(opts.lock_timeout, Duration::from_secs(5));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .create_if_missing(false)
            .read_only(true)
            .sync_journal(false)
            .lock_timeout(Duration::from_millis(100));

        assert!(!opts.create_if_missing);
        assert!(opts.read_only);
        assert!(!opts.sync_journal);
        assert_eq!(opts.lock_timeout, Duration::from_millis(100));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let opts = Options::new().read_only(true);
        assert!(opts.validate().is_err());
        assert!(opts.create_if_missing(false).validate().is_ok());
    }
}
