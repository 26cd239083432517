//! Error types for the constdb storage engine.

use std::fmt;
use std::io;

/// The result type used throughout constdb.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for constdb operations.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred. Fatal to the open handle.
    Io(io::Error),

    /// A header, offset or length field is inconsistent with the file.
    Corruption(String),

    /// The requested key was not found.
    NotFound(String),

    /// A lock could not be acquired within the caller's deadline.
    /// Recoverable; callers retry with backoff.
    LockTimeout(String),

    /// An invalid argument was provided.
    InvalidArgument(String),

    /// The store is in a state that forbids the operation
    /// (for example, a mutation on a read-only handle).
    InvalidState(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new lock timeout error.
    pub fn lock_timeout(msg: impl Into<String>) -> Self {
        Error::LockTimeout(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Corruption(msg) => write!(f, "Data corruption: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::LockTimeout(msg) => write!(f, "Lock timeout: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad slot offset");
        assert_eq!(err.to_string(), "Data corruption: bad slot offset");

        let err = Error::lock_timeout("key busy");
        assert_eq!(err.to_string(), "Lock timeout: key busy");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
