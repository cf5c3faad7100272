//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key could not be mapped to or from its on-disk form.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: StorageError = io.into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn error_display() {
        let err = StorageError::InvalidKey("bad%zz".into());
        assert!(err.to_string().contains("bad%zz"));
    }
}
