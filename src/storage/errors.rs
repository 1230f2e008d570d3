//! Storage error types
//!
//! Everything above the path cache reports failures through
//! [`StorageError`]. The cache itself never fails: a miss is `None`.

use crate::b2::B2Error;

/// Errors raised by storage clients, backends and the facade
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Not a file: {0}")]
    InvalidFile(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Storage client is closed: {0}")]
    Closed(String),

    #[error(transparent)]
    B2(#[from] B2Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Map an I/O error on `path`, keeping "not found" distinguishable
    pub fn from_io(path: &str, error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(error),
        }
    }

    /// Map a B2 client error on `path`, keeping "not found" distinguishable
    pub fn from_b2(path: &str, error: anyhow::Error) -> Self {
        match error.downcast::<B2Error>() {
            Ok(B2Error::NotFound(_)) => StorageError::NotFound(path.to_string()),
            Ok(b2_error) => StorageError::B2(b2_error),
            Err(other) => StorageError::Other(other),
        }
    }

    /// Whether this error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}
