//! Error types for the blob store module.

use thiserror::Error;

/// Errors that can occur when interacting with a blob store.
///
/// A missing key is not an error: `get` returns `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store could not be opened or has gone away
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A read, write or delete failed on an open store
    #[error("Store I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
