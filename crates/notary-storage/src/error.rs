//! Error types for the storage crate

use std::path::PathBuf;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// A metadata file name that would escape its directory
    #[error("Invalid metadata file name: {0}")]
    InvalidName(String),

    /// Another writer holds the repository lock
    #[error("Repository is locked: {}", .0.display())]
    Locked(PathBuf),

    /// The live location could not be switched to the new generation
    #[error("Swap failed: {0}")]
    Swap(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
