//! Error types for notary

use thiserror::Error;

/// Errors that can occur in notary operations
#[derive(Error, Debug)]
pub enum Error {
    /// Repository error
    #[error("Repository error: {0}")]
    Repository(#[from] notary_repo::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] notary_storage::Error),

    /// Crypto error
    #[error("Crypto error: {0}")]
    Crypto(#[from] notary_crypto::Error),

    /// Types error
    #[error("Types error: {0}")]
    Types(#[from] notary_types::Error),

    /// A key source returned a private key that does not match the public key
    /// it lists under the same reference
    #[error("Private and public key under {key_ref} do not match")]
    KeyMismatch { key_ref: String },
}

impl Error {
    /// Whether automated publishing must stop until the live tree is re-verified
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Repository(e) if e.is_fatal())
    }
}

/// Result type for notary operations
pub type Result<T> = std::result::Result<T, Error>;
