//! Error types for notary-types

use thiserror::Error;

/// Errors that can occur in notary-types
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid hex or digest encoding
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// Value cannot be represented in canonical JSON
    #[error("Canonical JSON error: {0}")]
    Canonical(String),

    /// Role name is empty or contains path separators
    #[error("Invalid role name: {0:?}")]
    InvalidRoleName(String),

    /// Document is of a different kind than expected
    #[error("Unexpected metadata type: expected {expected}, got {actual}")]
    UnexpectedType {
        expected: &'static str,
        actual: &'static str,
    },

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Result type for notary-types operations
pub type Result<T> = std::result::Result<T, Error>;
