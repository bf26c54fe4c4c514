//! Error types for the repository engine

use chrono::{DateTime, Utc};
use notary_types::{KeyId, RoleName};
use thiserror::Error;

/// Errors that can occur while editing, signing or publishing a repository
#[derive(Error, Debug)]
pub enum Error {
    /// The key is not part of the role's verification key set
    #[error("key {key_id} not found for role {role}")]
    KeyNotFound { role: RoleName, key_id: KeyId },

    /// No role with this name exists in the repository
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// The child name is already delegated
    #[error("role {child} is already delegated by {parent}")]
    DuplicateChild { parent: RoleName, child: RoleName },

    /// The delegation would make a role its own ancestor
    #[error("delegating {child} from {parent} would create a cycle")]
    Cycle { parent: RoleName, child: RoleName },

    /// The role may not claim this target path
    #[error("role {role} is not authorized for path {path}")]
    UnauthorizedPath { role: RoleName, path: String },

    /// The role does not list this target
    #[error("target {path} not found in role {role}")]
    TargetNotFound { role: RoleName, path: String },

    /// A delegation path pattern could not be parsed
    #[error("invalid path pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Fewer distinct authorized keys signed than the role requires
    #[error("role {role} has {found} of {required} required signatures")]
    ThresholdNotMet {
        role: RoleName,
        required: u32,
        found: usize,
    },

    /// The metadata expiration has passed
    #[error("role {role} expired at {expires}")]
    ExpiredMetadata {
        role: RoleName,
        expires: DateTime<Utc>,
    },

    /// An authorized key produced a signature that does not verify
    #[error("invalid signature on role {role} from key {key_id}")]
    InvalidSignature { role: RoleName, key_id: KeyId },

    /// A version did not follow the previous one
    #[error("version conflict for role {role}: expected {expected}, found {found}")]
    VersionConflict {
        role: RoleName,
        expected: u64,
        found: u64,
    },

    /// A metadata body could not be built, canonicalized or parsed
    #[error("malformed body for role {role}: {reason}")]
    MalformedBody { role: String, reason: String },

    /// The staged tree could not replace the live tree
    #[error("publish swap failed: {0}")]
    PublishSwap(String),

    /// A previous swap failed and the live tree has not been re-verified
    #[error("publishing is halted until the live tree is re-verified")]
    PublishHalted,

    /// Invalid repository configuration or role settings
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Metadata type error
    #[error("types error: {0}")]
    Types(#[from] notary_types::Error),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] notary_crypto::Error),

    /// Merkle tree error
    #[error("merkle error: {0}")]
    Merkle(#[from] notary_merkle::Error),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] notary_storage::Error),
}

impl Error {
    /// Whether automated publishing must stop until an operator intervenes
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::PublishSwap(_) | Error::PublishHalted)
    }

    pub(crate) fn malformed(role: impl ToString, reason: impl ToString) -> Self {
        Error::MalformedBody {
            role: role.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, Error>;
