//! Hash algorithm names used in metadata documents

use crate::encoding::Hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Digests of a file keyed by algorithm name (`"sha256"`, `"sha512"`)
pub type Hashes = BTreeMap<String, Hex>;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA2-256
    Sha256,
    /// SHA2-512
    Sha512,
}

impl HashAlgorithm {
    /// Get the digest size in bytes for this algorithm
    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Name used as the key in a [`Hashes`] map
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
