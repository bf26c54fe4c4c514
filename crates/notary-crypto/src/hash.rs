//! Digests for target files and metadata documents

use aws_lc_rs::digest::{self, Algorithm, SHA256, SHA512};
use notary_types::{HashAlgorithm, Hashes, Hex};

fn digest_into<const N: usize>(algorithm: &'static Algorithm, data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(digest::digest(algorithm, data).as_ref());
    out
}

/// SHA-256 of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    digest_into(&SHA256, data)
}

/// SHA-512 of `data`
pub fn sha512(data: &[u8]) -> [u8; 64] {
    digest_into(&SHA512, data)
}

/// Content addressing for targets and metadata files
pub trait ContentHasher: Send + Sync {
    /// Digest `data` with every configured algorithm
    fn hash(&self, data: &[u8]) -> Hashes;
}

/// Hasher over a fixed set of SHA-2 algorithms
#[derive(Debug, Clone)]
pub struct StandardHasher {
    algorithms: Vec<HashAlgorithm>,
}

impl StandardHasher {
    pub fn new(algorithms: Vec<HashAlgorithm>) -> Self {
        Self { algorithms }
    }

    pub fn algorithms(&self) -> &[HashAlgorithm] {
        &self.algorithms
    }
}

impl Default for StandardHasher {
    fn default() -> Self {
        Self::new(vec![HashAlgorithm::Sha256])
    }
}

impl ContentHasher for StandardHasher {
    fn hash(&self, data: &[u8]) -> Hashes {
        self.algorithms
            .iter()
            .map(|algorithm| {
                let digest = match algorithm {
                    HashAlgorithm::Sha256 => Hex::encode(&sha256(data)),
                    HashAlgorithm::Sha512 => Hex::encode(&sha512(data)),
                };
                (algorithm.as_str().to_string(), digest)
            })
            .collect()
    }
}
