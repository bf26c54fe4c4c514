//! Merkle tree hashing and construction
//!
//! Implements RFC 6962 compliant Merkle tree hashing with:
//! - Domain separation via prefixes (0x00 for leaf, 0x01 for node)
//! - SHA-256 hash function
//! - Unbalanced trees split at the largest power of two below the leaf count

use crate::error::{Error, Result};
use notary_types::Sha256Hash;
use sha2::{Digest, Sha256};

/// Prefix for leaf nodes in RFC 6962 Merkle tree
pub const LEAF_HASH_PREFIX: u8 = 0x00;

/// Prefix for internal nodes in RFC 6962 Merkle tree
pub const NODE_HASH_PREFIX: u8 = 0x01;

/// Hash size in bytes (SHA-256)
pub const HASH_SIZE: usize = 32;

/// Hash a leaf node
///
/// Returns: SHA256(0x00 || leaf_data)
pub fn hash_leaf(data: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_HASH_PREFIX]);
    hasher.update(data);
    Sha256Hash::from_bytes(hasher.finalize().into())
}

/// Hash two child nodes to create a parent node
///
/// Returns: SHA256(0x01 || left || right)
pub fn hash_children(left: &Sha256Hash, right: &Sha256Hash) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_HASH_PREFIX]);
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    Sha256Hash::from_bytes(hasher.finalize().into())
}

/// Largest power of two strictly less than `n` (n > 1)
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}

/// Compute the root over already-hashed leaves
///
/// An empty tree hashes to SHA256 of the empty string.
pub fn root_hash(leaves: &[Sha256Hash]) -> Sha256Hash {
    match leaves.len() {
        0 => Sha256Hash::from_bytes(Sha256::digest(b"").into()),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            hash_children(&root_hash(&leaves[..k]), &root_hash(&leaves[k..]))
        }
    }
}

/// Build the inclusion proof for the leaf at `index`
///
/// Hashes are ordered from the leaf level up to the root, the order
/// [`verify_inclusion_proof`](crate::verify_inclusion_proof) consumes them in.
pub fn inclusion_proof(leaves: &[Sha256Hash], index: usize) -> Result<Vec<Sha256Hash>> {
    if leaves.is_empty() {
        return Err(Error::InvalidTreeSize(
            "tree size cannot be zero".to_string(),
        ));
    }
    if index >= leaves.len() {
        return Err(Error::InvalidLeafIndex(format!(
            "leaf index {} >= tree size {}",
            index,
            leaves.len()
        )));
    }
    let mut proof = Vec::new();
    collect_path(leaves, index, &mut proof);
    Ok(proof)
}

fn collect_path(leaves: &[Sha256Hash], index: usize, proof: &mut Vec<Sha256Hash>) {
    let n = leaves.len();
    if n <= 1 {
        return;
    }
    let k = split_point(n);
    if index < k {
        collect_path(&leaves[..k], index, proof);
        proof.push(root_hash(&leaves[k..]));
    } else {
        collect_path(&leaves[k..], index - k, proof);
        proof.push(root_hash(&leaves[..k]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn leaves(n: usize) -> Vec<Sha256Hash> {
        (0..n).map(|i| hash_leaf(format!("leaf{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_hash_leaf() {
        let data = b"test data";
        let hash = hash_leaf(data);

        // Verify it's different from raw SHA256
        let raw: [u8; 32] = Sha256::digest(data).into();
        assert_ne!(hash.as_bytes(), &raw);
    }

    #[test]
    fn test_hash_children() {
        let left = Sha256Hash::from_bytes([0u8; 32]);
        let right = Sha256Hash::from_bytes([1u8; 32]);
        let hash = hash_children(&left, &right);

        // Verify order matters
        assert_ne!(hash, hash_children(&right, &left));
    }

    #[rstest]
    #[case(2, 1)]
    #[case(3, 2)]
    #[case(5, 4)]
    #[case(8, 4)]
    #[case(9, 8)]
    fn test_split_point(#[case] n: usize, #[case] expected: usize) {
        assert_eq!(split_point(n), expected);
    }

    #[test]
    fn test_root_of_three_leaves() {
        let l = leaves(3);
        let expected = hash_children(&hash_children(&l[0], &l[1]), &l[2]);
        assert_eq!(root_hash(&l), expected);
    }

    #[test]
    fn test_root_single_leaf_is_leaf() {
        let l = leaves(1);
        assert_eq!(root_hash(&l), l[0]);
    }

    #[test]
    fn test_proof_for_rightmost_of_seven() {
        let l = leaves(7);
        let proof = inclusion_proof(&l, 6).unwrap();
        assert_eq!(
            proof,
            vec![
                hash_children(&l[4], &l[5]),
                root_hash(&l[..4]),
            ]
        );
    }

    #[test]
    fn test_proof_index_out_of_range() {
        assert!(matches!(
            inclusion_proof(&leaves(4), 4),
            Err(Error::InvalidLeafIndex(_))
        ));
        assert!(inclusion_proof(&[], 0).is_err());
    }
}
