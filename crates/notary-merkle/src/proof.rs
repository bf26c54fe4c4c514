//! Inclusion proofs for snapshot buckets
//!
//! A bucket document carries the audit path from its leaf to the tree root in
//! the snapshot. Paths are ordered leaf level first, as RFC 9162 section
//! 2.1.3.2 describes.

use crate::error::{Error, Result};
use crate::tree::hash_children;
use notary_types::Sha256Hash;

/// Check that `leaf_hash` sits at `leaf_index` of a tree of `tree_size` leaves
/// with root `expected_root`
pub fn verify_inclusion_proof(
    leaf_hash: &Sha256Hash,
    leaf_index: u64,
    tree_size: u64,
    proof_hashes: &[Sha256Hash],
    expected_root: &Sha256Hash,
) -> Result<()> {
    if tree_size == 0 {
        return Err(Error::InvalidTreeSize(
            "tree size cannot be zero".to_string(),
        ));
    }
    if leaf_index >= tree_size {
        return Err(Error::InvalidLeafIndex(format!(
            "leaf index {} >= tree size {}",
            leaf_index, tree_size
        )));
    }

    let wrong_length = || {
        Error::InvalidProof(format!(
            "{} proof hashes do not fit leaf {} of a tree of size {}",
            proof_hashes.len(),
            leaf_index,
            tree_size
        ))
    };

    let mut node = leaf_index;
    let mut last = tree_size - 1;
    let mut hash = *leaf_hash;
    for sibling in proof_hashes {
        if last == 0 {
            return Err(wrong_length());
        }
        if node & 1 == 1 || node == last {
            hash = hash_children(sibling, &hash);
            // Rightmost node without a sibling: climb until it is a right child
            while node & 1 == 0 && node != 0 {
                node >>= 1;
                last >>= 1;
            }
        } else {
            hash = hash_children(&hash, sibling);
        }
        node >>= 1;
        last >>= 1;
    }
    if last != 0 {
        return Err(wrong_length());
    }

    if &hash != expected_root {
        return Err(Error::HashMismatch {
            expected: expected_root.to_hex(),
            actual: hash.to_hex(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{hash_leaf, inclusion_proof, root_hash};
    use rstest::rstest;

    fn leaves(n: usize) -> Vec<Sha256Hash> {
        (0..n).map(|i| hash_leaf(format!("bucket{}", i).as_bytes())).collect()
    }

    #[test]
    fn test_verify_inclusion_proof_single_leaf() {
        let leaf_hash = hash_leaf(b"test");
        let result = verify_inclusion_proof(&leaf_hash, 0, 1, &[], &leaf_hash);
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_inclusion_proof_two_leaves() {
        let hash0 = hash_leaf(b"leaf0");
        let hash1 = hash_leaf(b"leaf1");
        let root = hash_children(&hash0, &hash1);

        assert!(verify_inclusion_proof(&hash0, 0, 2, &[hash1], &root).is_ok());
        assert!(verify_inclusion_proof(&hash1, 1, 2, &[hash0], &root).is_ok());
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(7)]
    #[case(8)]
    #[case(13)]
    #[case(32)]
    fn test_generated_proofs_verify(#[case] size: usize) {
        let l = leaves(size);
        let root = root_hash(&l);
        for (i, leaf) in l.iter().enumerate() {
            let proof = inclusion_proof(&l, i).unwrap();
            verify_inclusion_proof(leaf, i as u64, size as u64, &proof, &root).unwrap();
        }
    }

    #[test]
    fn test_wrong_leaf_rejected() {
        let l = leaves(5);
        let root = root_hash(&l);
        let proof = inclusion_proof(&l, 2).unwrap();
        let result = verify_inclusion_proof(&l[3], 2, 5, &proof, &root);
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
    }

    #[test]
    fn test_proof_length_checked() {
        let l = leaves(4);
        let root = root_hash(&l);
        let short = verify_inclusion_proof(&l[0], 0, 4, &[l[1]], &root);
        assert!(matches!(short, Err(Error::InvalidProof(_))));

        let mut long = inclusion_proof(&l, 0).unwrap();
        long.push(l[2]);
        let result = verify_inclusion_proof(&l[0], 0, 4, &long, &root);
        assert!(matches!(result, Err(Error::InvalidProof(_))));
    }

    #[test]
    fn test_index_out_of_range() {
        let l = leaves(3);
        let root = root_hash(&l);
        let result = verify_inclusion_proof(&l[0], 3, 3, &[], &root);
        assert!(matches!(result, Err(Error::InvalidLeafIndex(_))));
        let result = verify_inclusion_proof(&l[0], 0, 0, &[], &root);
        assert!(matches!(result, Err(Error::InvalidTreeSize(_))));
    }
}
