//! RFC 6962 Merkle trees for tree-mode snapshots
//!
//! Snapshot buckets are the leaves of a Merkle tree. This crate computes the
//! tree root, produces inclusion proofs for individual buckets and verifies them.

pub mod error;
pub mod proof;
pub mod tree;

pub use error::{Error, Result};
pub use proof::verify_inclusion_proof;
pub use tree::{
    hash_children, hash_leaf, inclusion_proof, root_hash, HASH_SIZE, LEAF_HASH_PREFIX,
    NODE_HASH_PREFIX,
};
