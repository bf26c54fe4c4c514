//! Core types and data structures for notary trust repositories
//!
//! This crate provides the metadata documents exchanged between a repository and its
//! clients (root, targets, snapshot, timestamp and snapshot buckets), the identifiers
//! used to reference roles and keys, and the canonical JSON encoding that signatures
//! are computed over.

pub mod canonical;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod key;
pub mod manifest;
pub mod metadata;
pub mod role;

pub use canonical::to_canonical_bytes;
pub use encoding::{Hex, Sha256Hash};
pub use error::{Error, Result};
pub use hash::{HashAlgorithm, Hashes};
pub use key::{KeyId, KeyScheme, KeyType, KeyVal, PublicKey};
pub use manifest::{
    BucketMetadata, BucketRef, MetaFile, SnapshotMetadata, SnapshotTree, TimestampMetadata,
};
pub use metadata::{
    DelegatedRole, Delegations, RoleKeys, RoleMetadata, RootMetadata, SignatureEntry, Signed,
    TargetFile, TargetsMetadata, SPEC_VERSION,
};
pub use role::{RoleKind, RoleName};
