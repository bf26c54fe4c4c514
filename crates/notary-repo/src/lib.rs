//! Role, delegation, signing and publishing engine for notary trust repositories
//!
//! A [`Repository`] session holds the verification keys and thresholds of every
//! role, the delegation tree below the top-level targets role, and the current
//! signed document of each role. Edits mark roles dirty; writing re-signs them
//! into the staging area of a [`notary_storage::MetadataStorage`], and
//! publishing verifies the staged tree before atomically promoting it.
//!
//! The building blocks are usable on their own:
//!
//! - [`KeyRegistry`]: verification keys, thresholds and loaded signing keys
//! - [`DelegationGraph`]: path patterns, resolution order and revocation
//! - [`MetadataStore`]: versions, targets and dirty tracking
//! - [`SigningEngine`]: canonical signing and threshold verification
//! - [`ManifestBuilder`]: plain and tree snapshots, and timestamps
//! - [`verify_tree`]: client-side verification of a staged or live tree

pub mod config;
pub mod delegation;
pub mod dirty;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod publish;
pub mod repository;
pub mod signer;
pub mod store;

pub use config::{ExpirationPolicy, RepositoryConfig, SnapshotMode, DEFAULT_FANOUT};
pub use delegation::{DelegationEntry, DelegationGraph};
pub use dirty::DirtySet;
pub use error::{Error, Result};
pub use keys::KeyRegistry;
pub use manifest::{
    bucket_for, bucket_proof, timestamp_expiry, verify_bucket, BucketState, BuiltSnapshot,
    ManifestBuilder,
};
pub use publish::{verify_tree, PublishState, TreeLocation, VerifiedTree};
pub use repository::{PublishReport, Repository};
pub use signer::SigningEngine;
pub use store::{MetadataStore, RoleState, SignedRole};
