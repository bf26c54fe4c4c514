//! Cryptographic primitives for notary trust repositories
//!
//! This crate provides key generation, signing, verification and content hashing
//! using aws-lc-rs as the cryptographic backend, plus the key-source interface the
//! repository engine loads keys through.

pub mod error;
pub mod hash;
pub mod key_source;
pub mod keyring;
pub mod signing;
pub mod verification;

pub use error::{Error, Result};
pub use hash::{sha256, sha512, ContentHasher, StandardHasher};
pub use key_source::{InMemoryKeySource, KeyRef, KeySource, Secret};
pub use keyring::{Keyring, SignatureTally};
pub use signing::{KeyPair, Signature, SigningKey};
pub use verification::VerificationKey;
