//! Trust metadata repositories
//!
//! This is the main entry point for the notary crates. It re-exports the
//! building blocks and adds the operator-level intents: signing a role,
//! publishing, revoking and rotating keys, and adding signed targets.
//!
//! # Example
//!
//! ```no_run
//! use notary::intents::{self, Completion};
//! use notary::{RepositoryConfig, Session};
//! use notary::crypto::{InMemoryKeySource, KeyRef, Secret};
//! use notary::types::{KeyType, RoleName};
//!
//! # async fn example() -> notary::Result<()> {
//! let mut session = Session::open("/srv/registry", RepositoryConfig::default()).await?;
//! let repo = session.repository_mut();
//!
//! let mut keys = InMemoryKeySource::new();
//! for role in RoleName::top_level() {
//!     let key_ref = KeyRef::from(role.as_str());
//!     let public = keys.generate(key_ref.clone(), KeyType::Ed25519, Secret::new("pw"))?;
//!     repo.add_verification_key(&role, &public)?;
//!     repo.load_signing_key_from(&role, &keys, &key_ref, &Secret::new("pw"))?;
//! }
//!
//! let (_, outcome) = intents::add_target_and_sign(
//!     repo,
//!     &RoleName::targets(),
//!     "hello.txt",
//!     b"hello",
//!     Completion::Publish,
//! )
//! .await?;
//! assert!(outcome.is_published());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod intents;
pub mod session;

// Re-export core crates
pub use notary_crypto as crypto;
pub use notary_merkle as merkle;
pub use notary_repo as repo;
pub use notary_storage as storage;
pub use notary_types as types;

pub use error::{Error, Result};
pub use intents::{Completion, Outcome};
pub use notary_repo::{
    ExpirationPolicy, PublishReport, PublishState, Repository, RepositoryConfig, SnapshotMode,
};
pub use session::Session;
