//! Named operator intents
//!
//! Each intent performs one edit an operator asks for, signs what the edit
//! changed, and then either leaves the result in staging or publishes it,
//! depending on the [`Completion`] requested.

use crate::error::{Error, Result};
use notary_crypto::{KeyRef, KeySource, Secret, VerificationKey};
use notary_repo::{PublishReport, Repository};
use notary_storage::MetadataStorage;
use notary_types::{KeyId, RoleName, TargetFile};

/// What to do once an intent has signed its changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    /// Write the signed documents to staging and stop
    #[default]
    Stage,
    /// Publish everything dirty to live
    Publish,
}

/// Result of an intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Roles signed and written to staging
    Staged(Vec<RoleName>),
    /// The tree went live
    Published(PublishReport),
}

impl Outcome {
    pub fn is_published(&self) -> bool {
        matches!(self, Outcome::Published(_))
    }
}

async fn complete<S: MetadataStorage>(
    repo: &mut Repository<S>,
    roles: Vec<RoleName>,
    completion: Completion,
) -> Result<Outcome> {
    match completion {
        Completion::Stage => {
            for role in &roles {
                if repo.dirty_roles().contains(role) {
                    repo.write_role(role).await?;
                }
            }
            repo.stage().await?;
            Ok(Outcome::Staged(roles))
        }
        Completion::Publish => Ok(Outcome::Published(repo.publish().await?)),
    }
}

/// Sign a role with one key from a key source
///
/// A role with pending changes is re-signed at the next version with every
/// loaded key, without requiring its threshold yet. Otherwise the signature is
/// added to the current version, so several key holders can sign the same
/// document in turn.
pub async fn sign_role<S: MetadataStorage>(
    repo: &mut Repository<S>,
    role: &RoleName,
    source: &dyn KeySource,
    key_ref: &KeyRef,
    secret: &Secret,
    completion: Completion,
) -> Result<Outcome> {
    let key = source.load_signing_key(key_ref, secret)?;
    let pending = repo.version(role)? == 0 || repo.dirty_roles().contains(role);
    if pending {
        repo.load_signing_key(role, key)?;
        repo.write_partial(role).await?;
    } else {
        repo.sign_role(role, &key)?;
    }

    match completion {
        Completion::Stage => {
            repo.stage().await?;
            Ok(Outcome::Staged(vec![role.clone()]))
        }
        Completion::Publish => Ok(Outcome::Published(repo.publish().await?)),
    }
}

/// Publish staged and dirty metadata to live
pub async fn publish<S: MetadataStorage>(repo: &mut Repository<S>) -> Result<PublishReport> {
    Ok(repo.publish().await?)
}

/// Remove a verification key from a role
///
/// Root is always re-signed afterwards, together with the role's owner when
/// that is a delegating parent.
pub async fn revoke_key<S: MetadataStorage>(
    repo: &mut Repository<S>,
    role: &RoleName,
    key_id: &KeyId,
    completion: Completion,
) -> Result<Outcome> {
    repo.remove_verification_key(role, key_id)?;
    let root = RoleName::root();
    repo.mark_dirty(std::slice::from_ref(&root))?;
    tracing::info!("Revoked key {} from {}", key_id, role);

    let mut signed = vec![root];
    if let Some(owner) = repo.key_owner(role) {
        if !signed.contains(&owner) {
            signed.push(owner);
        }
    }
    complete(repo, signed, completion).await
}

/// Replace one of a role's keys with a new key from a key source
///
/// Everything that can fail is checked before the key set changes: the old key
/// must be listed for the role and the new key must load and verify. Then the
/// old verification key is removed, the new one added, and the role and the
/// metadata listing its keys are re-signed.
pub async fn rotate_key<S: MetadataStorage>(
    repo: &mut Repository<S>,
    role: &RoleName,
    old_key: &KeyId,
    source: &dyn KeySource,
    new_key: &KeyRef,
    secret: &Secret,
    completion: Completion,
) -> Result<Outcome> {
    repo.key_registry().check_member(role, old_key)?;
    let public = source.load_public_key(new_key)?;
    VerificationKey::from_public_key(&public)?;
    let signing = source.load_signing_key(new_key, secret)?;
    let new_key_id = public.key_id()?;
    if signing.key_id() != &new_key_id {
        return Err(Error::KeyMismatch {
            key_ref: new_key.to_string(),
        });
    }

    if &new_key_id != old_key {
        repo.remove_verification_key(role, old_key)?;
        repo.add_verification_key(role, &public)?;
    }
    repo.load_signing_key(role, signing)?;
    tracing::info!("Rotated key of {} from {} to {}", role, old_key, new_key_id);

    let mut signed = Vec::with_capacity(2);
    if let Some(owner) = repo.key_owner(role) {
        signed.push(owner);
    }
    if !signed.contains(role) {
        signed.push(role.clone());
    }
    complete(repo, signed, completion).await
}

/// Hash `content`, add it as a target of `role` and sign the role
pub async fn add_target_and_sign<S: MetadataStorage>(
    repo: &mut Repository<S>,
    role: &RoleName,
    path: &str,
    content: &[u8],
    completion: Completion,
) -> Result<(TargetFile, Outcome)> {
    let target = repo.add_target_content(role, path, content, None)?;
    let outcome = complete(repo, vec![role.clone()], completion).await?;
    Ok((target, outcome))
}
