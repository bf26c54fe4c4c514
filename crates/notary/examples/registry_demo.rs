//! Walk through a small registry: delegate, publish, rotate and revoke
//!
//! Run with `RUST_LOG=debug cargo run --example registry_demo [repo-dir]`. Without
//! a directory argument the repository is created in a temporary directory.

use notary::crypto::{InMemoryKeySource, KeyRef, Secret};
use notary::intents::{self, Completion};
use notary::storage::MetadataStorage;
use notary::types::{KeyType, RoleName};
use notary::{RepositoryConfig, Session, SnapshotMode};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let temp_dir = tempfile::tempdir()?;
    let root_dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| temp_dir.path().to_path_buf());
    println!("Repository: {}", root_dir.display());

    let config = RepositoryConfig::default().with_snapshot_mode(SnapshotMode::tree());
    let mut session = Session::open(&root_dir, config).await?;
    let repo = session.repository_mut();

    // 1. Keys for the top-level roles, root with two holders
    let mut keys = InMemoryKeySource::new();
    let secret = Secret::new("demo");
    for role in RoleName::top_level() {
        let key_ref = KeyRef::from(role.as_str());
        let public = keys.generate(key_ref.clone(), KeyType::Ed25519, secret.clone())?;
        repo.add_verification_key(&role, &public)?;
        repo.load_signing_key_from(&role, &keys, &key_ref, &secret)?;
    }
    let root = RoleName::root();
    let cosigner = keys.generate("root-cosigner", KeyType::EcdsaP256, secret.clone())?;
    repo.add_verification_key(&root, &cosigner)?;
    repo.load_signing_key_from(&root, &keys, &KeyRef::from("root-cosigner"), &secret)?;
    repo.set_threshold(&root, 2)?;

    // 2. Delegate my_repo/* to its own role
    let my_repo = RoleName::new("my_repo")?;
    let my_repo_key = keys.generate("my_repo", KeyType::Ed25519, secret.clone())?;
    repo.delegate(
        &RoleName::targets(),
        &my_repo,
        &[my_repo_key],
        1,
        vec!["my_repo/*".to_string()],
        false,
    )?;
    repo.load_signing_key_from(&my_repo, &keys, &KeyRef::from("my_repo"), &secret)?;

    // 3. Add a target and publish
    let (target, _) = intents::add_target_and_sign(
        repo,
        &my_repo,
        "my_repo/image1",
        b"image1 contents",
        Completion::Publish,
    )
    .await?;
    println!("Published my_repo/image1 ({} bytes)", target.length);
    println!("Resolution order: {:?}", repo.resolve("my_repo/image1"));

    // 4. Rotate the delegated key
    let old_key = repo.key_registry().role_keys(&my_repo)?.keyids[0].clone();
    keys.generate("my_repo-next", KeyType::Ed25519, secret.clone())?;
    intents::rotate_key(
        repo,
        &my_repo,
        &old_key,
        &keys,
        &KeyRef::from("my_repo-next"),
        &secret,
        Completion::Publish,
    )
    .await?;
    println!("Rotated my_repo key {}", old_key);

    // 5. Drop the root cosigner and bring the threshold back to one
    repo.set_threshold(&root, 1)?;
    let cosigner_id = cosigner.key_id()?;
    let outcome = intents::revoke_key(repo, &root, &cosigner_id, Completion::Publish).await?;
    println!("Revoked root cosigner: published = {}", outcome.is_published());

    let verified = repo.verify_live().await?;
    for (role, version) in &verified.versions {
        println!("  {:<12} v{}", role, version);
    }
    let live = repo.storage().list_live().await?;
    println!("Live files: {}", live.join(", "));
    Ok(())
}
