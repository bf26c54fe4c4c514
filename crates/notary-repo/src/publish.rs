//! Publish state machine and whole-tree verification
//!
//! A publish signs every dirty role into the staging area, verifies the staged
//! tree as a client would, and only then promotes it to live. The state moves
//! `Clean -> Dirty -> Signing -> Verified -> Swapped -> Clean`; a signing or
//! verification failure returns it to `Dirty`. A failed swap halts publishing
//! until the live tree has been verified again.

use crate::config::SnapshotMode;
use crate::error::{Error, Result};
use crate::keys::KeyRegistry;
use crate::manifest::{verify_bucket, ManifestBuilder};
use crate::signer::SigningEngine;
use chrono::{DateTime, Utc};
use notary_crypto::ContentHasher;
use notary_storage::MetadataStorage;
use notary_types::{
    BucketMetadata, MetaFile, RoleKeys, RoleKind, RoleMetadata, RoleName, Signed,
    TimestampMetadata,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Where in the publish cycle a repository is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    /// Live matches the session; nothing to publish
    Clean,
    /// Some roles changed since the last publish
    Dirty,
    /// Dirty roles are being re-signed into staging
    Signing,
    /// The staged tree passed verification
    Verified,
    /// The staged tree is live
    Swapped,
}

/// Tracks publish progress and the halt after a failed swap
#[derive(Debug)]
pub struct Publisher {
    state: PublishState,
    halted: bool,
    generation: Option<u64>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            state: PublishState::Clean,
            halted: false,
            generation: None,
        }
    }

    pub fn state(&self) -> PublishState {
        self.state
    }

    /// Whether a failed swap is blocking further publishes
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Generation number of the last successful promote in this session
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    fn transition(&mut self, next: PublishState) {
        if self.state != next {
            tracing::debug!("Publish state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Record that a role changed
    pub(crate) fn mark_dirty(&mut self) {
        if self.state == PublishState::Clean {
            self.transition(PublishState::Dirty);
        }
    }

    /// Enter the signing phase
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.halted {
            return Err(Error::PublishHalted);
        }
        self.transition(PublishState::Signing);
        Ok(())
    }

    /// Return to `Dirty` after a signing or verification failure
    pub(crate) fn fail(&mut self, error: &Error) {
        tracing::warn!("Publish aborted before swap: {}", error);
        self.transition(PublishState::Dirty);
    }

    pub(crate) fn verified(&mut self) {
        self.transition(PublishState::Verified);
    }

    /// Promote the staged tree
    ///
    /// A failed switch of the live tree halts publishing. A failure before
    /// the switch only returns the publisher to `Dirty`.
    pub(crate) async fn swap<S>(&mut self, storage: &S) -> Result<u64>
    where
        S: MetadataStorage + ?Sized,
    {
        match storage.promote().await {
            Ok(generation) => {
                self.generation = Some(generation);
                self.transition(PublishState::Swapped);
                Ok(generation)
            }
            Err(notary_storage::Error::Swap(reason)) => {
                self.halted = true;
                self.transition(PublishState::Dirty);
                tracing::error!("Swap to live failed, publishing halted: {}", reason);
                Err(Error::PublishSwap(reason))
            }
            Err(e) => {
                let error = Error::Storage(e);
                self.fail(&error);
                Err(error)
            }
        }
    }

    pub(crate) fn finish(&mut self) {
        self.transition(PublishState::Clean);
    }

    /// Lift the halt once the live tree verified
    pub(crate) fn resume(&mut self) {
        if self.halted {
            tracing::info!("Live tree verified, publishing resumed");
        }
        self.halted = false;
    }
}

/// Which tree of a storage to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeLocation {
    Staged,
    Live,
}

/// Summary of a tree that passed [`verify_tree`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedTree {
    /// Version of every role, including snapshot and timestamp
    pub versions: BTreeMap<RoleName, u64>,
    /// Snapshot entry the timestamp points at
    pub snapshot: MetaFile,
}

async fn read<S>(storage: &S, location: TreeLocation, name: &str) -> Result<Option<Vec<u8>>>
where
    S: MetadataStorage + ?Sized,
{
    Ok(match location {
        TreeLocation::Staged => storage.read_staged(name).await?,
        TreeLocation::Live => storage.read_live(name).await?,
    })
}

/// A parsed document and its stored bytes
struct Document {
    bytes: Vec<u8>,
    signed: Signed<RoleMetadata>,
}

async fn read_document<S>(storage: &S, location: TreeLocation, name: &str) -> Result<Document>
where
    S: MetadataStorage + ?Sized,
{
    let bytes = read(storage, location, name)
        .await?
        .ok_or_else(|| Error::malformed(name, "document is missing"))?;
    let signed = Signed::<RoleMetadata>::from_bytes(&bytes).map_err(|e| Error::malformed(name, e))?;
    Ok(Document { bytes, signed })
}

fn check_signed(
    engine: &SigningEngine<'_>,
    role: &RoleName,
    document: &Document,
    now: DateTime<Utc>,
) -> Result<()> {
    let body = SigningEngine::canonicalize(role, &document.signed.signed)?;
    engine.verify(
        role,
        &body,
        document.signed.signed.expires(),
        &document.signed.signatures,
        now,
    )
}

fn check_entry(name: &str, expected: &MetaFile, actual: &MetaFile) -> Result<()> {
    if expected != actual {
        return Err(Error::malformed(
            name,
            format!(
                "snapshot lists version {} but the stored document is version {} \
                 or differs in content",
                expected.version, actual.version
            ),
        ));
    }
    Ok(())
}

/// Verify a whole metadata tree the way a client would
///
/// Keys come from the tree itself: root lists the top-level keys, and every
/// targets-like role lists the keys of its delegations. Each role must meet its
/// threshold and be unexpired, the snapshot must list exactly the current
/// document of every other role, and the timestamp must point at the snapshot.
pub async fn verify_tree<S>(
    storage: &S,
    location: TreeLocation,
    hasher: &dyn ContentHasher,
    now: DateTime<Utc>,
) -> Result<VerifiedTree>
where
    S: MetadataStorage + ?Sized,
{
    let builder = ManifestBuilder::new(hasher, SnapshotMode::Plain);
    let mut keys = KeyRegistry::new();
    let mut listed: BTreeMap<RoleName, MetaFile> = BTreeMap::new();
    let mut versions = BTreeMap::new();

    let root_name = RoleName::root();
    let root_doc = read_document(storage, location, &root_name.file_name()).await?;
    let root = root_doc.signed.signed.as_root()?;
    for (role, role_keys) in &root.roles {
        keys.restore_role(role, role_keys, &root.keys)?;
    }
    for role in RoleName::top_level() {
        if !keys.has_role(&role) {
            return Err(Error::malformed(&root_name, format!("root does not list {}", role)));
        }
    }
    let engine = SigningEngine::new(&keys);
    check_signed(&engine, &root_name, &root_doc, now)?;
    listed.insert(root_name.clone(), builder.meta_file(root.version, &root_doc.bytes));
    versions.insert(root_name, root.version);

    // Targets and everything delegated from it, breadth first. Each delegated
    // role may appear once in the whole tree.
    let mut seen = BTreeSet::from([RoleName::targets()]);
    let mut queue = VecDeque::from([RoleName::targets()]);
    while let Some(role) = queue.pop_front() {
        let document = read_document(storage, location, &role.file_name()).await?;
        check_signed(&SigningEngine::new(&keys), &role, &document, now)?;
        let targets = document.signed.signed.as_targets()?;
        if let Some(delegations) = &targets.delegations {
            for child in &delegations.roles {
                if child.name.kind() != RoleKind::Delegated || !seen.insert(child.name.clone()) {
                    return Err(Error::malformed(
                        &role,
                        format!(
                            "delegates to {} more than once or to a top-level role",
                            child.name
                        ),
                    ));
                }
                let child_keys = RoleKeys {
                    keyids: child.keyids.clone(),
                    threshold: child.threshold,
                };
                keys.restore_role(&child.name, &child_keys, &delegations.keys)?;
                queue.push_back(child.name.clone());
            }
        }
        listed.insert(role.clone(), builder.meta_file(targets.version, &document.bytes));
        versions.insert(role, targets.version);
    }

    let engine = SigningEngine::new(&keys);
    let snapshot_name = RoleName::snapshot();
    let snapshot_doc = read_document(storage, location, &snapshot_name.file_name()).await?;
    check_signed(&engine, &snapshot_name, &snapshot_doc, now)?;
    let snapshot = snapshot_doc.signed.signed.as_snapshot()?;

    let mut entries = snapshot.meta.clone();
    if let Some(tree) = &snapshot.tree {
        for reference in &tree.buckets {
            let name = BucketMetadata::file_name(reference.bucket);
            let document = read_document(storage, location, &name).await?;
            check_signed(&engine, &snapshot_name, &document, now)?;
            let bucket = document.signed.signed.as_bucket()?;
            verify_bucket(tree, bucket)?;
            entries.extend(bucket.meta.clone());
        }
        if tree.buckets.len() != tree.fanout as usize {
            return Err(Error::malformed(&snapshot_name, "tree does not reference every bucket"));
        }
    }

    if entries.len() != listed.len() {
        return Err(Error::malformed(
            &snapshot_name,
            format!("lists {} roles but the tree holds {}", entries.len(), listed.len()),
        ));
    }
    for (role, actual) in &listed {
        let name = role.file_name();
        let expected = entries
            .get(&name)
            .ok_or_else(|| Error::malformed(&snapshot_name, format!("{} is not listed", name)))?;
        check_entry(&name, expected, actual)?;
    }
    versions.insert(snapshot_name, snapshot.version);

    let timestamp_name = RoleName::timestamp();
    let timestamp_doc = read_document(storage, location, &timestamp_name.file_name()).await?;
    check_signed(&engine, &timestamp_name, &timestamp_doc, now)?;
    let timestamp = timestamp_doc.signed.signed.as_timestamp()?;
    let pointed = timestamp.snapshot_meta().ok_or_else(|| {
        Error::malformed(&timestamp_name, format!("no {} entry", TimestampMetadata::SNAPSHOT_FILE))
    })?;
    let actual = builder.meta_file(snapshot.version, &snapshot_doc.bytes);
    check_entry(TimestampMetadata::SNAPSHOT_FILE, pointed, &actual)?;
    versions.insert(timestamp_name, timestamp.version);

    tracing::debug!("Verified {:?} tree with {} roles", location, versions.len());
    Ok(VerifiedTree {
        versions,
        snapshot: actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_storage::InMemoryStorage;

    #[test]
    fn test_state_transitions() {
        let mut publisher = Publisher::new();
        assert_eq!(publisher.state(), PublishState::Clean);

        publisher.mark_dirty();
        assert_eq!(publisher.state(), PublishState::Dirty);

        publisher.begin().unwrap();
        assert_eq!(publisher.state(), PublishState::Signing);

        publisher.fail(&Error::Config("boom".to_string()));
        assert_eq!(publisher.state(), PublishState::Dirty);

        publisher.begin().unwrap();
        publisher.verified();
        assert_eq!(publisher.state(), PublishState::Verified);
    }

    #[tokio::test]
    async fn test_swap_success() {
        let storage = InMemoryStorage::new();
        let mut publisher = Publisher::new();
        publisher.begin().unwrap();
        publisher.verified();
        assert_eq!(publisher.swap(&storage).await.unwrap(), 1);
        assert_eq!(publisher.state(), PublishState::Swapped);
        publisher.finish();
        assert_eq!(publisher.state(), PublishState::Clean);
        assert_eq!(publisher.generation(), Some(1));
    }

    #[tokio::test]
    async fn test_missing_root_is_malformed() {
        let storage = InMemoryStorage::new();
        let hasher = notary_crypto::StandardHasher::default();
        let result = verify_tree(&storage, TreeLocation::Live, &hasher, Utc::now()).await;
        assert!(matches!(result, Err(Error::MalformedBody { .. })));
    }
}
