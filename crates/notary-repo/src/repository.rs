//! Repository session tying keys, delegations, metadata and publishing together

use crate::config::{RepositoryConfig, SnapshotMode};
use crate::delegation::{DelegationEntry, DelegationGraph};
use crate::error::{Error, Result};
use crate::keys::KeyRegistry;
use crate::manifest::{bucket_for, timestamp_expiry, BucketState, ManifestBuilder};
use crate::publish::{verify_tree, PublishState, Publisher, TreeLocation, VerifiedTree};
use crate::signer::SigningEngine;
use crate::store::{MetadataStore, SignedRole};
use chrono::{DateTime, Utc};
use notary_crypto::{
    ContentHasher, KeyRef, KeySource, Secret, SigningKey, StandardHasher, VerificationKey,
};
use notary_storage::MetadataStorage;
use notary_types::{
    BucketMetadata, DelegatedRole, Delegations, KeyId, MetaFile, PublicKey, RoleKeys, RoleKind,
    RoleMetadata, RoleName, RootMetadata, Sha256Hash, SignatureEntry, Signed, TargetFile,
    TargetsMetadata,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Result of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Storage generation now live
    pub generation: u64,
    /// Version of every published role
    pub versions: BTreeMap<RoleName, u64>,
    /// Snapshot entry the live timestamp points at
    pub snapshot: MetaFile,
}

/// Signed bucket document kept between signings
#[derive(Debug, Clone)]
struct BucketDocument {
    version: u64,
    document: Vec<u8>,
}

/// A single-writer editing session over a repository
///
/// Mutations are validated before anything changes and mark the affected roles
/// dirty. Writing re-signs dirty roles into staging, bumping each version by
/// one; publishing additionally rebuilds the snapshot and timestamp, verifies
/// the staged tree and promotes it to live.
///
/// # Example
///
/// ```no_run
/// use notary_crypto::{KeyPair, SigningKey};
/// use notary_repo::{Repository, RepositoryConfig};
/// use notary_storage::InMemoryStorage;
/// use notary_types::RoleName;
///
/// # async fn example() -> Result<(), notary_repo::Error> {
/// let mut repo = Repository::create(InMemoryStorage::new(), RepositoryConfig::default())?;
/// for role in RoleName::top_level() {
///     let key = SigningKey::new(KeyPair::generate_ed25519()?)?;
///     repo.add_verification_key(&role, key.public_key())?;
///     repo.load_signing_key(&role, key)?;
/// }
/// let report = repo.publish().await?;
/// println!("published generation {}", report.generation);
/// # Ok(())
/// # }
/// ```
pub struct Repository<S: MetadataStorage> {
    config: RepositoryConfig,
    storage: S,
    keys: KeyRegistry,
    graph: DelegationGraph,
    store: MetadataStore,
    publisher: Publisher,
    hasher: Box<dyn ContentHasher>,
    buckets: BTreeMap<u32, BucketState>,
    bucket_documents: BTreeMap<u32, BucketDocument>,
    /// Buckets signed since the last write to staging
    unstaged_buckets: BTreeSet<u32>,
    /// Roles whose current document has not been written to staging
    unstaged: BTreeSet<RoleName>,
    /// Revoked roles whose staged documents must be removed
    removed: BTreeSet<RoleName>,
}

impl<S: MetadataStorage> Repository<S> {
    /// Start a new, empty repository
    ///
    /// All four top-level roles exist with no keys and are dirty.
    pub fn create(storage: S, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        let mut repo = Self::empty(storage, config);
        for role in RoleName::top_level() {
            repo.keys.ensure_role(&role);
            repo.store.ensure_role(&role);
        }
        repo.touch(&RoleName::top_level());
        Ok(repo)
    }

    fn empty(storage: S, config: RepositoryConfig) -> Self {
        Self {
            config,
            storage,
            keys: KeyRegistry::new(),
            graph: DelegationGraph::new(),
            store: MetadataStore::new(),
            publisher: Publisher::new(),
            hasher: Box::new(StandardHasher::default()),
            buckets: BTreeMap::new(),
            bucket_documents: BTreeMap::new(),
            unstaged_buckets: BTreeSet::new(),
            unstaged: BTreeSet::new(),
            removed: BTreeSet::new(),
        }
    }

    /// Resume a session from the staged documents
    ///
    /// Versions, signatures, keys, delegations and targets are restored. Signing
    /// keys are not: load them again before writing.
    pub async fn load(storage: S, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        let mut repo = Self::empty(storage, config);

        let root_name = RoleName::root();
        let root_doc = repo.read_staged(&root_name).await?;
        let root = root_doc.signed.signed.as_root()?.clone();
        for (role, role_keys) in &root.roles {
            repo.keys.restore_role(role, role_keys, &root.keys)?;
            repo.store.ensure_role(role);
        }
        for role in RoleName::top_level() {
            if !repo.keys.has_role(&role) {
                return Err(Error::malformed(&root_name, format!("root does not list {}", role)));
            }
        }
        if root.consistent_snapshot != repo.config.consistent_snapshot {
            tracing::debug!(
                "Using consistent_snapshot = {} from stored root",
                root.consistent_snapshot
            );
            repo.config.consistent_snapshot = root.consistent_snapshot;
        }
        repo.restore(&root_name, root_doc, BTreeMap::new());

        let mut queue = VecDeque::from([RoleName::targets()]);
        while let Some(role) = queue.pop_front() {
            let document = repo.read_staged(&role).await?;
            let targets = document.signed.signed.as_targets()?.clone();
            if let Some(delegations) = &targets.delegations {
                for child in &delegations.roles {
                    repo.graph
                        .delegate(&role, &child.name, child.paths.clone(), child.terminating)?;
                    let child_keys = RoleKeys {
                        keyids: child.keyids.clone(),
                        threshold: child.threshold,
                    };
                    repo.keys
                        .restore_role(&child.name, &child_keys, &delegations.keys)?;
                    repo.store.ensure_role(&child.name);
                    queue.push_back(child.name.clone());
                }
            }
            repo.restore(&role, document, targets.targets);
        }

        let snapshot_name = RoleName::snapshot();
        let snapshot_doc = repo.read_staged(&snapshot_name).await?;
        let snapshot = snapshot_doc.signed.signed.as_snapshot()?.clone();
        if let Some(tree) = &snapshot.tree {
            for reference in &tree.buckets {
                let name = BucketMetadata::file_name(reference.bucket);
                let document = repo.storage.read_staged(&name).await?.ok_or_else(|| {
                    Error::malformed(&name, "document is missing")
                })?;
                let signed = Signed::<RoleMetadata>::from_bytes(&document)
                    .map_err(|e| Error::malformed(&name, e))?;
                repo.buckets.insert(
                    reference.bucket,
                    BucketState {
                        version: reference.version,
                        leaf: Sha256Hash::from_hex(reference.hash.as_str())?,
                        fanout: tree.fanout,
                        expires: signed.signed.as_bucket()?.expires,
                    },
                );
                repo.bucket_documents.insert(
                    reference.bucket,
                    BucketDocument {
                        version: reference.version,
                        document,
                    },
                );
            }
        }
        repo.restore(&snapshot_name, snapshot_doc, BTreeMap::new());

        let timestamp_name = RoleName::timestamp();
        let timestamp_doc = repo.read_staged(&timestamp_name).await?;
        let staged_timestamp = timestamp_doc.bytes.clone();
        repo.restore(&timestamp_name, timestamp_doc, BTreeMap::new());

        let live_timestamp = repo.storage.read_live(&timestamp_name.file_name()).await?;
        if live_timestamp.as_deref() != Some(staged_timestamp.as_slice()) {
            tracing::debug!("Staged tree differs from live");
            repo.publisher.mark_dirty();
        }

        tracing::info!(
            "Loaded repository with {} delegated roles",
            repo.graph.delegated_roles().len()
        );
        Ok(repo)
    }

    /// Use a different content hasher for targets and snapshot entries
    pub fn with_hasher(mut self, hasher: impl ContentHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn key_registry(&self) -> &KeyRegistry {
        &self.keys
    }

    pub fn delegation_graph(&self) -> &DelegationGraph {
        &self.graph
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn state(&self) -> PublishState {
        self.publisher.state()
    }

    /// Whether a failed swap is blocking publishes
    pub fn is_halted(&self) -> bool {
        self.publisher.is_halted()
    }

    /// Roles waiting to be re-signed
    pub fn dirty_roles(&self) -> Vec<RoleName> {
        self.store.dirty().iter().cloned().collect()
    }

    /// All roles in the repository, top-level first
    pub fn roles(&self) -> Vec<RoleName> {
        let mut roles: Vec<RoleName> = RoleName::top_level().into_iter().collect();
        roles.extend(self.graph.delegated_roles());
        roles
    }

    pub fn version(&self, role: &RoleName) -> Result<u64> {
        self.store.get_version(role)
    }

    pub fn expires(&self, role: &RoleName) -> Result<Option<DateTime<Utc>>> {
        Ok(self.store.role(role)?.expires)
    }

    pub fn targets(&self, role: &RoleName) -> Result<&BTreeMap<String, TargetFile>> {
        self.store.targets(role)
    }

    pub fn signatures(&self, role: &RoleName) -> Result<&[SignatureEntry]> {
        Ok(&self.store.role(role)?.signatures)
    }

    /// The last signed document of a role
    pub fn document(&self, role: &RoleName) -> Result<Option<Signed<RoleMetadata>>> {
        match &self.store.role(role)?.document {
            Some(bytes) => Ok(Some(Signed::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    /// Delegations made by a targets-like role, in order
    pub fn delegations(&self, role: &RoleName) -> &[DelegationEntry] {
        self.graph.children(role)
    }

    fn require_role(&self, role: &RoleName) -> Result<()> {
        if self.store.has_role(role) {
            Ok(())
        } else {
            Err(Error::UnknownRole(role.to_string()))
        }
    }

    /// The role whose metadata lists the keys of `role`: root for top-level
    /// roles, the delegating parent otherwise
    pub fn key_owner(&self, role: &RoleName) -> Option<RoleName> {
        match role.kind() {
            RoleKind::Delegated => self.graph.parent_of(role).cloned(),
            _ => Some(RoleName::root()),
        }
    }

    fn touch(&mut self, roles: &[RoleName]) {
        self.store.mark_dirty(roles);
        self.publisher.mark_dirty();
    }

    fn touch_with_owner(&mut self, role: &RoleName) {
        let mut roles = vec![role.clone()];
        roles.extend(self.key_owner(role));
        self.touch(&roles);
    }

    // Keys

    /// Add a verification key to a role, returning its id
    ///
    /// Adding a key the role already has changes nothing.
    pub fn add_verification_key(&mut self, role: &RoleName, key: &PublicKey) -> Result<KeyId> {
        self.require_role(role)?;
        let key_id = key.key_id()?;
        if self.keys.add_verification_key(role, key)? {
            self.touch_with_owner(role);
        }
        Ok(key_id)
    }

    /// Remove a verification key from a role
    ///
    /// The role and the metadata listing its keys become dirty; signatures by
    /// the removed key no longer count.
    pub fn remove_verification_key(&mut self, role: &RoleName, key_id: &KeyId) -> Result<()> {
        self.require_role(role)?;
        self.keys.remove_verification_key(role, key_id)?;
        self.touch_with_owner(role);
        Ok(())
    }

    pub fn set_threshold(&mut self, role: &RoleName, threshold: u32) -> Result<()> {
        self.require_role(role)?;
        self.keys.set_threshold(role, threshold)?;
        self.touch_with_owner(role);
        Ok(())
    }

    /// Make a signing key available to later writes of `role`
    pub fn load_signing_key(&mut self, role: &RoleName, key: SigningKey) -> Result<()> {
        self.require_role(role)?;
        self.keys.load_signing_key(role, key)
    }

    /// Unlock a key from a key source with the caller's secret and load it
    pub fn load_signing_key_from(
        &mut self,
        role: &RoleName,
        source: &dyn KeySource,
        key_ref: &KeyRef,
        secret: &Secret,
    ) -> Result<KeyId> {
        let key = source.load_signing_key(key_ref, secret)?;
        let key_id = key.key_id().clone();
        self.load_signing_key(role, key)?;
        Ok(key_id)
    }

    // Delegations

    /// Delegate `paths` from a targets-like role to a new child role
    pub fn delegate(
        &mut self,
        parent: &RoleName,
        child: &RoleName,
        keys: &[PublicKey],
        threshold: u32,
        paths: Vec<String>,
        terminating: bool,
    ) -> Result<()> {
        self.require_role(parent)?;
        let mut distinct = BTreeSet::new();
        for key in keys {
            VerificationKey::from_public_key(key)?;
            distinct.insert(key.key_id()?);
        }
        if threshold == 0 || threshold as usize > distinct.len() {
            return Err(Error::Config(format!(
                "threshold {} for role {} must be between 1 and {}",
                threshold,
                child,
                distinct.len()
            )));
        }
        self.graph.delegate(parent, child, paths, terminating)?;

        self.keys.ensure_role(child);
        self.store.ensure_role(child);
        for key in keys {
            self.keys.add_verification_key(child, key)?;
        }
        self.keys.set_threshold(child, threshold)?;
        self.touch(&[parent.clone(), child.clone()]);
        tracing::info!("Delegated {} from {}", child, parent);
        Ok(())
    }

    /// Revoke a delegation and every role delegated below it
    pub fn revoke_delegation(
        &mut self,
        parent: &RoleName,
        child: &RoleName,
    ) -> Result<Vec<RoleName>> {
        let removed = self.graph.revoke_delegation(parent, child)?;
        for role in &removed {
            self.keys.remove_role(role);
            self.store.remove_role(role);
            self.unstaged.remove(role);
            self.removed.insert(role.clone());
        }
        self.touch(&[parent.clone()]);
        tracing::info!("Revoked {} from {}", child, parent);
        Ok(removed)
    }

    /// Roles authorized for `path`, most specific first
    pub fn resolve(&self, path: &str) -> Vec<RoleName> {
        self.graph.resolve(path, |role| self.store.claims(role, path))
    }

    /// The role listing `path` and its entry, searched in client order
    pub fn find_target(&self, path: &str) -> Option<(RoleName, &TargetFile)> {
        let role = self.graph.lookup(path, |role| self.store.claims(role, path))?;
        let target = self.store.targets(&role).ok()?.get(path)?;
        Some((role, target))
    }

    // Targets

    /// Add a target to a role that is authorized for its path
    pub fn add_target(&mut self, role: &RoleName, path: &str, target: TargetFile) -> Result<()> {
        self.store.add_target(&self.graph, role, path, target)?;
        self.publisher.mark_dirty();
        Ok(())
    }

    /// Hash `content` and add it as a target
    pub fn add_target_content(
        &mut self,
        role: &RoleName,
        path: &str,
        content: &[u8],
        custom: Option<serde_json::Value>,
    ) -> Result<TargetFile> {
        let target = TargetFile {
            length: content.len() as u64,
            hashes: self.hasher.hash(content),
            custom,
        };
        self.add_target(role, path, target.clone())?;
        Ok(target)
    }

    pub fn remove_target(&mut self, role: &RoleName, path: &str) -> Result<TargetFile> {
        let target = self.store.remove_target(role, path)?;
        self.publisher.mark_dirty();
        Ok(target)
    }

    /// Request re-signing of the given roles
    pub fn mark_dirty(&mut self, roles: &[RoleName]) -> Result<()> {
        for role in roles {
            self.require_role(role)?;
        }
        self.touch(roles);
        Ok(())
    }

    /// Fix a role's expiration instead of deriving it from the policy
    pub fn set_expiration(&mut self, role: &RoleName, expires: DateTime<Utc>) -> Result<()> {
        self.store.set_expiration(role, expires)?;
        self.publisher.mark_dirty();
        Ok(())
    }

    // Signing

    /// Add one more signature to a role's current document without changing it
    ///
    /// Used when a role's threshold needs keys held by different people. The
    /// new document is staged on the next write; the snapshot and timestamp
    /// are rebuilt to reference it.
    pub fn sign_role(&mut self, role: &RoleName, key: &SigningKey) -> Result<()> {
        let state = self.store.role(role)?;
        let document = state
            .document
            .as_ref()
            .ok_or_else(|| Error::malformed(role, "role has not been signed yet"))?;
        let signed = Signed::<RoleMetadata>::from_bytes(document)?;
        let body = SigningEngine::canonicalize(role, &signed.signed)?;

        let engine = SigningEngine::new(&self.keys);
        let mut signatures = signed.signatures;
        engine.append(role, key, &body, &mut signatures)?;

        let mut resigned = Vec::new();
        if role.kind() == RoleKind::Snapshot {
            for (bucket, stored) in &self.bucket_documents {
                let signed = Signed::<RoleMetadata>::from_bytes(&stored.document)?;
                if signed.signatures.iter().any(|s| &s.keyid == key.key_id()) {
                    continue;
                }
                let body = SigningEngine::canonicalize(role, &signed.signed)?;
                let mut bucket_signatures = signed.signatures;
                engine.append(role, key, &body, &mut bucket_signatures)?;
                let document = SigningEngine::envelope(role, signed.signed, bucket_signatures)?;
                resigned.push((
                    *bucket,
                    BucketDocument {
                        version: stored.version,
                        document,
                    },
                ));
            }
        }

        let document = SigningEngine::envelope(role, signed.signed, signatures.clone())?;
        self.store.replace_signatures(role, signatures, document)?;
        for (bucket, document) in resigned {
            self.bucket_documents.insert(bucket, document);
            self.unstaged_buckets.insert(bucket);
        }
        self.after_signing(role);
        tracing::info!("Added signature by {} to {}", key.key_id(), role);
        Ok(())
    }

    /// Bookkeeping after a role's document changed
    fn after_signing(&mut self, role: &RoleName) {
        self.unstaged.insert(role.clone());
        match role.kind() {
            RoleKind::Timestamp => {}
            RoleKind::Snapshot => self.store.mark_dirty(&[RoleName::timestamp()]),
            _ => self
                .store
                .mark_dirty(&[RoleName::snapshot(), RoleName::timestamp()]),
        }
        self.publisher.mark_dirty();
    }

    fn expiry_for(&self, role: &RoleName, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let state = self.store.role(role)?;
        let window = self.config.expirations.for_kind(role.kind());
        if role.kind() != RoleKind::Timestamp {
            return Ok(state.pinned_expiry.unwrap_or(now + window));
        }
        let others = self
            .store
            .roles()
            .filter(|(name, _)| name.kind() != RoleKind::Timestamp)
            .filter_map(|(_, state)| state.expires)
            .chain(self.buckets.values().map(|bucket| bucket.expires));
        let proposed = match state.pinned_expiry {
            Some(pinned) => pinned - now,
            None => window,
        };
        Ok(timestamp_expiry(now, proposed, others))
    }

    fn render_root(&self, version: u64, expires: DateTime<Utc>) -> Result<RootMetadata> {
        let mut root = RootMetadata::new(expires, self.config.consistent_snapshot);
        root.version = version;
        let top_level = RoleName::top_level();
        root.keys = self.keys.public_keys_for(&top_level);
        for role in top_level {
            let role_keys = self.keys.role_keys(&role)?.clone();
            root.roles.insert(role, role_keys);
        }
        Ok(root)
    }

    fn render_targets(
        &self,
        role: &RoleName,
        version: u64,
        expires: DateTime<Utc>,
    ) -> Result<TargetsMetadata> {
        let mut targets = TargetsMetadata::new(expires);
        targets.version = version;
        targets.targets = self.store.targets(role)?.clone();

        let children = self.graph.children(role);
        if !children.is_empty() {
            let names: Vec<RoleName> = children.iter().map(|e| e.name().clone()).collect();
            let mut delegations = Delegations {
                keys: self.keys.public_keys_for(&names),
                roles: Vec::with_capacity(children.len()),
            };
            for entry in children {
                let role_keys = self.keys.role_keys(entry.name())?;
                delegations.roles.push(DelegatedRole {
                    name: entry.name().clone(),
                    keyids: role_keys.keyids.clone(),
                    threshold: role_keys.threshold,
                    paths: entry.paths().to_vec(),
                    terminating: entry.terminating(),
                });
            }
            targets.delegations = Some(delegations);
        }
        Ok(targets)
    }

    fn render(
        &self,
        role: &RoleName,
        version: u64,
        expires: DateTime<Utc>,
    ) -> Result<RoleMetadata> {
        match role.kind() {
            RoleKind::Root => Ok(RoleMetadata::Root(self.render_root(version, expires)?)),
            RoleKind::Targets | RoleKind::Delegated => Ok(RoleMetadata::Targets(
                self.render_targets(role, version, expires)?,
            )),
            RoleKind::Timestamp => {
                let snapshot = self.store.role(&RoleName::snapshot())?;
                let document = snapshot.document.as_ref().ok_or_else(|| {
                    Error::malformed(role, "snapshot has not been signed yet")
                })?;
                let builder = ManifestBuilder::new(self.hasher.as_ref(), self.config.snapshot_mode);
                Ok(RoleMetadata::Timestamp(builder.build_timestamp(
                    snapshot.version,
                    document,
                    version,
                    expires,
                )))
            }
            RoleKind::Snapshot => Err(Error::malformed(
                role,
                "snapshot is built by the manifest builder",
            )),
        }
    }

    /// Re-sign one non-snapshot role at the next version
    ///
    /// Nothing changes unless signing succeeds and, when `require_threshold`
    /// is set, the new signatures verify.
    fn resign(&mut self, role: &RoleName, require_threshold: bool) -> Result<u64> {
        if role.kind() == RoleKind::Snapshot {
            return self.resign_snapshot(require_threshold);
        }
        let now = Utc::now();
        let version = self.store.next_version(role)?;
        let expires = self.expiry_for(role, now)?;
        let body = self.render(role, version, expires)?;
        let bytes = SigningEngine::canonicalize(role, &body)?;
        let expires = body.expires();

        let engine = SigningEngine::new(&self.keys);
        let signatures = engine.sign_all(role, &bytes)?;
        if require_threshold {
            engine.verify(role, &bytes, expires, &signatures, now)?;
        }
        let document = SigningEngine::envelope(role, body, signatures.clone())?;

        let version = self.store.bump_version(
            role,
            SignedRole {
                version,
                expires,
                signatures,
                document,
            },
        )?;
        self.store.unmark_dirty(role);
        self.after_signing(role);
        tracing::debug!("Signed {} version {}", role, version);
        Ok(version)
    }

    fn resign_snapshot(&mut self, require_threshold: bool) -> Result<u64> {
        let role = RoleName::snapshot();
        let now = Utc::now();
        let version = self.store.next_version(&role)?;
        let expires = self.expiry_for(&role, now)?;
        let bucket_expires = now + self.config.expirations.bucket;

        let builder = ManifestBuilder::new(self.hasher.as_ref(), self.config.snapshot_mode);
        let mut entries = BTreeMap::new();
        for (name, state) in self.store.roles() {
            if matches!(name.kind(), RoleKind::Snapshot | RoleKind::Timestamp) {
                continue;
            }
            let document = state
                .document
                .as_ref()
                .ok_or_else(|| Error::malformed(name, "role has not been signed yet"))?;
            entries.insert(name.clone(), builder.meta_file(state.version, document));
        }

        let engine = SigningEngine::new(&self.keys);
        let reusable = self.reusable_buckets(&engine, now);
        let built = builder.build_snapshot(&entries, &reusable, version, expires, bucket_expires)?;

        let body = RoleMetadata::Snapshot(built.snapshot);
        let bytes = SigningEngine::canonicalize(&role, &body)?;
        let signatures = engine.sign_all(&role, &bytes)?;
        if require_threshold {
            engine.verify(&role, &bytes, body.expires(), &signatures, now)?;
        }

        let mut signed_buckets = Vec::with_capacity(built.buckets.len());
        for bucket in built.buckets {
            let id = bucket.bucket;
            let bucket_version = bucket.version;
            let bucket_body = RoleMetadata::Bucket(bucket);
            let bucket_bytes = SigningEngine::canonicalize(&role, &bucket_body)?;
            let bucket_signatures = engine.sign_all(&role, &bucket_bytes)?;
            if require_threshold {
                let bucket_expires = bucket_body.expires();
                engine.verify(&role, &bucket_bytes, bucket_expires, &bucket_signatures, now)?;
            }
            signed_buckets.push((
                id,
                BucketDocument {
                    version: bucket_version,
                    document: SigningEngine::envelope(&role, bucket_body, bucket_signatures)?,
                },
            ));
        }

        let expires = body.expires();
        let document = SigningEngine::envelope(&role, body, signatures.clone())?;
        let version = self.store.bump_version(
            &role,
            SignedRole {
                version,
                expires,
                signatures,
                document,
            },
        )?;
        self.buckets = built.bucket_states;
        let buckets = &self.buckets;
        self.bucket_documents.retain(|bucket, _| buckets.contains_key(bucket));
        let rewritten = signed_buckets.len();
        for (bucket, document) in signed_buckets {
            self.bucket_documents.insert(bucket, document);
            self.unstaged_buckets.insert(bucket);
        }
        self.store.unmark_dirty(&role);
        self.after_signing(&role);
        tracing::debug!(
            "Signed snapshot version {} over {} roles, {} bucket(s) rewritten",
            version,
            entries.len(),
            rewritten
        );
        Ok(version)
    }

    /// Buckets whose stored documents may be kept as they are
    ///
    /// A bucket is re-signed when its stored signatures no longer meet the
    /// snapshot threshold, for instance after a snapshot key rotation.
    fn reusable_buckets(
        &self,
        engine: &SigningEngine<'_>,
        now: DateTime<Utc>,
    ) -> BTreeMap<u32, BucketState> {
        let mut reusable = BTreeMap::new();
        for (bucket, state) in &self.buckets {
            let Some(stored) = self.bucket_documents.get(bucket) else {
                continue;
            };
            match still_signed(engine, &stored.document, now) {
                Ok(()) => {
                    reusable.insert(*bucket, *state);
                }
                Err(e) => tracing::debug!("Re-signing bucket {}: {}", bucket, e),
            }
        }
        reusable
    }

    // Writing

    /// Re-sign one dirty role, verify its threshold and stage it
    pub async fn write_role(&mut self, role: &RoleName) -> Result<u64> {
        self.require_role(role)?;
        let version = self.resign(role, true)?;
        self.stage().await?;
        Ok(version)
    }

    /// Re-sign and stage a role with whatever signing keys are loaded
    ///
    /// The threshold is not checked, so other key holders can add their
    /// signatures with [`Repository::sign_role`] before publishing.
    pub async fn write_partial(&mut self, role: &RoleName) -> Result<u64> {
        self.require_role(role)?;
        let version = self.resign(role, false)?;
        self.stage().await?;
        Ok(version)
    }

    /// Dirty roles in signing order: root, delegated roles deepest first,
    /// targets, then snapshot and timestamp
    fn signing_order(&self) -> Vec<RoleName> {
        let dirty: Vec<RoleName> = self.store.dirty().iter().cloned().collect();
        let mut delegated: Vec<RoleName> = dirty
            .iter()
            .filter(|r| r.kind() == RoleKind::Delegated)
            .cloned()
            .collect();
        delegated.sort_by(|a, b| {
            self.graph
                .depth(b)
                .cmp(&self.graph.depth(a))
                .then_with(|| a.cmp(b))
        });

        let mut order = Vec::with_capacity(dirty.len());
        if self.store.dirty().contains(&RoleName::root()) {
            order.push(RoleName::root());
        }
        order.extend(delegated);
        if self.store.dirty().contains(&RoleName::targets()) {
            order.push(RoleName::targets());
        }
        order
    }

    /// Re-sign every dirty role and stage the results
    ///
    /// Returns the roles signed, in signing order. On error, roles signed
    /// before the failure keep their new versions.
    pub async fn write_all(&mut self) -> Result<Vec<RoleName>> {
        let mut written = Vec::new();
        for role in self.signing_order() {
            self.resign(&role, true)?;
            written.push(role);
        }
        for role in [RoleName::snapshot(), RoleName::timestamp()] {
            if self.store.dirty().contains(&role) {
                self.resign(&role, true)?;
                written.push(role);
            }
        }
        self.stage().await?;
        Ok(written)
    }

    /// Write documents signed since the last write to staging, and drop
    /// revoked roles from it
    pub async fn stage(&mut self) -> Result<()> {
        for role in std::mem::take(&mut self.removed) {
            self.storage.remove_staged(&role.file_name()).await?;
        }

        let pending: Vec<RoleName> = self.unstaged.iter().cloned().collect();
        for role in pending {
            let state = self.store.role(&role)?;
            let document = state
                .document
                .as_ref()
                .ok_or_else(|| Error::malformed(&role, "role has not been signed yet"))?;
            self.storage.write_staged(&role.file_name(), document).await?;
            if self.config.consistent_snapshot && role.kind() != RoleKind::Timestamp {
                self.storage
                    .write_staged(&role.versioned_file_name(state.version), document)
                    .await?;
            }
            if role.kind() == RoleKind::Snapshot {
                self.stage_buckets().await?;
            }
            self.unstaged.remove(&role);
        }
        Ok(())
    }

    /// Write buckets signed since the last write; unchanged buckets keep
    /// their staged bytes
    async fn stage_buckets(&mut self) -> Result<()> {
        let fanout = match self.config.snapshot_mode {
            SnapshotMode::Tree { fanout } => fanout,
            SnapshotMode::Plain => 0,
        };
        let pending: Vec<u32> = self.unstaged_buckets.iter().copied().collect();
        for bucket in pending {
            if let Some(stored) = self.bucket_documents.get(&bucket) {
                let name = BucketMetadata::file_name(bucket);
                self.storage.write_staged(&name, &stored.document).await?;
                if self.config.consistent_snapshot {
                    self.storage
                        .write_staged(&format!("{}.{}", stored.version, name), &stored.document)
                        .await?;
                }
            }
            self.unstaged_buckets.remove(&bucket);
        }

        // Buckets beyond a reduced fan-out no longer belong to the tree
        for name in self.storage.list_staged().await? {
            if let Some(bucket) = BucketMetadata::bucket_from_file_name(&name) {
                if bucket >= fanout {
                    self.storage.remove_staged(&name).await?;
                }
            }
        }
        Ok(())
    }

    // Publishing

    /// Sign everything dirty, verify the staged tree and promote it to live
    ///
    /// A failure before the swap leaves live untouched and the repository
    /// `Dirty`. A failed swap is fatal: publishing stays halted until
    /// [`Repository::verify_live`] succeeds.
    pub async fn publish(&mut self) -> Result<PublishReport> {
        self.publisher.begin()?;

        let verified = match self.prepare().await {
            Ok(verified) => verified,
            Err(e) => {
                self.publisher.fail(&e);
                return Err(e);
            }
        };
        self.publisher.verified();

        let generation = self.publisher.swap(&self.storage).await?;
        self.store.clear_dirty();
        self.publisher.finish();
        tracing::info!(
            "Published generation {} (snapshot version {})",
            generation,
            verified.snapshot.version
        );
        Ok(PublishReport {
            generation,
            versions: verified.versions,
            snapshot: verified.snapshot,
        })
    }

    async fn prepare(&mut self) -> Result<VerifiedTree> {
        self.write_all().await?;
        self.verify_staged().await
    }

    /// Verify the staged tree as a client would
    pub async fn verify_staged(&self) -> Result<VerifiedTree> {
        verify_tree(&self.storage, TreeLocation::Staged, self.hasher.as_ref(), Utc::now()).await
    }

    /// Verify the live tree, lifting a halt left by a failed swap
    pub async fn verify_live(&mut self) -> Result<VerifiedTree> {
        let verified =
            verify_tree(&self.storage, TreeLocation::Live, self.hasher.as_ref(), Utc::now())
                .await?;
        self.publisher.resume();
        Ok(verified)
    }

    /// The bucket a role is listed in when snapshots are trees
    pub fn bucket_of(&self, role: &RoleName) -> Option<u32> {
        match self.config.snapshot_mode {
            SnapshotMode::Tree { fanout } => Some(bucket_for(role, fanout)),
            SnapshotMode::Plain => None,
        }
    }

    async fn read_staged(&self, role: &RoleName) -> Result<StoredDocument> {
        let name = role.file_name();
        let bytes = self
            .storage
            .read_staged(&name)
            .await?
            .ok_or_else(|| Error::malformed(role, "document is missing"))?;
        let signed =
            Signed::<RoleMetadata>::from_bytes(&bytes).map_err(|e| Error::malformed(role, e))?;
        Ok(StoredDocument { bytes, signed })
    }

    fn restore(
        &mut self,
        role: &RoleName,
        document: StoredDocument,
        targets: BTreeMap<String, TargetFile>,
    ) {
        let body = &document.signed.signed;
        let signed = SignedRole {
            version: body.version(),
            expires: body.expires(),
            signatures: document.signed.signatures.clone(),
            document: document.bytes,
        };
        self.store.restore(role, signed, targets);
    }
}

/// Check a stored signed document against the current keys
fn still_signed(engine: &SigningEngine<'_>, document: &[u8], now: DateTime<Utc>) -> Result<()> {
    let role = RoleName::snapshot();
    let signed = Signed::<RoleMetadata>::from_bytes(document)?;
    let body = SigningEngine::canonicalize(&role, &signed.signed)?;
    engine.verify(&role, &body, signed.signed.expires(), &signed.signatures, now)
}

struct StoredDocument {
    bytes: Vec<u8>,
    signed: Signed<RoleMetadata>,
}
