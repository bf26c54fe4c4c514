//! Versioned, dirty-tracked state of every role

use crate::delegation::DelegationGraph;
use crate::dirty::DirtySet;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use notary_types::{to_canonical_bytes, RoleName, SignatureEntry, TargetFile};
use std::collections::BTreeMap;

/// Current state of one role
#[derive(Debug, Clone, Default)]
pub struct RoleState {
    /// Version of the last signed document, zero before the first signing
    pub version: u64,
    /// Expiration of the last signed document
    pub expires: Option<DateTime<Utc>>,
    /// Expiration fixed by the operator instead of the policy
    pub pinned_expiry: Option<DateTime<Utc>>,
    /// Targets listed by a targets-like role
    pub targets: BTreeMap<String, TargetFile>,
    /// Signatures over the last signed body
    pub signatures: Vec<SignatureEntry>,
    /// Stored bytes of the last signed document
    pub document: Option<Vec<u8>>,
}

/// A freshly signed document ready to replace a role's state
#[derive(Debug, Clone)]
pub struct SignedRole {
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub signatures: Vec<SignatureEntry>,
    pub document: Vec<u8>,
}

/// Metadata state for all roles plus the set of roles awaiting re-signing
#[derive(Debug, Default)]
pub struct MetadataStore {
    roles: BTreeMap<RoleName, RoleState>,
    dirty: DirtySet,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a role with no signed document yet
    pub fn ensure_role(&mut self, role: &RoleName) {
        self.roles.entry(role.clone()).or_default();
    }

    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.contains_key(role)
    }

    pub fn role(&self, role: &RoleName) -> Result<&RoleState> {
        self.roles
            .get(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))
    }

    fn role_mut(&mut self, role: &RoleName) -> Result<&mut RoleState> {
        self.roles
            .get_mut(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))
    }

    pub fn roles(&self) -> impl Iterator<Item = (&RoleName, &RoleState)> {
        self.roles.iter()
    }

    pub(crate) fn remove_role(&mut self, role: &RoleName) {
        self.roles.remove(role);
        self.dirty.unmark(role);
    }

    /// Whether `role` lists `path` as a target
    pub fn claims(&self, role: &RoleName, path: &str) -> bool {
        self.roles
            .get(role)
            .map(|state| state.targets.contains_key(path))
            .unwrap_or(false)
    }

    /// Add or replace a target in a role
    ///
    /// The role must appear in the delegation graph's resolution of `path`, and
    /// no other role on that chain may already list it. The entry must have a
    /// canonical form, or the role could never be signed again.
    pub fn add_target(
        &mut self,
        graph: &DelegationGraph,
        role: &RoleName,
        path: &str,
        target: TargetFile,
    ) -> Result<()> {
        if !role.kind().is_targets_like() || !graph.contains(role) {
            return Err(Error::UnknownRole(role.to_string()));
        }
        let chain = graph.resolve(path, |r| self.claims(r, path));
        let owned_elsewhere = chain.iter().any(|r| r != role && self.claims(r, path));
        if !chain.contains(role) || owned_elsewhere {
            return Err(Error::UnauthorizedPath {
                role: role.clone(),
                path: path.to_string(),
            });
        }
        to_canonical_bytes(&target).map_err(|e| Error::malformed(role, e))?;
        self.role_mut(role)?
            .targets
            .insert(path.to_string(), target);
        self.dirty.mark(role);
        tracing::debug!("Added target {} to {}", path, role);
        Ok(())
    }

    pub fn remove_target(&mut self, role: &RoleName, path: &str) -> Result<TargetFile> {
        let target = self
            .role_mut(role)?
            .targets
            .remove(path)
            .ok_or_else(|| Error::TargetNotFound {
                role: role.clone(),
                path: path.to_string(),
            })?;
        self.dirty.mark(role);
        Ok(target)
    }

    pub fn targets(&self, role: &RoleName) -> Result<&BTreeMap<String, TargetFile>> {
        Ok(&self.role(role)?.targets)
    }

    pub fn mark_dirty<'a>(&mut self, roles: impl IntoIterator<Item = &'a RoleName>) {
        self.dirty.mark_all(roles);
    }

    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    pub(crate) fn unmark_dirty(&mut self, role: &RoleName) {
        self.dirty.unmark(role);
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn get_version(&self, role: &RoleName) -> Result<u64> {
        Ok(self.role(role)?.version)
    }

    /// The version the next signing of `role` will carry
    pub fn next_version(&self, role: &RoleName) -> Result<u64> {
        Ok(self.get_version(role)? + 1)
    }

    /// Replace a role's signed state with a newly signed document
    ///
    /// The version must be exactly one past the current version.
    pub fn bump_version(&mut self, role: &RoleName, signed: SignedRole) -> Result<u64> {
        let state = self.role_mut(role)?;
        let expected = state.version + 1;
        if signed.version != expected {
            return Err(Error::VersionConflict {
                role: role.clone(),
                expected,
                found: signed.version,
            });
        }
        state.version = signed.version;
        state.expires = Some(signed.expires);
        state.signatures = signed.signatures;
        state.document = Some(signed.document);
        Ok(state.version)
    }

    /// Replace the signatures and stored bytes of the current version
    pub(crate) fn replace_signatures(
        &mut self,
        role: &RoleName,
        signatures: Vec<SignatureEntry>,
        document: Vec<u8>,
    ) -> Result<()> {
        let state = self.role_mut(role)?;
        state.signatures = signatures;
        state.document = Some(document);
        Ok(())
    }

    /// Pin a role's expiration, overriding the policy on later signings
    pub fn set_expiration(&mut self, role: &RoleName, expires: DateTime<Utc>) -> Result<()> {
        self.role_mut(role)?.pinned_expiry = Some(expires);
        self.dirty.mark(role);
        Ok(())
    }

    /// Restore a role from a stored document
    pub(crate) fn restore(
        &mut self,
        role: &RoleName,
        signed: SignedRole,
        targets: BTreeMap<String, TargetFile>,
    ) {
        let state = self.roles.entry(role.clone()).or_default();
        state.version = signed.version;
        state.expires = Some(signed.expires);
        state.signatures = signed.signatures;
        state.document = Some(signed.document);
        state.targets = targets;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_types::Hex;

    fn target() -> TargetFile {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), Hex::encode(&[0u8; 32]));
        TargetFile {
            length: 5,
            hashes,
            custom: None,
        }
    }

    fn signed(version: u64) -> SignedRole {
        SignedRole {
            version,
            expires: Utc::now(),
            signatures: Vec::new(),
            document: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_add_target_checks_delegation() {
        let mut graph = DelegationGraph::new();
        let repo = RoleName::new("my_repo").unwrap();
        graph
            .delegate(&RoleName::targets(), &repo, vec!["my_repo/*".to_string()], false)
            .unwrap();

        let mut store = MetadataStore::new();
        store.ensure_role(&RoleName::targets());
        store.ensure_role(&repo);

        store
            .add_target(&graph, &repo, "my_repo/image1", target())
            .unwrap();
        assert!(store.dirty().contains(&repo));

        let result = store.add_target(&graph, &repo, "other/file.txt", target());
        assert!(matches!(result, Err(Error::UnauthorizedPath { .. })));

        // The top-level role may claim any path
        store
            .add_target(&graph, &RoleName::targets(), "other/file.txt", target())
            .unwrap();
    }

    #[test]
    fn test_path_claimed_by_parent_is_not_delegated() {
        let mut graph = DelegationGraph::new();
        let repo = RoleName::new("my_repo").unwrap();
        graph
            .delegate(&RoleName::targets(), &repo, vec!["my_repo/*".to_string()], false)
            .unwrap();

        let mut store = MetadataStore::new();
        store.ensure_role(&RoleName::targets());
        store.ensure_role(&repo);
        store
            .add_target(&graph, &RoleName::targets(), "my_repo/image1", target())
            .unwrap();

        let result = store.add_target(&graph, &repo, "my_repo/image1", target());
        assert!(matches!(result, Err(Error::UnauthorizedPath { .. })));
    }

    #[test]
    fn test_parent_cannot_take_over_delegated_target() {
        let mut graph = DelegationGraph::new();
        let repo = RoleName::new("my_repo").unwrap();
        graph
            .delegate(&RoleName::targets(), &repo, vec!["my_repo/*".to_string()], false)
            .unwrap();

        let mut store = MetadataStore::new();
        store.ensure_role(&RoleName::targets());
        store.ensure_role(&repo);
        store
            .add_target(&graph, &repo, "my_repo/image1", target())
            .unwrap();

        let result = store.add_target(&graph, &RoleName::targets(), "my_repo/image1", target());
        assert!(matches!(result, Err(Error::UnauthorizedPath { .. })));
    }

    #[test]
    fn test_target_without_canonical_form_rejected() {
        let graph = DelegationGraph::new();
        let mut store = MetadataStore::new();
        let targets = RoleName::targets();
        store.ensure_role(&targets);

        let mut scored = target();
        scored.custom = Some(serde_json::json!({"score": 1.5}));
        let result = store.add_target(&graph, &targets, "a.txt", scored);
        assert!(matches!(result, Err(Error::MalformedBody { .. })));
        assert!(store.targets(&targets).unwrap().is_empty());
        assert!(!store.dirty().contains(&targets));
    }

    #[test]
    fn test_remove_missing_target() {
        let mut store = MetadataStore::new();
        store.ensure_role(&RoleName::targets());
        assert!(matches!(
            store.remove_target(&RoleName::targets(), "nope"),
            Err(Error::TargetNotFound { .. })
        ));
    }

    #[test]
    fn test_version_is_monotonic() {
        let mut store = MetadataStore::new();
        let role = RoleName::targets();
        store.ensure_role(&role);
        assert_eq!(store.get_version(&role).unwrap(), 0);

        assert_eq!(store.bump_version(&role, signed(1)).unwrap(), 1);
        assert_eq!(store.bump_version(&role, signed(2)).unwrap(), 2);

        let result = store.bump_version(&role, signed(2));
        assert!(matches!(
            result,
            Err(Error::VersionConflict {
                expected: 3,
                found: 2,
                ..
            })
        ));
        let result = store.bump_version(&role, signed(5));
        assert!(result.is_err());
        assert_eq!(store.get_version(&role).unwrap(), 2);
    }
}
