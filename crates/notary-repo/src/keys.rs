//! Verification keys, thresholds and loaded signing keys per role

use crate::error::{Error, Result};
use notary_crypto::{Keyring, SignatureTally, SigningKey};
use notary_types::{KeyId, PublicKey, RoleKeys, RoleName, SignatureEntry};
use std::collections::BTreeMap;

/// Key material known to a repository session
///
/// Every role, top-level or delegated, has an entry listing the ids of its
/// verification keys and its threshold. Public keys are shared across roles by
/// id. Signing keys are held only for the lifetime of the session and are
/// never written out.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keyring: Keyring,
    public_keys: BTreeMap<KeyId, PublicKey>,
    roles: BTreeMap<RoleName, RoleKeys>,
    signers: BTreeMap<RoleName, BTreeMap<KeyId, SigningKey>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role with no keys and a threshold of one
    pub fn ensure_role(&mut self, role: &RoleName) {
        self.roles.entry(role.clone()).or_insert_with(|| RoleKeys {
            keyids: Vec::new(),
            threshold: 1,
        });
    }

    pub fn has_role(&self, role: &RoleName) -> bool {
        self.roles.contains_key(role)
    }

    /// Add a verification key to a role
    ///
    /// Returns `false` when the role already lists the key.
    pub fn add_verification_key(&mut self, role: &RoleName, key: &PublicKey) -> Result<bool> {
        let key_id = key.key_id()?;
        let entry = self.role_entry_mut(role)?;
        if entry.keyids.contains(&key_id) {
            return Ok(false);
        }
        entry.keyids.push(key_id.clone());
        if !self.public_keys.contains_key(&key_id) {
            self.keyring.add_public_key(key)?;
            self.public_keys.insert(key_id.clone(), key.clone());
        }
        tracing::debug!("Added key {} to role {}", key_id, role);
        Ok(true)
    }

    /// Remove a verification key from a role, dropping any loaded signer for it
    pub fn remove_verification_key(&mut self, role: &RoleName, key_id: &KeyId) -> Result<()> {
        let entry = self.role_entry_mut(role)?;
        let position = entry
            .keyids
            .iter()
            .position(|id| id == key_id)
            .ok_or_else(|| Error::KeyNotFound {
                role: role.clone(),
                key_id: key_id.clone(),
            })?;
        entry.keyids.remove(position);
        if let Some(signers) = self.signers.get_mut(role) {
            signers.remove(key_id);
        }
        tracing::debug!("Removed key {} from role {}", key_id, role);
        Ok(())
    }

    /// Set a role's threshold; it must be positive and at most the number of keys
    pub fn set_threshold(&mut self, role: &RoleName, threshold: u32) -> Result<()> {
        let entry = self.role_entry_mut(role)?;
        if threshold == 0 || threshold as usize > entry.keyids.len() {
            return Err(Error::Config(format!(
                "threshold {} for role {} must be between 1 and {}",
                threshold,
                role,
                entry.keyids.len()
            )));
        }
        entry.threshold = threshold;
        Ok(())
    }

    /// Hold a signing key for a role for the rest of the session
    pub fn load_signing_key(&mut self, role: &RoleName, key: SigningKey) -> Result<()> {
        self.check_member(role, key.key_id())?;
        tracing::debug!("Loaded signing key {} for role {}", key.key_id(), role);
        self.signers
            .entry(role.clone())
            .or_default()
            .insert(key.key_id().clone(), key);
        Ok(())
    }

    /// Fail with [`Error::KeyNotFound`] unless `key_id` verifies for `role`
    pub fn check_member(&self, role: &RoleName, key_id: &KeyId) -> Result<()> {
        let entry = self.role_keys(role)?;
        if entry.keyids.contains(key_id) {
            Ok(())
        } else {
            Err(Error::KeyNotFound {
                role: role.clone(),
                key_id: key_id.clone(),
            })
        }
    }

    pub fn role_keys(&self, role: &RoleName) -> Result<&RoleKeys> {
        self.roles
            .get(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))
    }

    pub fn threshold(&self, role: &RoleName) -> Result<u32> {
        Ok(self.role_keys(role)?.threshold)
    }

    pub fn public_key(&self, key_id: &KeyId) -> Option<&PublicKey> {
        self.public_keys.get(key_id)
    }

    /// Public keys of the given roles, keyed by id
    pub fn public_keys_for<'a>(
        &self,
        roles: impl IntoIterator<Item = &'a RoleName>,
    ) -> BTreeMap<KeyId, PublicKey> {
        let mut keys = BTreeMap::new();
        for role in roles {
            if let Some(entry) = self.roles.get(role) {
                for key_id in &entry.keyids {
                    if let Some(key) = self.public_keys.get(key_id) {
                        keys.insert(key_id.clone(), key.clone());
                    }
                }
            }
        }
        keys
    }

    /// Loaded signing keys for a role, in key id order
    pub fn signers(&self, role: &RoleName) -> impl Iterator<Item = &SigningKey> {
        self.signers.get(role).into_iter().flat_map(|s| s.values())
    }

    /// Count the distinct verification keys of `role` with a valid signature over `body`
    pub fn tally(
        &self,
        role: &RoleName,
        body: &[u8],
        signatures: &[SignatureEntry],
    ) -> Result<SignatureTally> {
        let entry = self.role_keys(role)?;
        Ok(self.keyring.tally(&entry.keyids, body, signatures))
    }

    /// Whether enough distinct current keys signed `body`
    pub fn has_threshold(
        &self,
        role: &RoleName,
        body: &[u8],
        signatures: &[SignatureEntry],
    ) -> Result<bool> {
        let threshold = self.threshold(role)?;
        Ok(self.tally(role, body, signatures)?.meets(threshold))
    }

    /// Forget a role's keys and signers
    pub fn remove_role(&mut self, role: &RoleName) {
        self.roles.remove(role);
        self.signers.remove(role);
    }

    /// Restore a role's key set from stored metadata
    pub(crate) fn restore_role(
        &mut self,
        role: &RoleName,
        keys: &RoleKeys,
        public_keys: &BTreeMap<KeyId, PublicKey>,
    ) -> Result<()> {
        self.ensure_role(role);
        for key_id in &keys.keyids {
            let key = public_keys.get(key_id).ok_or_else(|| Error::KeyNotFound {
                role: role.clone(),
                key_id: key_id.clone(),
            })?;
            if &key.key_id()? != key_id {
                return Err(Error::malformed(
                    role,
                    format!("key listed as {} has a different id", key_id),
                ));
            }
            self.add_verification_key(role, key)?;
        }
        self.set_threshold(role, keys.threshold)
    }

    fn role_entry_mut(&mut self, role: &RoleName) -> Result<&mut RoleKeys> {
        self.roles
            .get_mut(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_crypto::KeyPair;

    fn signing_key() -> SigningKey {
        SigningKey::new(KeyPair::generate_ed25519().unwrap()).unwrap()
    }

    fn registry_with(role: &RoleName, keys: &[&SigningKey]) -> KeyRegistry {
        let mut registry = KeyRegistry::new();
        registry.ensure_role(role);
        for key in keys {
            registry.add_verification_key(role, key.public_key()).unwrap();
        }
        registry
    }

    #[test]
    fn test_duplicate_key_is_noop() {
        let role = RoleName::targets();
        let key = signing_key();
        let mut registry = registry_with(&role, &[&key]);
        assert!(!registry.add_verification_key(&role, key.public_key()).unwrap());
        assert_eq!(registry.role_keys(&role).unwrap().keyids.len(), 1);
    }

    #[test]
    fn test_remove_missing_key_fails() {
        let role = RoleName::targets();
        let mut registry = registry_with(&role, &[]);
        let result = registry.remove_verification_key(&role, &KeyId::new("abc"));
        assert!(matches!(result, Err(Error::KeyNotFound { .. })));
    }

    #[test]
    fn test_threshold_bounds() {
        let role = RoleName::root();
        let (a, b) = (signing_key(), signing_key());
        let mut registry = registry_with(&role, &[&a, &b]);
        assert!(registry.set_threshold(&role, 2).is_ok());
        assert!(registry.set_threshold(&role, 3).is_err());
        assert!(registry.set_threshold(&role, 0).is_err());
    }

    #[test]
    fn test_signer_must_belong_to_role() {
        let role = RoleName::snapshot();
        let member = signing_key();
        let outsider = signing_key();
        let mut registry = registry_with(&role, &[&member]);
        assert!(registry.load_signing_key(&role, member).is_ok());
        assert!(matches!(
            registry.load_signing_key(&role, outsider),
            Err(Error::KeyNotFound { .. })
        ));
        assert_eq!(registry.signers(&role).count(), 1);
    }

    #[test]
    fn test_revoked_key_signatures_do_not_count() {
        let role = RoleName::targets();
        let (a, b) = (signing_key(), signing_key());
        let mut registry = registry_with(&role, &[&a, &b]);
        registry.set_threshold(&role, 2).unwrap();

        let body = b"body";
        let signatures = vec![a.sign(body).unwrap(), b.sign(body).unwrap()];
        assert!(registry.has_threshold(&role, body, &signatures).unwrap());

        registry.remove_verification_key(&role, b.key_id()).unwrap();
        registry.set_threshold(&role, 1).unwrap();
        let tally = registry.tally(&role, body, &signatures).unwrap();
        assert_eq!(tally.count(), 1);
        assert_eq!(tally.unauthorized, 1);
    }
}
