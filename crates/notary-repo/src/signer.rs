//! Canonicalization, threshold signing and verification of role bodies

use crate::error::{Error, Result};
use crate::keys::KeyRegistry;
use chrono::{DateTime, Utc};
use notary_crypto::SigningKey;
use notary_types::{to_canonical_bytes, RoleMetadata, RoleName, SignatureEntry, Signed};

/// Signs and verifies role bodies against the keys in a [`KeyRegistry`]
#[derive(Debug, Clone, Copy)]
pub struct SigningEngine<'a> {
    keys: &'a KeyRegistry,
}

impl<'a> SigningEngine<'a> {
    pub fn new(keys: &'a KeyRegistry) -> Self {
        Self { keys }
    }

    /// Deterministic bytes of a body; signatures are computed over these
    pub fn canonicalize(role: &RoleName, body: &RoleMetadata) -> Result<Vec<u8>> {
        to_canonical_bytes(body).map_err(|e| Error::malformed(role, e))
    }

    /// Stored form of a signed body
    pub fn envelope(
        role: &RoleName,
        body: RoleMetadata,
        signatures: Vec<SignatureEntry>,
    ) -> Result<Vec<u8>> {
        Signed {
            signatures,
            signed: body,
        }
        .to_bytes()
        .map_err(|e| Error::malformed(role, e))
    }

    /// Sign `body` with one key of `role`
    pub fn sign(
        &self,
        role: &RoleName,
        key: &SigningKey,
        body: &[u8],
    ) -> Result<SignatureEntry> {
        self.keys.check_member(role, key.key_id())?;
        Ok(key.sign(body)?)
    }

    /// Sign `body` with every signing key loaded for `role`
    pub fn sign_all(&self, role: &RoleName, body: &[u8]) -> Result<Vec<SignatureEntry>> {
        let mut signatures = Vec::new();
        for key in self.keys.signers(role) {
            signatures.push(self.sign(role, key, body)?);
        }
        tracing::debug!("Signed {} with {} key(s)", role, signatures.len());
        Ok(signatures)
    }

    /// Add a signature from `key`, replacing an earlier one by the same key
    pub fn append(
        &self,
        role: &RoleName,
        key: &SigningKey,
        body: &[u8],
        signatures: &mut Vec<SignatureEntry>,
    ) -> Result<()> {
        let signature = self.sign(role, key, body)?;
        signatures.retain(|s| s.keyid != signature.keyid);
        signatures.push(signature);
        Ok(())
    }

    /// Check the threshold and expiration of a signed body
    ///
    /// Falling short of the threshold is reported as [`Error::InvalidSignature`]
    /// when an authorized key's signature failed to verify, and as
    /// [`Error::ThresholdNotMet`] otherwise. Bad signatures are ignored once
    /// the threshold is met.
    pub fn verify(
        &self,
        role: &RoleName,
        body: &[u8],
        expires: DateTime<Utc>,
        signatures: &[SignatureEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        if now >= expires {
            return Err(Error::ExpiredMetadata {
                role: role.clone(),
                expires,
            });
        }

        let threshold = self.keys.threshold(role)?;
        let tally = self.keys.tally(role, body, signatures)?;
        if tally.meets(threshold) {
            return Ok(());
        }
        if let Some(key_id) = tally.invalid.iter().next() {
            return Err(Error::InvalidSignature {
                role: role.clone(),
                key_id: key_id.clone(),
            });
        }
        Err(Error::ThresholdNotMet {
            role: role.clone(),
            required: threshold,
            found: tally.count(),
        })
    }

    /// Like [`SigningEngine::verify`], returning only whether the body is valid
    pub fn is_valid(
        &self,
        role: &RoleName,
        body: &[u8],
        expires: DateTime<Utc>,
        signatures: &[SignatureEntry],
        now: DateTime<Utc>,
    ) -> bool {
        self.verify(role, body, expires, signatures, now).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use notary_crypto::KeyPair;
    use notary_types::{Hex, TargetsMetadata};
    use rstest::rstest;

    fn signing_key() -> SigningKey {
        SigningKey::new(KeyPair::generate_ed25519().unwrap()).unwrap()
    }

    fn body(expires: DateTime<Utc>) -> RoleMetadata {
        RoleMetadata::Targets(TargetsMetadata::new(expires))
    }

    /// Registry with `n` keys for targets at the given threshold, all loaded
    fn setup(n: usize, threshold: u32) -> (KeyRegistry, Vec<SigningKey>) {
        let role = RoleName::targets();
        let mut registry = KeyRegistry::new();
        registry.ensure_role(&role);
        let keys: Vec<SigningKey> = (0..n).map(|_| signing_key()).collect();
        for key in &keys {
            registry.add_verification_key(&role, key.public_key()).unwrap();
        }
        registry.set_threshold(&role, threshold).unwrap();
        (registry, keys)
    }

    #[rstest]
    #[case(3, 2, 2, true)]
    #[case(3, 2, 1, false)]
    #[case(3, 3, 3, true)]
    #[case(2, 2, 1, false)]
    #[case(1, 1, 1, true)]
    fn test_threshold(
        #[case] keys: usize,
        #[case] threshold: u32,
        #[case] signers: usize,
        #[case] accepted: bool,
    ) {
        let role = RoleName::targets();
        let (registry, signing_keys) = setup(keys, threshold);
        let engine = SigningEngine::new(&registry);
        let now = Utc::now();
        let bytes = SigningEngine::canonicalize(&role, &body(now + Duration::days(1))).unwrap();

        let signatures: Vec<_> = signing_keys[..signers]
            .iter()
            .map(|k| engine.sign(&role, k, &bytes).unwrap())
            .collect();
        let result = engine.verify(&role, &bytes, now + Duration::days(1), &signatures, now);
        if accepted {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(Error::ThresholdNotMet { .. })));
        }
    }

    #[test]
    fn test_duplicate_signatures_count_once() {
        let role = RoleName::targets();
        let (registry, keys) = setup(2, 2);
        let engine = SigningEngine::new(&registry);
        let now = Utc::now();
        let expires = now + Duration::days(1);
        let bytes = SigningEngine::canonicalize(&role, &body(expires)).unwrap();

        let sig = engine.sign(&role, &keys[0], &bytes).unwrap();
        let result = engine.verify(&role, &bytes, expires, &[sig.clone(), sig], now);
        assert!(matches!(result, Err(Error::ThresholdNotMet { found: 1, .. })));
    }

    #[test]
    fn test_mutated_body_invalidates_signatures() {
        let role = RoleName::targets();
        let (registry, keys) = setup(1, 1);
        let engine = SigningEngine::new(&registry);
        let now = Utc::now();
        let expires = now + Duration::days(1);
        let bytes = SigningEngine::canonicalize(&role, &body(expires)).unwrap();
        let signatures = vec![engine.sign(&role, &keys[0], &bytes).unwrap()];
        assert!(engine.is_valid(&role, &bytes, expires, &signatures, now));

        let mut changed = TargetsMetadata::new(expires);
        changed.version = 2;
        let changed = SigningEngine::canonicalize(&role, &RoleMetadata::Targets(changed)).unwrap();
        let result = engine.verify(&role, &changed, expires, &signatures, now);
        assert!(matches!(result, Err(Error::InvalidSignature { .. })));
    }

    #[test]
    fn test_extra_bad_signature_ignored_when_threshold_met() {
        let role = RoleName::targets();
        let (registry, keys) = setup(2, 1);
        let engine = SigningEngine::new(&registry);
        let now = Utc::now();
        let expires = now + Duration::days(1);
        let bytes = SigningEngine::canonicalize(&role, &body(expires)).unwrap();

        let good = engine.sign(&role, &keys[0], &bytes).unwrap();
        let bad = SignatureEntry {
            keyid: keys[1].key_id().clone(),
            sig: Hex::encode(&[0u8; 64]),
        };
        assert!(engine.verify(&role, &bytes, expires, &[bad, good], now).is_ok());
    }

    #[test]
    fn test_expired_rejected() {
        let role = RoleName::targets();
        let (registry, keys) = setup(1, 1);
        let engine = SigningEngine::new(&registry);
        let now = Utc::now();
        let expires = now - Duration::seconds(1);
        let bytes = SigningEngine::canonicalize(&role, &body(expires)).unwrap();
        let signatures = vec![engine.sign(&role, &keys[0], &bytes).unwrap()];
        let result = engine.verify(&role, &bytes, expires, &signatures, now);
        assert!(matches!(result, Err(Error::ExpiredMetadata { .. })));
    }

    #[test]
    fn test_append_replaces_same_key() {
        let role = RoleName::targets();
        let (registry, keys) = setup(2, 2);
        let engine = SigningEngine::new(&registry);
        let bytes = b"body";
        let mut signatures = Vec::new();
        engine.append(&role, &keys[0], bytes, &mut signatures).unwrap();
        engine.append(&role, &keys[0], bytes, &mut signatures).unwrap();
        engine.append(&role, &keys[1], bytes, &mut signatures).unwrap();
        assert_eq!(signatures.len(), 2);
    }

    #[test]
    fn test_sign_all_uses_loaded_keys() {
        let role = RoleName::targets();
        let (mut registry, keys) = setup(2, 2);
        for key in keys {
            registry.load_signing_key(&role, key).unwrap();
        }
        let engine = SigningEngine::new(&registry);
        assert_eq!(engine.sign_all(&role, b"body").unwrap().len(), 2);
    }
}
