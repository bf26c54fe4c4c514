//! Keyring for managing multiple verification keys
//!
//! A keyring holds the public keys known to a repository and tallies how many
//! distinct authorized keys produced valid signatures over a body.

use crate::error::{Error, Result};
use crate::verification::VerificationKey;
use notary_types::{KeyId, PublicKey, SignatureEntry};
use std::collections::{BTreeSet, HashMap};

/// Outcome of checking a signature list against a set of authorized keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureTally {
    /// Authorized keys with at least one valid signature
    pub valid: BTreeSet<KeyId>,
    /// Authorized keys whose signature was malformed or did not match
    pub invalid: BTreeSet<KeyId>,
    /// Signatures from keys outside the authorized set
    pub unauthorized: usize,
}

impl SignatureTally {
    /// Number of distinct keys that count toward a threshold
    pub fn count(&self) -> usize {
        self.valid.len()
    }

    pub fn meets(&self, threshold: u32) -> bool {
        self.count() >= threshold as usize
    }
}

/// A keyring containing multiple verification keys
#[derive(Debug, Default, Clone)]
pub struct Keyring {
    /// Keys indexed by key ID
    keys: HashMap<KeyId, VerificationKey>,
}

impl Keyring {
    /// Create a new empty keyring
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    /// Add a key to the keyring
    pub fn add_key(&mut self, key_id: KeyId, key: VerificationKey) {
        self.keys.insert(key_id, key);
    }

    /// Add a metadata public key, returning its id
    pub fn add_public_key(&mut self, key: &PublicKey) -> Result<KeyId> {
        let key_id = key.key_id()?;
        self.keys
            .insert(key_id.clone(), VerificationKey::from_public_key(key)?);
        Ok(key_id)
    }

    /// Get a key by ID
    pub fn get_key(&self, key_id: &KeyId) -> Option<&VerificationKey> {
        self.keys.get(key_id)
    }

    /// Verify a signature using a specific key ID
    pub fn verify_with_key_id(&self, key_id: &KeyId, data: &[u8], signature: &[u8]) -> Result<()> {
        let key = self
            .get_key(key_id)
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))?;
        key.verify(data, signature)
    }

    /// Check every signature against `authorized` keys over `data`
    ///
    /// Duplicate signatures from one key count once. Signatures from keys outside
    /// `authorized` never count, even when they verify.
    pub fn tally(
        &self,
        authorized: &[KeyId],
        data: &[u8],
        signatures: &[SignatureEntry],
    ) -> SignatureTally {
        let mut tally = SignatureTally::default();
        for entry in signatures {
            if !authorized.contains(&entry.keyid) {
                tally.unauthorized += 1;
                continue;
            }
            let outcome = entry
                .sig
                .decode()
                .map_err(Error::from)
                .and_then(|sig| self.verify_with_key_id(&entry.keyid, data, &sig));
            match outcome {
                Ok(()) => {
                    tally.valid.insert(entry.keyid.clone());
                }
                Err(e) => {
                    tracing::warn!("Rejected signature from key {}: {}", entry.keyid, e);
                    tally.invalid.insert(entry.keyid.clone());
                }
            }
        }
        tally.invalid.retain(|key_id| !tally.valid.contains(key_id));
        tally
    }

    /// Get the number of keys in the keyring
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the keyring is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::{KeyPair, SigningKey};

    fn signing_key() -> SigningKey {
        SigningKey::new(KeyPair::generate_ed25519().unwrap()).unwrap()
    }

    #[test]
    fn test_keyring_add_and_get() {
        let mut keyring = Keyring::new();
        let key = signing_key();
        let key_id = keyring.add_public_key(key.public_key()).unwrap();
        assert_eq!(&key_id, key.key_id());
        assert_eq!(keyring.len(), 1);
        assert!(keyring.get_key(&key_id).is_some());
    }

    #[test]
    fn test_tally_counts_distinct_keys() {
        let mut keyring = Keyring::new();
        let a = signing_key();
        let b = signing_key();
        keyring.add_public_key(a.public_key()).unwrap();
        keyring.add_public_key(b.public_key()).unwrap();
        let authorized = vec![a.key_id().clone(), b.key_id().clone()];

        let data = b"body";
        let sig_a = a.sign(data).unwrap();
        let signatures = vec![sig_a.clone(), sig_a];
        let tally = keyring.tally(&authorized, data, &signatures);
        assert_eq!(tally.count(), 1);
        assert!(!tally.meets(2));

        let signatures = vec![a.sign(data).unwrap(), b.sign(data).unwrap()];
        assert!(keyring.tally(&authorized, data, &signatures).meets(2));
    }

    #[test]
    fn test_tally_ignores_unauthorized_keys() {
        let mut keyring = Keyring::new();
        let a = signing_key();
        let outsider = signing_key();
        keyring.add_public_key(a.public_key()).unwrap();
        keyring.add_public_key(outsider.public_key()).unwrap();

        let data = b"body";
        let tally = keyring.tally(
            &[a.key_id().clone()],
            data,
            &[outsider.sign(data).unwrap()],
        );
        assert_eq!(tally.count(), 0);
        assert_eq!(tally.unauthorized, 1);
    }

    #[test]
    fn test_tally_records_invalid_signatures() {
        let mut keyring = Keyring::new();
        let a = signing_key();
        keyring.add_public_key(a.public_key()).unwrap();

        let sig = a.sign(b"original").unwrap();
        let tally = keyring.tally(&[a.key_id().clone()], b"tampered", &[sig]);
        assert_eq!(tally.count(), 0);
        assert!(tally.invalid.contains(a.key_id()));
    }
}
