//! Key material source
//!
//! The repository never reads key files itself. Callers hand it a [`KeySource`]
//! that resolves explicit [`KeyRef`] values to public keys, and to signing keys
//! once the caller has obtained the secret protecting them.

use crate::error::{Error, Result};
use crate::signing::{KeyPair, SigningKey};
use notary_types::{KeyType, PublicKey};
use std::collections::HashMap;

/// Caller-chosen reference to a key, such as a key file path or an HSM slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyRef(String);

impl KeyRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Secret unlocking a private key, e.g. a passphrase
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Resolves key references to key material
pub trait KeySource: Send + Sync {
    /// Load the public half of a key
    fn load_public_key(&self, key_ref: &KeyRef) -> Result<PublicKey>;

    /// Load a signing capability, unlocking it with `secret`
    fn load_signing_key(&self, key_ref: &KeyRef, secret: &Secret) -> Result<SigningKey>;
}

struct StoredKey {
    keytype: KeyType,
    pkcs8: Vec<u8>,
    secret: Secret,
    public: PublicKey,
}

/// Process-local key source holding PKCS#8 documents
///
/// Useful for tests and for embedding the engine where keys come from elsewhere.
#[derive(Default)]
pub struct InMemoryKeySource {
    keys: HashMap<KeyRef, StoredKey>,
}

impl InMemoryKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new key under `key_ref`, returning its public key
    pub fn generate(
        &mut self,
        key_ref: impl Into<KeyRef>,
        keytype: KeyType,
        secret: Secret,
    ) -> Result<PublicKey> {
        let pkcs8 = KeyPair::generate_pkcs8(keytype)?;
        self.insert_pkcs8(key_ref, keytype, pkcs8, secret)
    }

    /// Register an existing PKCS#8 private key
    pub fn insert_pkcs8(
        &mut self,
        key_ref: impl Into<KeyRef>,
        keytype: KeyType,
        pkcs8: Vec<u8>,
        secret: Secret,
    ) -> Result<PublicKey> {
        let public = KeyPair::from_pkcs8(keytype, &pkcs8)?.public_key();
        self.keys.insert(
            key_ref.into(),
            StoredKey {
                keytype,
                pkcs8,
                secret,
                public: public.clone(),
            },
        );
        Ok(public)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn stored(&self, key_ref: &KeyRef) -> Result<&StoredKey> {
        self.keys
            .get(key_ref)
            .ok_or_else(|| Error::KeyNotFound(key_ref.to_string()))
    }
}

impl KeySource for InMemoryKeySource {
    fn load_public_key(&self, key_ref: &KeyRef) -> Result<PublicKey> {
        Ok(self.stored(key_ref)?.public.clone())
    }

    fn load_signing_key(&self, key_ref: &KeyRef, secret: &Secret) -> Result<SigningKey> {
        let stored = self.stored(key_ref)?;
        if &stored.secret != secret {
            return Err(Error::InvalidSecret(key_ref.to_string()));
        }
        SigningKey::new(KeyPair::from_pkcs8(stored.keytype, &stored.pkcs8)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_load() {
        let mut source = InMemoryKeySource::new();
        let public = source
            .generate("keystore/targets_key", KeyType::Ed25519, Secret::new("password"))
            .unwrap();

        let key_ref = KeyRef::new("keystore/targets_key");
        assert_eq!(source.load_public_key(&key_ref).unwrap(), public);

        let signing = source
            .load_signing_key(&key_ref, &Secret::new("password"))
            .unwrap();
        assert_eq!(signing.key_id(), &public.key_id().unwrap());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut source = InMemoryKeySource::new();
        source
            .generate("k", KeyType::EcdsaP256, Secret::new("right"))
            .unwrap();
        let result = source.load_signing_key(&KeyRef::new("k"), &Secret::new("wrong"));
        assert!(matches!(result, Err(Error::InvalidSecret(_))));
    }

    #[test]
    fn test_unknown_ref() {
        let source = InMemoryKeySource::new();
        assert!(matches!(
            source.load_public_key(&KeyRef::new("missing")),
            Err(Error::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("password")), "Secret(..)");
    }
}
