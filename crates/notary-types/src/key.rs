//! Public key documents and key identifiers

use crate::canonical::to_canonical_bytes;
use crate::encoding::Hex;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a key: hex SHA-256 of the canonical public key document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Wrap an existing identifier
    ///
    /// Note: this does not check that the id matches any key.
    pub fn new(id: impl Into<String>) -> Self {
        KeyId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaP256,
    #[serde(rename = "rsa")]
    Rsa,
}

/// Signature scheme a key signs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyScheme {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa-sha2-nistp256")]
    EcdsaP256Sha256,
    #[serde(rename = "rsassa-pss-sha256")]
    RsaPssSha256,
}

impl KeyScheme {
    /// The scheme a key type signs with by default
    pub fn default_for(keytype: KeyType) -> Self {
        match keytype {
            KeyType::Ed25519 => KeyScheme::Ed25519,
            KeyType::EcdsaP256 => KeyScheme::EcdsaP256Sha256,
            KeyType::Rsa => KeyScheme::RsaPssSha256,
        }
    }
}

/// Public key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// Raw public key bytes, hex encoded
    pub public: Hex,
}

/// A public key as it appears in root and delegation metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub keytype: KeyType,
    pub scheme: KeyScheme,
    pub keyval: KeyVal,
}

impl PublicKey {
    /// Create a public key document from raw key bytes
    pub fn new(keytype: KeyType, scheme: KeyScheme, public: &[u8]) -> Self {
        Self {
            keytype,
            scheme,
            keyval: KeyVal {
                public: Hex::encode(public),
            },
        }
    }

    /// Parse a public key document, e.g. the contents of a `.pub` key file
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compute the key id of this key
    pub fn key_id(&self) -> Result<KeyId> {
        let bytes = to_canonical_bytes(self)?;
        Ok(KeyId(hex::encode(Sha256::digest(&bytes))))
    }

    /// Decode the raw public key bytes
    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        let bytes = self.keyval.public.decode()?;
        if bytes.is_empty() {
            return Err(Error::MissingField("keyval.public".to_string()));
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_is_stable() {
        let key = PublicKey::new(KeyType::Ed25519, KeyScheme::Ed25519, &[7u8; 32]);
        let id = key.key_id().unwrap();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(id, key.clone().key_id().unwrap());

        let other = PublicKey::new(KeyType::Ed25519, KeyScheme::Ed25519, &[8u8; 32]);
        assert_ne!(id, other.key_id().unwrap());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"keytype":"ed25519","scheme":"ed25519","keyval":{"public":"0a0b"}}"#;
        let key = PublicKey::from_json(json).unwrap();
        assert_eq!(key.keytype, KeyType::Ed25519);
        assert_eq!(key.public_bytes().unwrap(), vec![0x0a, 0x0b]);
    }

    #[test]
    fn test_default_scheme() {
        assert_eq!(KeyScheme::default_for(KeyType::Rsa), KeyScheme::RsaPssSha256);
    }
}
