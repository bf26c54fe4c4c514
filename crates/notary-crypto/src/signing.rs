//! Key generation and signing using aws-lc-rs

use crate::error::{Error, Result};
use aws_lc_rs::{
    rand::SystemRandom,
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair as AwsKeyPair, RsaKeyPair,
        ECDSA_P256_SHA256_ASN1_SIGNING, RSA_PSS_SHA256,
    },
};
use notary_types::{Hex, KeyId, KeyScheme, KeyType, PublicKey, SignatureEntry};

/// Raw signature bytes produced by a [`KeyPair`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex form, as written into a document's `signatures`
    pub fn to_hex(&self) -> Hex {
        Hex::encode(&self.0)
    }
}

/// A key pair for signing
pub enum KeyPair {
    /// ECDSA P-256 key pair
    EcdsaP256(EcdsaKeyPair),
    /// Ed25519 key pair
    Ed25519(Ed25519KeyPair),
    /// RSA key pair, signing with RSA-PSS SHA-256
    Rsa(RsaKeyPair),
}

impl KeyPair {
    /// Generate a PKCS#8 document for a new private key
    ///
    /// RSA keys cannot be generated here; import them with [`KeyPair::from_pkcs8`].
    pub fn generate_pkcs8(keytype: KeyType) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        match keytype {
            KeyType::Ed25519 => {
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| {
                    Error::KeyGeneration("failed to generate Ed25519 key".to_string())
                })?;
                Ok(pkcs8.as_ref().to_vec())
            }
            KeyType::EcdsaP256 => {
                let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
                    .map_err(|_| {
                        Error::KeyGeneration("failed to generate ECDSA P-256 key".to_string())
                    })?;
                Ok(pkcs8.as_ref().to_vec())
            }
            KeyType::Rsa => Err(Error::UnsupportedAlgorithm(
                "RSA key generation is not supported; import a PKCS#8 key".to_string(),
            )),
        }
    }

    /// Load a key pair from a PKCS#8 document
    pub fn from_pkcs8(keytype: KeyType, pkcs8: &[u8]) -> Result<Self> {
        match keytype {
            KeyType::Ed25519 => Ok(KeyPair::Ed25519(Ed25519KeyPair::from_pkcs8(pkcs8)?)),
            KeyType::EcdsaP256 => Ok(KeyPair::EcdsaP256(EcdsaKeyPair::from_pkcs8(
                &ECDSA_P256_SHA256_ASN1_SIGNING,
                pkcs8,
            )?)),
            KeyType::Rsa => Ok(KeyPair::Rsa(RsaKeyPair::from_pkcs8(pkcs8)?)),
        }
    }

    /// Generate a new Ed25519 key pair
    pub fn generate_ed25519() -> Result<Self> {
        Self::from_pkcs8(KeyType::Ed25519, &Self::generate_pkcs8(KeyType::Ed25519)?)
    }

    /// Generate a new ECDSA P-256 key pair
    pub fn generate_ecdsa_p256() -> Result<Self> {
        Self::from_pkcs8(KeyType::EcdsaP256, &Self::generate_pkcs8(KeyType::EcdsaP256)?)
    }

    pub fn keytype(&self) -> KeyType {
        match self {
            KeyPair::EcdsaP256(_) => KeyType::EcdsaP256,
            KeyPair::Ed25519(_) => KeyType::Ed25519,
            KeyPair::Rsa(_) => KeyType::Rsa,
        }
    }

    pub fn scheme(&self) -> KeyScheme {
        KeyScheme::default_for(self.keytype())
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> &[u8] {
        match self {
            KeyPair::EcdsaP256(kp) => kp.public_key().as_ref(),
            KeyPair::Ed25519(kp) => kp.public_key().as_ref(),
            KeyPair::Rsa(kp) => kp.public_key().as_ref(),
        }
    }

    /// The public key document for this pair
    pub fn public_key(&self) -> PublicKey {
        PublicKey::new(self.keytype(), self.scheme(), self.public_key_bytes())
    }

    /// Sign data with this key pair
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        let rng = SystemRandom::new();
        match self {
            KeyPair::EcdsaP256(kp) => {
                let sig = kp.sign(&rng, data)?;
                Ok(Signature(sig.as_ref().to_vec()))
            }
            KeyPair::Ed25519(kp) => {
                let sig = kp.sign(data);
                Ok(Signature(sig.as_ref().to_vec()))
            }
            KeyPair::Rsa(kp) => {
                let mut sig = vec![0u8; kp.public_modulus_len()];
                kp.sign(&RSA_PSS_SHA256, &rng, data, &mut sig)
                    .map_err(|_| Error::Signing("RSA-PSS signing failed".to_string()))?;
                Ok(Signature(sig))
            }
        }
    }
}

/// A loaded private signing capability together with its public identity
///
/// Handed to the repository by the caller after any secret has been supplied.
/// The private half is never serialized.
pub struct SigningKey {
    key_id: KeyId,
    public: PublicKey,
    pair: KeyPair,
}

impl SigningKey {
    pub fn new(pair: KeyPair) -> Result<Self> {
        let public = pair.public_key();
        let key_id = public.key_id()?;
        Ok(Self {
            key_id,
            public,
            pair,
        })
    }

    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign data and produce a metadata signature entry
    pub fn sign(&self, data: &[u8]) -> Result<SignatureEntry> {
        let sig = self.pair.sign(data)?;
        Ok(SignatureEntry {
            keyid: self.key_id.clone(),
            sig: sig.to_hex(),
        })
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("keytype", &self.public.keytype)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ed25519() {
        let kp = KeyPair::generate_ed25519().unwrap();
        assert_eq!(kp.public_key_bytes().len(), 32);
        assert_eq!(kp.public_key().keytype, KeyType::Ed25519);
    }

    #[test]
    fn test_sign_ecdsa_p256() {
        let kp = KeyPair::generate_ecdsa_p256().unwrap();
        let sig = kp.sign(b"test data to sign").unwrap();
        assert!(!sig.as_bytes().is_empty());
        assert_eq!(kp.public_key_bytes()[0], 0x04);
    }

    #[test]
    fn test_sign_ed25519() {
        let kp = KeyPair::generate_ed25519().unwrap();
        let sig = kp.sign(b"test data to sign").unwrap();
        assert_eq!(sig.as_bytes().len(), 64);
    }

    #[test]
    fn test_pkcs8_reload_keeps_identity() {
        let pkcs8 = KeyPair::generate_pkcs8(KeyType::Ed25519).unwrap();
        let pair = KeyPair::from_pkcs8(KeyType::Ed25519, &pkcs8).unwrap();
        let first = SigningKey::new(pair).unwrap();
        let second =
            SigningKey::new(KeyPair::from_pkcs8(KeyType::Ed25519, &pkcs8).unwrap()).unwrap();
        assert_eq!(first.key_id(), second.key_id());
    }

    #[test]
    fn test_rsa_generation_unsupported() {
        assert!(matches!(
            KeyPair::generate_pkcs8(KeyType::Rsa),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_signing_key_entry() {
        let key = SigningKey::new(KeyPair::generate_ed25519().unwrap()).unwrap();
        let entry = key.sign(b"body").unwrap();
        assert_eq!(&entry.keyid, key.key_id());
        assert_eq!(entry.sig.decode().unwrap().len(), 64);
    }
}
