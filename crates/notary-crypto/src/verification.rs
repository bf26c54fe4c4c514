//! Signature verification against metadata public keys

use crate::error::{Error, Result};
use aws_lc_rs::signature::{
    UnparsedPublicKey, VerificationAlgorithm, ECDSA_P256_SHA256_ASN1, ED25519,
    RSA_PSS_2048_8192_SHA256,
};
use notary_types::{KeyScheme, PublicKey};

/// A public key checked for its scheme and ready to verify signatures
#[derive(Debug, Clone)]
pub struct VerificationKey {
    bytes: Vec<u8>,
    scheme: KeyScheme,
}

impl VerificationKey {
    /// Build a verification key from a metadata public key
    ///
    /// Fails when the key material cannot belong to the declared scheme, so a
    /// malformed key is caught when it is added rather than at signing time.
    pub fn from_public_key(key: &PublicKey) -> Result<Self> {
        let bytes = key.public_bytes()?;
        let well_formed = match key.scheme {
            KeyScheme::Ed25519 => bytes.len() == 32,
            // Uncompressed SEC1 point
            KeyScheme::EcdsaP256Sha256 => bytes.len() == 65 && bytes[0] == 0x04,
            KeyScheme::RsaPssSha256 => bytes.len() >= 256,
        };
        if !well_formed {
            return Err(Error::InvalidKeyFormat(format!(
                "{} bytes of key material do not fit {:?}",
                bytes.len(),
                key.scheme
            )));
        }
        Ok(Self {
            bytes,
            scheme: key.scheme,
        })
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    /// Verify `signature` over `data`
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let algorithm: &'static dyn VerificationAlgorithm = match self.scheme {
            KeyScheme::Ed25519 => &ED25519,
            KeyScheme::EcdsaP256Sha256 => &ECDSA_P256_SHA256_ASN1,
            KeyScheme::RsaPssSha256 => &RSA_PSS_2048_8192_SHA256,
        };
        UnparsedPublicKey::new(algorithm, &self.bytes)
            .verify(data, signature)
            .map_err(|_| Error::Verification(format!("{:?} signature invalid", self.scheme)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::KeyPair;
    use notary_types::KeyType;

    #[test]
    fn test_verify_both_generated_schemes() {
        for kp in [
            KeyPair::generate_ed25519().unwrap(),
            KeyPair::generate_ecdsa_p256().unwrap(),
        ] {
            let sig = kp.sign(b"signed body").unwrap();
            let vk = VerificationKey::from_public_key(&kp.public_key()).unwrap();
            vk.verify(b"signed body", sig.as_bytes()).unwrap();
            assert!(vk.verify(b"signed bodY", sig.as_bytes()).is_err());
        }
    }

    #[test]
    fn test_verify_bad_signature() {
        let kp = KeyPair::generate_ed25519().unwrap();
        let vk = VerificationKey::from_public_key(&kp.public_key()).unwrap();
        assert!(vk.verify(b"test data", &[0u8; 64]).is_err());
    }

    #[test]
    fn test_malformed_key_rejected() {
        let short = PublicKey::new(KeyType::Ed25519, KeyScheme::Ed25519, &[7u8; 16]);
        assert!(matches!(
            VerificationKey::from_public_key(&short),
            Err(Error::InvalidKeyFormat(_))
        ));

        let compressed = PublicKey::new(KeyType::EcdsaP256, KeyScheme::EcdsaP256Sha256, &[2u8; 33]);
        assert!(VerificationKey::from_public_key(&compressed).is_err());
    }
}
