//! Hex fields of metadata documents
//!
//! Public keys, signatures, digests and tree hashes are all written as
//! lowercase hex. Documents with any other spelling are rejected while
//! parsing, so two equal values always serialize to the same bytes.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lowercase hex string as it appears in a document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hex(String);

impl Hex {
    pub fn encode(bytes: &[u8]) -> Self {
        Hex(hex::encode(bytes))
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        hex::decode(&self.0).map_err(|e| Error::InvalidEncoding(format!("invalid hex: {}", e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Hex {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let lowercase = value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !lowercase || value.len() % 2 != 0 {
            return Err(Error::InvalidEncoding(format!(
                "expected lowercase hex, got {:?}",
                value
            )));
        }
        Ok(Hex(value))
    }
}

impl From<Hex> for String {
    fn from(value: Hex) -> Self {
        value.0
    }
}

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A SHA-256 digest
///
/// Used for metadata digests and for the nodes of the snapshot tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha256Hash([u8; 32]);

impl Sha256Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Sha256Hash(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::InvalidEncoding(format!("invalid hex: {}", e)))?;
        let digest: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidEncoding(format!("SHA-256 digest must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Sha256Hash(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The digest in document form
    pub fn to_hex_value(&self) -> Hex {
        Hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Sha256Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_parse_rejects_uppercase_and_odd_length() {
        assert!(serde_json::from_str::<Hex>("\"ABCD\"").is_err());
        assert!(serde_json::from_str::<Hex>("\"abc\"").is_err());
        assert!(serde_json::from_str::<Hex>("\"zz\"").is_err());

        let parsed: Hex = serde_json::from_str("\"6162\"").unwrap();
        assert_eq!(parsed, Hex::encode(b"ab"));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"6162\"");
    }

    #[test]
    fn test_empty_digest_hex() {
        let empty = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        let hash: Sha256Hash = empty.parse().unwrap();
        assert_eq!(hash.to_hex(), empty);
        assert_eq!(hash.to_hex_value().as_str(), empty);
    }

    #[test]
    fn test_digest_length_checked() {
        assert!(Sha256Hash::from_hex("abcd").is_err());
        assert!(Sha256Hash::from_hex(&"00".repeat(33)).is_err());
    }
}
