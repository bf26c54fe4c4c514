//! Signed metadata envelope and the root/targets documents

use crate::canonical::to_canonical_bytes;
use crate::encoding::Hex;
use crate::error::{Error, Result};
use crate::hash::Hashes;
use crate::key::{KeyId, PublicKey};
use crate::manifest::{BucketMetadata, SnapshotMetadata, TimestampMetadata};
use crate::role::RoleName;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata format version written into every document
pub const SPEC_VERSION: &str = "1.0.0";

/// Drop sub-second precision so an expiry survives a serialization round trip
pub fn normalize_expiry(expires: DateTime<Utc>) -> DateTime<Utc> {
    expires.with_nanosecond(0).unwrap_or(expires)
}

/// Serde helper writing expirations as RFC 3339 with second precision
pub(crate) mod expires_format {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(expires: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&expires.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// A single signature over a canonical metadata body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub keyid: KeyId,
    pub sig: Hex,
}

/// A metadata body together with the signatures over its canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub signatures: Vec<SignatureEntry>,
    pub signed: T,
}

impl<T: Serialize> Signed<T> {
    /// Wrap an unsigned body
    pub fn new(signed: T) -> Self {
        Self {
            signatures: Vec::new(),
            signed,
        }
    }

    /// The bytes signatures are computed over
    pub fn canonical_body(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(&self.signed)
    }

    /// The bytes written to storage and hashed by the snapshot
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(self)
    }
}

impl<T: for<'de> Deserialize<'de>> Signed<T> {
    /// Parse a stored document
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Key ids and threshold of a top-level role, as listed in root metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleKeys {
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
}

/// Root metadata: the keys and thresholds of the top-level roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootMetadata {
    pub spec_version: String,
    pub version: u64,
    #[serde(with = "expires_format")]
    pub expires: DateTime<Utc>,
    pub consistent_snapshot: bool,
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: BTreeMap<RoleName, RoleKeys>,
}

impl RootMetadata {
    pub fn new(expires: DateTime<Utc>, consistent_snapshot: bool) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            expires: normalize_expiry(expires),
            consistent_snapshot,
            keys: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }
}

/// A target file claimed by a targets role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: Hashes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// A delegation from a targets role to a child role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: RoleName,
    pub keyids: Vec<KeyId>,
    pub threshold: u32,
    pub paths: Vec<String>,
    #[serde(default)]
    pub terminating: bool,
}

/// The delegations block of a targets role, in delegation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<KeyId, PublicKey>,
    pub roles: Vec<DelegatedRole>,
}

/// Targets metadata, used by the top-level targets role and every delegated role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetsMetadata {
    pub spec_version: String,
    pub version: u64,
    #[serde(with = "expires_format")]
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
}

impl TargetsMetadata {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            expires: normalize_expiry(expires),
            targets: BTreeMap::new(),
            delegations: None,
        }
    }
}

/// Any metadata document, tagged by its `_type` field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type")]
pub enum RoleMetadata {
    #[serde(rename = "root")]
    Root(RootMetadata),
    #[serde(rename = "targets")]
    Targets(TargetsMetadata),
    #[serde(rename = "snapshot")]
    Snapshot(SnapshotMetadata),
    #[serde(rename = "timestamp")]
    Timestamp(TimestampMetadata),
    #[serde(rename = "snapshot-bucket")]
    Bucket(BucketMetadata),
}

impl RoleMetadata {
    pub fn type_name(&self) -> &'static str {
        match self {
            RoleMetadata::Root(_) => "root",
            RoleMetadata::Targets(_) => "targets",
            RoleMetadata::Snapshot(_) => "snapshot",
            RoleMetadata::Timestamp(_) => "timestamp",
            RoleMetadata::Bucket(_) => "snapshot-bucket",
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            RoleMetadata::Root(m) => m.version,
            RoleMetadata::Targets(m) => m.version,
            RoleMetadata::Snapshot(m) => m.version,
            RoleMetadata::Timestamp(m) => m.version,
            RoleMetadata::Bucket(m) => m.version,
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        match self {
            RoleMetadata::Root(m) => m.expires,
            RoleMetadata::Targets(m) => m.expires,
            RoleMetadata::Snapshot(m) => m.expires,
            RoleMetadata::Timestamp(m) => m.expires,
            RoleMetadata::Bucket(m) => m.expires,
        }
    }

    pub fn as_root(&self) -> Result<&RootMetadata> {
        match self {
            RoleMetadata::Root(m) => Ok(m),
            other => Err(other.unexpected("root")),
        }
    }

    pub fn as_targets(&self) -> Result<&TargetsMetadata> {
        match self {
            RoleMetadata::Targets(m) => Ok(m),
            other => Err(other.unexpected("targets")),
        }
    }

    pub fn as_snapshot(&self) -> Result<&SnapshotMetadata> {
        match self {
            RoleMetadata::Snapshot(m) => Ok(m),
            other => Err(other.unexpected("snapshot")),
        }
    }

    pub fn as_timestamp(&self) -> Result<&TimestampMetadata> {
        match self {
            RoleMetadata::Timestamp(m) => Ok(m),
            other => Err(other.unexpected("timestamp")),
        }
    }

    pub fn as_bucket(&self) -> Result<&BucketMetadata> {
        match self {
            RoleMetadata::Bucket(m) => Ok(m),
            other => Err(other.unexpected("snapshot-bucket")),
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        Error::UnexpectedType {
            expected,
            actual: self.type_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyScheme, KeyType};
    use chrono::TimeZone;

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2080, 10, 28, 12, 8, 0).unwrap()
    }

    #[test]
    fn test_type_tag_and_expiry_format() {
        let doc = RoleMetadata::Targets(TargetsMetadata::new(expiry()));
        let json = String::from_utf8(to_canonical_bytes(&doc).unwrap()).unwrap();
        assert!(json.starts_with(r#"{"_type":"targets","expires":"2080-10-28T12:08:00Z""#));
        assert!(!json.contains("delegations"));
    }

    #[test]
    fn test_signed_document_round_trip() {
        let mut root = RootMetadata::new(expiry(), false);
        let key = PublicKey::new(KeyType::Ed25519, KeyScheme::Ed25519, &[1u8; 32]);
        let key_id = key.key_id().unwrap();
        root.keys.insert(key_id.clone(), key);
        root.roles.insert(
            RoleName::root(),
            RoleKeys {
                keyids: vec![key_id.clone()],
                threshold: 1,
            },
        );
        let mut signed = Signed::new(RoleMetadata::Root(root));
        signed.signatures.push(SignatureEntry {
            keyid: key_id,
            sig: Hex::encode(b"sig"),
        });

        let bytes = signed.to_bytes().unwrap();
        let parsed: Signed<RoleMetadata> = Signed::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, signed);
        assert_eq!(parsed.signed.as_root().unwrap().roles.len(), 1);
        assert!(parsed.signed.as_targets().is_err());
    }

    #[test]
    fn test_normalize_expiry_drops_nanos() {
        let with_nanos = expiry() + chrono::Duration::nanoseconds(1234);
        assert_eq!(normalize_expiry(with_nanos), expiry());
    }
}
