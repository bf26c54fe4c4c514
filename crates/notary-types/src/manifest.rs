//! Snapshot, snapshot bucket and timestamp documents

use crate::canonical::to_canonical_bytes;
use crate::encoding::Hex;
use crate::error::Result;
use crate::hash::Hashes;
use crate::metadata::{expires_format, normalize_expiry, SPEC_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version, length and hashes of one metadata file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashes: Option<Hashes>,
}

/// Reference from the snapshot to one leaf batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRef {
    pub bucket: u32,
    pub version: u64,
    /// Merkle leaf hash of the bucket contents
    pub hash: Hex,
}

/// Tree form of the snapshot manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTree {
    pub fanout: u32,
    /// RFC 6962 root over the bucket leaf hashes
    pub root: Hex,
    pub buckets: Vec<BucketRef>,
}

/// Snapshot metadata
///
/// In plain form `meta` lists every role file. In tree form `meta` is empty and
/// `tree` references the bucket documents instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub spec_version: String,
    pub version: u64,
    #[serde(with = "expires_format")]
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree: Option<SnapshotTree>,
}

impl SnapshotMetadata {
    pub fn new(expires: DateTime<Utc>) -> Self {
        Self {
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            expires: normalize_expiry(expires),
            meta: BTreeMap::new(),
            tree: None,
        }
    }

    pub fn is_tree(&self) -> bool {
        self.tree.is_some()
    }
}

/// The part of a bucket that is hashed into the snapshot tree
#[derive(Serialize)]
struct BucketLeaf<'a> {
    bucket: u32,
    meta: &'a BTreeMap<String, MetaFile>,
}

/// One leaf batch of a tree snapshot
///
/// A bucket carries no audit path: the path to the root changes whenever any
/// other bucket does, while the bucket itself only needs re-signing when its
/// own contents change or it nears expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketMetadata {
    pub spec_version: String,
    pub version: u64,
    #[serde(with = "expires_format")]
    pub expires: DateTime<Utc>,
    pub bucket: u32,
    pub fanout: u32,
    pub meta: BTreeMap<String, MetaFile>,
}

impl BucketMetadata {
    /// File name of the bucket document
    pub fn file_name(bucket: u32) -> String {
        format!("snapshot.bucket-{}.json", bucket)
    }

    /// Parse a bucket id back out of a file name
    pub fn bucket_from_file_name(file_name: &str) -> Option<u32> {
        file_name
            .strip_prefix("snapshot.bucket-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }

    /// Canonical bytes of the Merkle leaf for a bucket's contents
    pub fn leaf_bytes(bucket: u32, meta: &BTreeMap<String, MetaFile>) -> Result<Vec<u8>> {
        to_canonical_bytes(&BucketLeaf { bucket, meta })
    }
}

/// Timestamp metadata: a short-lived pointer to the current snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampMetadata {
    pub spec_version: String,
    pub version: u64,
    #[serde(with = "expires_format")]
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
}

impl TimestampMetadata {
    /// Key of the snapshot entry in `meta`
    pub const SNAPSHOT_FILE: &'static str = "snapshot.json";

    pub fn new(expires: DateTime<Utc>, snapshot: MetaFile) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(Self::SNAPSHOT_FILE.to_string(), snapshot);
        Self {
            spec_version: SPEC_VERSION.to_string(),
            version: 1,
            expires: normalize_expiry(expires),
            meta,
        }
    }

    /// The snapshot entry this timestamp points at
    pub fn snapshot_meta(&self) -> Option<&MetaFile> {
        self.meta.get(Self::SNAPSHOT_FILE)
    }
}
