//! Snapshot and timestamp construction
//!
//! A plain snapshot lists every role file directly. A tree snapshot assigns each
//! role to one of `fanout` buckets by hashing its name; each bucket is its own
//! signed document and the snapshot signs the Merkle root over the bucket
//! leaves. A publish that touches one role rewrites only that role's bucket.

use crate::config::SnapshotMode;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use notary_crypto::{sha256, ContentHasher};
use notary_merkle::{hash_leaf, inclusion_proof, root_hash, verify_inclusion_proof};
use notary_types::metadata::normalize_expiry;
use notary_types::{
    BucketMetadata, BucketRef, Hex, MetaFile, RoleName, Sha256Hash, SnapshotMetadata,
    SnapshotTree, TimestampMetadata, SPEC_VERSION,
};
use std::collections::BTreeMap;

/// A signed bucket as of the previous snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub version: u64,
    pub leaf: Sha256Hash,
    pub fanout: u32,
    pub expires: DateTime<Utc>,
}

/// Output of [`ManifestBuilder::build_snapshot`]
#[derive(Debug, Clone)]
pub struct BuiltSnapshot {
    pub snapshot: SnapshotMetadata,
    /// Buckets that need a new signed document; the rest are unchanged
    pub buckets: Vec<BucketMetadata>,
    /// State of every bucket, to carry into the next build
    pub bucket_states: BTreeMap<u32, BucketState>,
}

/// Bucket a role belongs to: the first four bytes of SHA-256 of its name,
/// big-endian, modulo the fan-out
pub fn bucket_for(role: &RoleName, fanout: u32) -> u32 {
    let digest = sha256(role.as_str().as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % fanout
}

/// Expiration for a timestamp: the policy window, capped one second before the
/// earliest expiration of any other role
pub fn timestamp_expiry(
    now: DateTime<Utc>,
    window: Duration,
    others: impl IntoIterator<Item = DateTime<Utc>>,
) -> DateTime<Utc> {
    let proposed = now + window;
    let capped = others
        .into_iter()
        .map(|expires| expires - Duration::seconds(1))
        .fold(proposed, |earliest, candidate| earliest.min(candidate));
    normalize_expiry(capped)
}

/// Builds snapshot, bucket and timestamp bodies
pub struct ManifestBuilder<'a> {
    hasher: &'a dyn ContentHasher,
    mode: SnapshotMode,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(hasher: &'a dyn ContentHasher, mode: SnapshotMode) -> Self {
        Self { hasher, mode }
    }

    /// Snapshot entry for a stored document
    pub fn meta_file(&self, version: u64, document: &[u8]) -> MetaFile {
        MetaFile {
            version,
            length: Some(document.len() as u64),
            hashes: Some(self.hasher.hash(document)),
        }
    }

    /// Build the snapshot over `roles` (role name to its file entry)
    ///
    /// In tree mode a bucket from `previous` is kept as is when its contents
    /// are unchanged and it outlives the snapshot. Any other bucket is rebuilt
    /// at the next version, expiring at `bucket_expires` or with the snapshot,
    /// whichever is later.
    pub fn build_snapshot(
        &self,
        roles: &BTreeMap<RoleName, MetaFile>,
        previous: &BTreeMap<u32, BucketState>,
        version: u64,
        expires: DateTime<Utc>,
        bucket_expires: DateTime<Utc>,
    ) -> Result<BuiltSnapshot> {
        let mut snapshot = SnapshotMetadata::new(expires);
        snapshot.version = version;

        let fanout = match self.mode {
            SnapshotMode::Plain => {
                snapshot.meta = roles
                    .iter()
                    .map(|(name, meta)| (name.file_name(), meta.clone()))
                    .collect();
                return Ok(BuiltSnapshot {
                    snapshot,
                    buckets: Vec::new(),
                    bucket_states: BTreeMap::new(),
                });
            }
            SnapshotMode::Tree { fanout } => fanout,
        };
        let bucket_expires = normalize_expiry(bucket_expires.max(snapshot.expires));

        let mut partitions: Vec<BTreeMap<String, MetaFile>> =
            vec![BTreeMap::new(); fanout as usize];
        for (name, meta) in roles {
            partitions[bucket_for(name, fanout) as usize].insert(name.file_name(), meta.clone());
        }

        let mut leaves = Vec::with_capacity(fanout as usize);
        let mut refs = Vec::with_capacity(fanout as usize);
        let mut buckets = Vec::new();
        let mut bucket_states = BTreeMap::new();
        for (bucket, meta) in (0..fanout).zip(partitions) {
            let leaf = hash_leaf(&BucketMetadata::leaf_bytes(bucket, &meta)?);
            let state = match previous.get(&bucket) {
                Some(prev)
                    if prev.leaf == leaf
                        && prev.fanout == fanout
                        && prev.expires > snapshot.expires =>
                {
                    *prev
                }
                prev => {
                    let state = BucketState {
                        version: prev.map_or(1, |p| p.version + 1),
                        leaf,
                        fanout,
                        expires: bucket_expires,
                    };
                    buckets.push(BucketMetadata {
                        spec_version: SPEC_VERSION.to_string(),
                        version: state.version,
                        expires: state.expires,
                        bucket,
                        fanout,
                        meta,
                    });
                    state
                }
            };
            leaves.push(leaf);
            refs.push(BucketRef {
                bucket,
                version: state.version,
                hash: leaf.to_hex_value(),
            });
            bucket_states.insert(bucket, state);
        }

        snapshot.tree = Some(SnapshotTree {
            fanout,
            root: root_hash(&leaves).to_hex_value(),
            buckets: refs,
        });
        tracing::debug!(
            "Built tree snapshot over {} roles, {} of {} buckets changed",
            roles.len(),
            buckets.len(),
            fanout
        );

        Ok(BuiltSnapshot {
            snapshot,
            buckets,
            bucket_states,
        })
    }

    /// Build the timestamp pointing at a stored snapshot document
    pub fn build_timestamp(
        &self,
        snapshot_version: u64,
        snapshot_document: &[u8],
        version: u64,
        expires: DateTime<Utc>,
    ) -> TimestampMetadata {
        let mut timestamp =
            TimestampMetadata::new(expires, self.meta_file(snapshot_version, snapshot_document));
        timestamp.version = version;
        timestamp
    }
}

/// Leaf hashes the snapshot lists, in bucket order
fn tree_leaves(tree: &SnapshotTree) -> Result<Vec<Sha256Hash>> {
    let snapshot = RoleName::snapshot().file_name();
    if tree.buckets.len() != tree.fanout as usize {
        return Err(Error::malformed(&snapshot, "tree does not reference every bucket"));
    }
    tree.buckets
        .iter()
        .zip(0..tree.fanout)
        .map(|(reference, bucket)| {
            if reference.bucket != bucket {
                return Err(Error::malformed(&snapshot, "bucket references are out of order"));
            }
            decode_hash(&snapshot, &reference.hash)
        })
        .collect()
}

/// Inclusion path from a bucket's leaf to the tree root
///
/// Derived from the leaf hashes the snapshot lists, for clients that only
/// keep the signed root.
pub fn bucket_proof(tree: &SnapshotTree, bucket: u32) -> Result<Vec<Sha256Hash>> {
    let leaves = tree_leaves(tree)?;
    Ok(inclusion_proof(&leaves, bucket as usize)?)
}

/// Check a bucket document against the tree its snapshot signed
pub fn verify_bucket(tree: &SnapshotTree, bucket: &BucketMetadata) -> Result<()> {
    let role = BucketMetadata::file_name(bucket.bucket);
    let reference = tree
        .buckets
        .iter()
        .find(|r| r.bucket == bucket.bucket)
        .ok_or_else(|| Error::malformed(&role, "bucket is not referenced by the snapshot"))?;
    if bucket.fanout != tree.fanout {
        return Err(Error::malformed(&role, "bucket fan-out differs from the snapshot"));
    }
    if bucket.version != reference.version {
        return Err(Error::malformed(
            &role,
            format!(
                "bucket version {} differs from snapshot reference {}",
                bucket.version, reference.version
            ),
        ));
    }

    let leaf = hash_leaf(&BucketMetadata::leaf_bytes(bucket.bucket, &bucket.meta)?);
    if leaf.to_hex_value() != reference.hash {
        return Err(Error::malformed(&role, "bucket contents do not match the snapshot"));
    }

    let root = decode_hash(&role, &tree.root)?;
    let proof = bucket_proof(tree, bucket.bucket)?;
    verify_inclusion_proof(&leaf, bucket.bucket as u64, tree.fanout as u64, &proof, &root)?;
    Ok(())
}

fn decode_hash(role: &str, hex: &Hex) -> Result<Sha256Hash> {
    Sha256Hash::from_hex(hex.as_str()).map_err(|e| Error::malformed(role, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notary_crypto::StandardHasher;

    fn roles(names: &[&str]) -> BTreeMap<RoleName, MetaFile> {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Plain);
        names
            .iter()
            .map(|n| {
                (
                    RoleName::new(*n).unwrap(),
                    builder.meta_file(1, n.as_bytes()),
                )
            })
            .collect()
    }

    #[test]
    fn test_bucket_assignment_is_stable() {
        let role = RoleName::new("my_repo").unwrap();
        let digest = sha256(b"my_repo");
        let expected = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 16;
        assert_eq!(bucket_for(&role, 16), expected);
        assert_eq!(bucket_for(&role, 1), 0);
    }

    #[test]
    fn test_plain_snapshot_lists_roles() {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Plain);
        let now = Utc::now();
        let built = builder
            .build_snapshot(&roles(&["root", "targets"]), &BTreeMap::new(), 3, now, now)
            .unwrap();
        assert_eq!(built.snapshot.version, 3);
        assert!(built.snapshot.meta.contains_key("root.json"));
        assert!(built.snapshot.meta.contains_key("targets.json"));
        assert!(built.buckets.is_empty());
    }

    #[test]
    fn test_tree_snapshot_is_deterministic() {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Tree { fanout: 8 });
        let input = roles(&["root", "targets", "a", "b", "c", "d", "e"]);
        let expires = Utc::now() + Duration::days(7);
        let bucket_expires = expires + Duration::days(30);

        let first = builder
            .build_snapshot(&input, &BTreeMap::new(), 1, expires, bucket_expires)
            .unwrap();
        let second = builder
            .build_snapshot(&input, &BTreeMap::new(), 1, expires, bucket_expires)
            .unwrap();

        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(first.buckets, second.buckets);
        assert!(first.snapshot.meta.is_empty());

        // Every bucket exists, including empty ones
        assert_eq!(first.buckets.len(), 8);
        let listed: usize = first.buckets.iter().map(|b| b.meta.len()).sum();
        assert_eq!(listed, input.len());

        let tree = first.snapshot.tree.as_ref().unwrap();
        for bucket in &first.buckets {
            verify_bucket(tree, bucket).unwrap();
        }
    }

    #[test]
    fn test_only_changed_buckets_rebuilt() {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Tree { fanout: 4 });
        let expires = Utc::now() + Duration::days(7);
        let bucket_expires = expires + Duration::days(30);
        let mut input = roles(&["root", "targets", "a", "b"]);
        let first = builder
            .build_snapshot(&input, &BTreeMap::new(), 1, expires, bucket_expires)
            .unwrap();

        let changed = RoleName::new("a").unwrap();
        input.insert(changed.clone(), builder.meta_file(2, b"a v2"));
        let later = expires + Duration::hours(1);
        let second = builder
            .build_snapshot(&input, &first.bucket_states, 2, later, later + Duration::days(30))
            .unwrap();

        let changed_bucket = bucket_for(&changed, 4);
        assert_eq!(second.buckets.len(), 1);
        assert_eq!(second.buckets[0].bucket, changed_bucket);
        for (bucket, state) in &second.bucket_states {
            let before = first.bucket_states[bucket];
            if *bucket == changed_bucket {
                assert_eq!(state.version, before.version + 1);
            } else {
                assert_eq!(*state, before);
            }
        }

        // Untouched buckets from the first build still check out against the
        // second root
        let tree = second.snapshot.tree.as_ref().unwrap();
        assert_ne!(tree.root, first.snapshot.tree.as_ref().unwrap().root);
        for bucket in first.buckets.iter().filter(|b| b.bucket != changed_bucket) {
            verify_bucket(tree, bucket).unwrap();
        }
        verify_bucket(tree, &second.buckets[0]).unwrap();
    }

    #[test]
    fn test_bucket_renewed_before_snapshot_outlives_it() {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Tree { fanout: 2 });
        let input = roles(&["root", "targets"]);
        let now = Utc::now();
        let first = builder
            .build_snapshot(&input, &BTreeMap::new(), 1, now + Duration::days(1), now)
            .unwrap();
        for state in first.bucket_states.values() {
            assert_eq!(state.expires, first.snapshot.expires);
        }

        let second = builder
            .build_snapshot(
                &input,
                &first.bucket_states,
                2,
                now + Duration::days(2),
                now + Duration::days(30),
            )
            .unwrap();
        assert_eq!(second.buckets.len(), 2);
        for state in second.bucket_states.values() {
            assert_eq!(state.version, 2);
            assert!(state.expires > second.snapshot.expires);
        }
    }

    #[test]
    fn test_tampered_bucket_rejected() {
        let hasher = StandardHasher::default();
        let builder = ManifestBuilder::new(&hasher, SnapshotMode::Tree { fanout: 2 });
        let now = Utc::now();
        let built = builder
            .build_snapshot(&roles(&["root", "targets"]), &BTreeMap::new(), 1, now, now)
            .unwrap();
        let tree = built.snapshot.tree.as_ref().unwrap();

        let mut bucket = built.buckets[0].clone();
        bucket.meta.insert(
            "evil.json".to_string(),
            MetaFile {
                version: 9,
                length: None,
                hashes: None,
            },
        );
        assert!(verify_bucket(tree, &bucket).is_err());

        // A root that does not commit to the listed leaves fails too
        let mut forged = tree.clone();
        forged.root = Sha256Hash::from_bytes([0u8; 32]).to_hex_value();
        assert!(verify_bucket(&forged, &built.buckets[0]).is_err());
    }

    #[test]
    fn test_timestamp_expiry_is_shortest() {
        let now = Utc::now();
        let soon = now + Duration::hours(5);
        let expires = timestamp_expiry(now, Duration::days(1), [now + Duration::days(7), soon]);
        assert!(expires < soon);
        assert!(expires > now);

        let expires = timestamp_expiry(now, Duration::days(1), [now + Duration::days(7)]);
        assert!(expires <= now + Duration::days(1));
    }
}
