//! Repository configuration

use crate::error::{Error, Result};
use chrono::Duration;
use notary_types::RoleKind;

/// Default fan-out for tree snapshots
pub const DEFAULT_FANOUT: u32 = 16;

/// How long freshly signed metadata stays valid, per kind of role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub root: Duration,
    pub targets: Duration,
    pub delegated: Duration,
    pub snapshot: Duration,
    pub timestamp: Duration,
    /// Snapshot buckets, renewed early when they would expire before the
    /// snapshot that references them
    pub bucket: Duration,
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self {
            root: Duration::days(365),
            targets: Duration::days(90),
            delegated: Duration::days(90),
            snapshot: Duration::days(7),
            timestamp: Duration::days(1),
            bucket: Duration::days(30),
        }
    }
}

impl ExpirationPolicy {
    /// The validity window for a kind of role
    pub fn for_kind(&self, kind: RoleKind) -> Duration {
        match kind {
            RoleKind::Root => self.root,
            RoleKind::Targets => self.targets,
            RoleKind::Delegated => self.delegated,
            RoleKind::Snapshot => self.snapshot,
            RoleKind::Timestamp => self.timestamp,
        }
    }

    /// Check every window is positive and the timestamp window is the shortest
    pub fn validate(&self) -> Result<()> {
        let others = [
            ("root", self.root),
            ("targets", self.targets),
            ("delegated", self.delegated),
            ("snapshot", self.snapshot),
            ("bucket", self.bucket),
        ];
        if self.timestamp <= Duration::zero() {
            return Err(Error::Config(
                "timestamp expiration must be positive".to_string(),
            ));
        }
        for (name, window) in others {
            if window <= self.timestamp {
                return Err(Error::Config(format!(
                    "timestamp expiration must be shorter than {} expiration",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Shape of the snapshot manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// One snapshot document listing every role
    #[default]
    Plain,
    /// Roles spread over `fanout` signed buckets under a Merkle root
    Tree { fanout: u32 },
}

impl SnapshotMode {
    /// Tree mode with the default fan-out
    pub fn tree() -> Self {
        SnapshotMode::Tree {
            fanout: DEFAULT_FANOUT,
        }
    }
}

/// Configuration for a repository session
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// Validity windows applied when roles are re-signed
    pub expirations: ExpirationPolicy,
    /// Plain or tree snapshots
    pub snapshot_mode: SnapshotMode,
    /// Also write `<version>.<role>.json` copies of every role
    pub consistent_snapshot: bool,
}

impl RepositoryConfig {
    /// Set the expiration policy
    pub fn with_expirations(mut self, expirations: ExpirationPolicy) -> Self {
        self.expirations = expirations;
        self
    }

    /// Set the snapshot mode
    pub fn with_snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.snapshot_mode = mode;
        self
    }

    /// Enable consistent snapshots
    pub fn with_consistent_snapshot(mut self, enabled: bool) -> Self {
        self.consistent_snapshot = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.expirations.validate()?;
        if let SnapshotMode::Tree { fanout } = self.snapshot_mode {
            if fanout == 0 {
                return Err(Error::Config("tree fan-out must be at least 1".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = ExpirationPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.for_kind(RoleKind::Root), Duration::days(365));
        assert_eq!(policy.for_kind(RoleKind::Timestamp), Duration::days(1));
    }

    #[test]
    fn test_timestamp_must_be_shortest() {
        let policy = ExpirationPolicy {
            timestamp: Duration::days(7),
            ..Default::default()
        };
        assert!(matches!(policy.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_fanout_rejected() {
        let config = RepositoryConfig::default()
            .with_snapshot_mode(SnapshotMode::Tree { fanout: 0 });
        assert!(config.validate().is_err());
        assert!(RepositoryConfig::default()
            .with_snapshot_mode(SnapshotMode::tree())
            .validate()
            .is_ok());
    }
}
