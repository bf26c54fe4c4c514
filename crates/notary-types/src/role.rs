//! Role names and kinds

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which kind of role a name refers to
///
/// The four top-level roles are fixed by name; every other name is a delegated
/// targets role reached through the delegation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Root,
    Targets,
    Snapshot,
    Timestamp,
    Delegated,
}

impl RoleKind {
    /// Whether this role can hold targets and delegate to children
    pub fn is_targets_like(&self) -> bool {
        matches!(self, RoleKind::Targets | RoleKind::Delegated)
    }

    /// Whether this role is one of the four roles listed in root metadata
    pub fn is_top_level(&self) -> bool {
        !matches!(self, RoleKind::Delegated)
    }
}

/// Name of a role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoleName(String);

impl RoleName {
    pub const ROOT: &'static str = "root";
    pub const TARGETS: &'static str = "targets";
    pub const SNAPSHOT: &'static str = "snapshot";
    pub const TIMESTAMP: &'static str = "timestamp";

    /// Create a role name, rejecting names that cannot be used as file names
    ///
    /// Names whose file could be mistaken for another document are rejected as
    /// well: `<version>.<role>` is the versioned copy of a role and
    /// `snapshot.*` holds snapshot buckets.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.starts_with('.')
            || name.contains("..")
            || name.starts_with("snapshot.")
            || has_version_prefix(&name)
        {
            return Err(Error::InvalidRoleName(name));
        }
        Ok(RoleName(name))
    }

    pub fn root() -> Self {
        RoleName(Self::ROOT.to_string())
    }

    pub fn targets() -> Self {
        RoleName(Self::TARGETS.to_string())
    }

    pub fn snapshot() -> Self {
        RoleName(Self::SNAPSHOT.to_string())
    }

    pub fn timestamp() -> Self {
        RoleName(Self::TIMESTAMP.to_string())
    }

    /// The four top-level roles in signing order
    pub fn top_level() -> [RoleName; 4] {
        [
            Self::root(),
            Self::targets(),
            Self::snapshot(),
            Self::timestamp(),
        ]
    }

    pub fn kind(&self) -> RoleKind {
        match self.0.as_str() {
            Self::ROOT => RoleKind::Root,
            Self::TARGETS => RoleKind::Targets,
            Self::SNAPSHOT => RoleKind::Snapshot,
            Self::TIMESTAMP => RoleKind::Timestamp,
            _ => RoleKind::Delegated,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the current document, e.g. `targets.json`
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// File name of a versioned copy when consistent snapshots are enabled
    pub fn versioned_file_name(&self, version: u64) -> String {
        format!("{}.{}.json", version, self.0)
    }

    /// Inverse of [`RoleName::file_name`]
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".json")?;
        RoleName::new(stem).ok()
    }
}

fn has_version_prefix(name: &str) -> bool {
    match name.split_once('.') {
        Some((prefix, _)) => !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RoleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for RoleName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for RoleName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl TryFrom<String> for RoleName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        RoleName::new(value)
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0
    }
}

impl TryFrom<&str> for RoleName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        RoleName::new(value)
    }
}
