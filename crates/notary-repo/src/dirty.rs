//! Set of roles whose metadata changed since the last publish

use notary_types::RoleName;
use std::collections::BTreeSet;

/// Roles waiting to be re-signed
///
/// Created empty with a session, filled by mutating operations and cleared by a
/// successful publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    roles: BTreeSet<RoleName>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a role dirty, returning whether it was clean before
    pub fn mark(&mut self, role: &RoleName) -> bool {
        self.roles.insert(role.clone())
    }

    pub fn mark_all<'a>(&mut self, roles: impl IntoIterator<Item = &'a RoleName>) {
        for role in roles {
            self.mark(role);
        }
    }

    pub fn contains(&self, role: &RoleName) -> bool {
        self.roles.contains(role)
    }

    /// Forget a role, e.g. after its delegation was revoked
    pub fn unmark(&mut self, role: &RoleName) {
        self.roles.remove(role);
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleName> {
        self.roles.iter()
    }

    pub fn clear(&mut self) {
        self.roles.clear();
    }
}
