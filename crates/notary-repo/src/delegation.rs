//! Path-scoped delegation tree rooted at the top-level targets role

use crate::error::{Error, Result};
use glob::Pattern;
use notary_types::{RoleKind, RoleName};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// One delegation from a parent to a child role
#[derive(Debug, Clone)]
pub struct DelegationEntry {
    name: RoleName,
    paths: Vec<String>,
    patterns: Vec<Pattern>,
    terminating: bool,
}

impl DelegationEntry {
    fn new(name: RoleName, paths: Vec<String>, terminating: bool) -> Result<Self> {
        let patterns = paths
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| Error::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name,
            paths,
            patterns,
            terminating,
        })
    }

    pub fn name(&self) -> &RoleName {
        &self.name
    }

    /// The path patterns as written
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn terminating(&self) -> bool {
        self.terminating
    }

    /// Whether any pattern of this delegation matches `path`
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Tree of targets-like roles
///
/// Children are kept in insertion order per parent, which decides which child
/// wins when patterns overlap. Each child has exactly one parent.
#[derive(Debug, Default)]
pub struct DelegationGraph {
    children: BTreeMap<RoleName, Vec<DelegationEntry>>,
    parents: HashMap<RoleName, RoleName>,
}

impl DelegationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `role` is the top-level targets role or reachable from it
    pub fn contains(&self, role: &RoleName) -> bool {
        role.kind() == RoleKind::Targets || self.parents.contains_key(role)
    }

    /// Delegate `paths` from `parent` to a new child role
    pub fn delegate(
        &mut self,
        parent: &RoleName,
        child: &RoleName,
        paths: Vec<String>,
        terminating: bool,
    ) -> Result<()> {
        if !self.contains(parent) {
            return Err(Error::UnknownRole(parent.to_string()));
        }
        if child == parent || self.ancestors(parent).any(|a| a == child) {
            return Err(Error::Cycle {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if child.kind() != RoleKind::Delegated {
            return Err(Error::Config(format!(
                "{} is reserved and cannot be delegated",
                child
            )));
        }
        if let Some(existing) = self.parents.get(child) {
            return Err(Error::DuplicateChild {
                parent: existing.clone(),
                child: child.clone(),
            });
        }

        let entry = DelegationEntry::new(child.clone(), paths, terminating)?;
        self.children.entry(parent.clone()).or_default().push(entry);
        self.parents.insert(child.clone(), parent.clone());
        tracing::debug!("Delegated {} to {}", parent, child);
        Ok(())
    }

    /// Remove a delegation together with everything delegated below it
    ///
    /// Returns the removed roles, the child first.
    pub fn revoke_delegation(
        &mut self,
        parent: &RoleName,
        child: &RoleName,
    ) -> Result<Vec<RoleName>> {
        let siblings = self
            .children
            .get_mut(parent)
            .ok_or_else(|| Error::UnknownRole(child.to_string()))?;
        let position = siblings
            .iter()
            .position(|e| e.name() == child)
            .ok_or_else(|| Error::UnknownRole(child.to_string()))?;
        siblings.remove(position);

        let removed = self.subtree(child);
        for role in &removed {
            self.children.remove(role);
            self.parents.remove(role);
        }
        tracing::debug!("Revoked delegation {} -> {}", parent, child);
        Ok(removed)
    }

    /// Delegations made by `parent`, in order
    pub fn children(&self, parent: &RoleName) -> &[DelegationEntry] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The entry delegating `role`, if it is delegated
    pub fn entry(&self, role: &RoleName) -> Option<&DelegationEntry> {
        let parent = self.parents.get(role)?;
        self.children(parent).iter().find(|e| e.name() == role)
    }

    pub(crate) fn parent_of(&self, role: &RoleName) -> Option<&RoleName> {
        self.parents.get(role)
    }

    /// Number of delegation edges between `role` and the top-level targets role
    pub fn depth(&self, role: &RoleName) -> usize {
        self.ancestors(role).count()
    }

    /// All delegated roles, parents before children
    pub fn delegated_roles(&self) -> Vec<RoleName> {
        let mut roles = self.subtree(&RoleName::targets());
        roles.retain(|r| r.kind() == RoleKind::Delegated);
        roles
    }

    /// Roles authorized for `path`, most specific first
    ///
    /// Starting at the top-level targets role, each step descends into the first
    /// child whose patterns match the path. The walk stops at a role that claims
    /// the path itself (according to `claims`) or that delegates it no further.
    /// The top-level targets role is always last.
    pub fn resolve(&self, path: &str, claims: impl Fn(&RoleName) -> bool) -> Vec<RoleName> {
        let mut chain = vec![RoleName::targets()];
        let mut current = RoleName::targets();
        loop {
            if claims(&current) {
                break;
            }
            match self.children(&current).iter().find(|e| e.matches(path)) {
                Some(entry) => {
                    current = entry.name().clone();
                    chain.push(current.clone());
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Whether `role` may list `path` as a target
    pub fn is_authorized(
        &self,
        role: &RoleName,
        path: &str,
        claims: impl Fn(&RoleName) -> bool,
    ) -> bool {
        self.resolve(path, claims).contains(role)
    }

    /// Find the role that lists `path`, searching the way a client would
    ///
    /// Depth-first in delegation order: a role's own targets first, then each
    /// matching child. A terminating delegation ends the search once it has been
    /// explored, even if it did not list the path.
    pub fn lookup(&self, path: &str, claims: impl Fn(&RoleName) -> bool) -> Option<RoleName> {
        match self.lookup_from(&RoleName::targets(), path, &claims) {
            Lookup::Found(role) => Some(role),
            Lookup::NotFound | Lookup::Terminated => None,
        }
    }

    fn lookup_from(
        &self,
        role: &RoleName,
        path: &str,
        claims: &impl Fn(&RoleName) -> bool,
    ) -> Lookup {
        if claims(role) {
            return Lookup::Found(role.clone());
        }
        for entry in self.children(role).iter().filter(|e| e.matches(path)) {
            match self.lookup_from(entry.name(), path, claims) {
                Lookup::Found(found) => return Lookup::Found(found),
                Lookup::Terminated => return Lookup::Terminated,
                Lookup::NotFound if entry.terminating() => return Lookup::Terminated,
                Lookup::NotFound => {}
            }
        }
        Lookup::NotFound
    }

    fn ancestors<'a>(&'a self, role: &RoleName) -> impl Iterator<Item = &'a RoleName> + 'a {
        let mut next = self.parents.get(role);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.parents.get(current);
            Some(current)
        })
    }

    /// `root` and all roles below it, breadth first
    fn subtree(&self, root: &RoleName) -> Vec<RoleName> {
        let mut roles = Vec::new();
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(role) = queue.pop_front() {
            for entry in self.children(&role) {
                queue.push_back(entry.name().clone());
            }
            roles.push(role);
        }
        roles
    }
}

enum Lookup {
    Found(RoleName),
    NotFound,
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleName {
        RoleName::new(name).unwrap()
    }

    fn nobody(_: &RoleName) -> bool {
        false
    }

    #[test]
    fn test_delegation_containment() {
        let mut graph = DelegationGraph::new();
        let wabbit = role("wabbit_networks");
        graph
            .delegate(
                &RoleName::targets(),
                &wabbit,
                vec!["wabbit_networks/*".to_string()],
                false,
            )
            .unwrap();

        assert!(graph.is_authorized(&wabbit, "wabbit_networks/file1.txt", nobody));
        assert!(!graph.is_authorized(&wabbit, "other/file.txt", nobody));
        assert_eq!(graph.resolve("other/file.txt", nobody), vec![RoleName::targets()]);
    }

    #[test]
    fn test_resolve_most_specific_first() {
        let mut graph = DelegationGraph::new();
        let repo = role("my_repo");
        let images = role("my_repo_images");
        graph
            .delegate(&RoleName::targets(), &repo, vec!["my_repo/*".to_string()], false)
            .unwrap();
        graph
            .delegate(&repo, &images, vec!["my_repo/images/*".to_string()], false)
            .unwrap();

        assert_eq!(
            graph.resolve("my_repo/images/a.png", nobody),
            vec![images.clone(), repo.clone(), RoleName::targets()]
        );
        assert_eq!(
            graph.resolve("my_repo/readme", nobody),
            vec![repo.clone(), RoleName::targets()]
        );

        // A parent that claims the path itself stops the walk
        let claimed = |r: &RoleName| r == &repo;
        assert_eq!(
            graph.resolve("my_repo/images/a.png", claimed),
            vec![repo, RoleName::targets()]
        );
        assert_eq!(graph.depth(&images), 2);
    }

    #[test]
    fn test_first_match_wins() {
        let mut graph = DelegationGraph::new();
        let first = role("first");
        let second = role("second");
        graph
            .delegate(&RoleName::targets(), &first, vec!["shared/*".to_string()], false)
            .unwrap();
        graph
            .delegate(&RoleName::targets(), &second, vec!["shared/*".to_string()], false)
            .unwrap();

        assert!(graph.is_authorized(&first, "shared/x", nobody));
        assert!(!graph.is_authorized(&second, "shared/x", nobody));
    }

    #[test]
    fn test_duplicate_child_rejected() {
        let mut graph = DelegationGraph::new();
        let child = role("child");
        graph
            .delegate(&RoleName::targets(), &child, vec!["*".to_string()], false)
            .unwrap();
        let result = graph.delegate(&RoleName::targets(), &child, vec!["*".to_string()], false);
        assert!(matches!(result, Err(Error::DuplicateChild { .. })));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = DelegationGraph::new();
        let a = role("a");
        let b = role("b");
        graph
            .delegate(&RoleName::targets(), &a, vec!["*".to_string()], false)
            .unwrap();
        graph.delegate(&a, &b, vec!["*".to_string()], false).unwrap();

        assert!(matches!(
            graph.delegate(&b, &a, vec!["*".to_string()], false),
            Err(Error::Cycle { .. })
        ));
        assert!(matches!(
            graph.delegate(&b, &b, vec!["*".to_string()], false),
            Err(Error::Cycle { .. })
        ));
    }

    #[test]
    fn test_revoke_removes_subtree() {
        let mut graph = DelegationGraph::new();
        let a = role("a");
        let b = role("b");
        graph
            .delegate(&RoleName::targets(), &a, vec!["*".to_string()], false)
            .unwrap();
        graph.delegate(&a, &b, vec!["*".to_string()], false).unwrap();

        let removed = graph.revoke_delegation(&RoleName::targets(), &a).unwrap();
        assert_eq!(removed, vec![a.clone(), b.clone()]);
        assert!(!graph.contains(&b));
        assert!(graph.children(&RoleName::targets()).is_empty());
        assert!(graph.revoke_delegation(&RoleName::targets(), &a).is_err());
    }

    #[test]
    fn test_lookup_respects_terminating() {
        let mut graph = DelegationGraph::new();
        let stop = role("stop");
        let later = role("later");
        graph
            .delegate(&RoleName::targets(), &stop, vec!["pkg/*".to_string()], true)
            .unwrap();
        graph
            .delegate(&RoleName::targets(), &later, vec!["pkg/*".to_string()], false)
            .unwrap();

        let claims = |r: &RoleName| r == &later;
        assert_eq!(graph.lookup("pkg/a", claims), None);

        let mut graph = DelegationGraph::new();
        graph
            .delegate(&RoleName::targets(), &stop, vec!["pkg/*".to_string()], false)
            .unwrap();
        graph
            .delegate(&RoleName::targets(), &later, vec!["pkg/*".to_string()], false)
            .unwrap();
        assert_eq!(graph.lookup("pkg/a", claims), Some(later));
    }

    #[test]
    fn test_invalid_pattern() {
        let mut graph = DelegationGraph::new();
        let result = graph.delegate(
            &RoleName::targets(),
            &role("bad"),
            vec!["[unclosed".to_string()],
            false,
        );
        assert!(matches!(result, Err(Error::InvalidPattern { .. })));
    }
}
