//! In-memory hierarchical document model
//!
//! The [`Universe`] owns the organization tree and the person registry.
//! Navigation is typed: callers obtain branch handles or root→target
//! ancestor chains through explicit tree walks, never through textual
//! query predicates.

use crate::ident::SafeIdent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Root container: one organization tree plus one registry of people.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub root: Branch,
    #[serde(default)]
    pub people: BTreeMap<String, Person>,
}

/// A node of the organization tree.
///
/// A branch exclusively owns its children, positions, roles and locally
/// declared function sets. Whitelist entries and role duties reference
/// function sets by identifier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    #[serde(default)]
    pub whitelist: Whitelist,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub funcsets: Vec<Funcset>,
    #[serde(default)]
    pub children: Vec<Branch>,
}

/// Branch-level filter restricting which inherited function sets propagate
/// from ancestors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Whitelist {
    #[serde(default)]
    pub propagate_parent: bool,
    #[serde(default)]
    pub entries: BTreeSet<String>,
}

/// An occupiable slot within a branch. `person` is a weak reference into
/// the universe's person registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
}

/// A named bundle of duties (function-set identifiers) attached to a branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub duties: BTreeSet<String>,
}

/// A named, mutable set of function identifiers. Declared inside one branch
/// but referenced by identifier from anywhere in the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funcset {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub functions: BTreeSet<String>,
}

/// A registered person. Secrets arrive pre-hashed; the store never hashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub secret: String,
    pub secret_changed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub readable_name: String,
    pub session_max: u32,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<i64>,
    /// Append-only credential change history.
    #[serde(default)]
    pub changed: Vec<ChangeStamp>,
}

/// One audit entry of the credential change history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStamp {
    pub by: String,
    pub at: i64,
}

impl Branch {
    /// A fresh branch: empty collections, whitelist closed to the parent.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            whitelist: Whitelist::default(),
            positions: Vec::new(),
            roles: Vec::new(),
            funcsets: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Depth-first walk over this branch and all descendants.
    pub fn subtree(&self) -> Vec<&Branch> {
        let mut out = Vec::new();
        self.collect_subtree(&mut out);
        out
    }

    fn collect_subtree<'a>(&'a self, out: &mut Vec<&'a Branch>) {
        out.push(self);
        for child in &self.children {
            child.collect_subtree(out);
        }
    }

    /// Whether `id` names this branch or any descendant.
    pub fn subtree_contains(&self, id: &SafeIdent) -> bool {
        self.subtree().iter().any(|b| b.id == *id.as_str())
    }

    /// Identifiers of all descendants, this branch excluded.
    pub fn descendant_ids(&self) -> Vec<String> {
        self.subtree()
            .into_iter()
            .skip(1)
            .map(|b| b.id.clone())
            .collect()
    }

    /// Person identifiers occupying positions in this branch or below.
    pub fn employed(&self) -> Vec<String> {
        self.subtree()
            .iter()
            .flat_map(|b| b.positions.iter())
            .filter_map(|p| p.person.clone())
            .collect()
    }

    /// Directly defined role, if any.
    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut Role> {
        self.roles.iter_mut().find(|r| r.name == name)
    }

    /// Identifiers of the function sets declared locally.
    pub fn local_funcset_ids(&self) -> BTreeSet<String> {
        self.funcsets.iter().map(|f| f.id.clone()).collect()
    }

    /// Count of (total, vacant) positions for a role name.
    pub fn position_counts(&self, role: &str) -> (usize, usize) {
        let total = self.positions.iter().filter(|p| p.role == role).count();
        let vacant = self
            .positions
            .iter()
            .filter(|p| p.role == role && p.person.is_none())
            .count();
        (total, vacant)
    }
}

impl Universe {
    /// A fresh universe with an empty root branch and no people.
    pub fn bootstrap(root_id: impl Into<String>) -> Self {
        Self {
            root: Branch::new(root_id),
            people: BTreeMap::new(),
        }
    }

    /// The root→target ancestor chain for a branch, target included.
    ///
    /// Returns `None` when no branch carries the identifier. The chain is
    /// what the resolution engine recurses over: its length equals the
    /// branch depth.
    pub fn chain_to(&self, id: &SafeIdent) -> Option<Vec<&Branch>> {
        fn descend<'a>(branch: &'a Branch, id: &str, chain: &mut Vec<&'a Branch>) -> bool {
            chain.push(branch);
            if branch.id == id {
                return true;
            }
            for child in &branch.children {
                if descend(child, id, chain) {
                    return true;
                }
            }
            chain.pop();
            false
        }

        let mut chain = Vec::new();
        descend(&self.root, id.as_str(), &mut chain).then_some(chain)
    }

    /// Immutable branch handle.
    pub fn branch(&self, id: &SafeIdent) -> Option<&Branch> {
        self.chain_to(id).and_then(|chain| chain.last().copied())
    }

    /// Mutable branch handle.
    pub fn branch_mut(&mut self, id: &SafeIdent) -> Option<&mut Branch> {
        fn descend<'a>(branch: &'a mut Branch, id: &str) -> Option<&'a mut Branch> {
            if branch.id == id {
                return Some(branch);
            }
            branch
                .children
                .iter_mut()
                .find_map(|child| descend(child, id))
        }
        descend(&mut self.root, id.as_str())
    }

    /// Parent of a branch; `None` for the root or an unknown identifier.
    pub fn parent_of(&self, id: &SafeIdent) -> Option<&Branch> {
        let chain = self.chain_to(id)?;
        (chain.len() >= 2).then(|| chain[chain.len() - 2])
    }

    /// Remove a non-root branch from its parent. Returns the removed
    /// subtree, `None` when the branch does not exist or is the root.
    pub fn remove_branch(&mut self, id: &SafeIdent) -> Option<Branch> {
        fn descend(branch: &mut Branch, id: &str) -> Option<Branch> {
            if let Some(pos) = branch.children.iter().position(|c| c.id == id) {
                return Some(branch.children.remove(pos));
            }
            branch
                .children
                .iter_mut()
                .find_map(|child| descend(child, id))
        }
        descend(&mut self.root, id.as_str())
    }

    /// All branch identifiers, document order.
    pub fn branch_ids(&self) -> Vec<String> {
        self.root.subtree().iter().map(|b| b.id.clone()).collect()
    }

    /// All function-set identifiers declared anywhere in the tree.
    pub fn all_funcset_ids(&self) -> BTreeSet<String> {
        self.root
            .subtree()
            .iter()
            .flat_map(|b| b.funcsets.iter())
            .map(|f| f.id.clone())
            .collect()
    }

    /// Locate a function set by tree-wide identifier.
    pub fn funcset(&self, id: &SafeIdent) -> Option<&Funcset> {
        self.root
            .subtree()
            .into_iter()
            .flat_map(|b| b.funcsets.iter())
            .find(|f| f.id == *id.as_str())
    }

    pub fn funcset_mut(&mut self, id: &SafeIdent) -> Option<&mut Funcset> {
        fn descend<'a>(branch: &'a mut Branch, id: &str) -> Option<&'a mut Funcset> {
            if let Some(fs) = branch.funcsets.iter_mut().find(|f| f.id == id) {
                return Some(fs);
            }
            branch
                .children
                .iter_mut()
                .find_map(|child| descend(child, id))
        }
        descend(&mut self.root, id.as_str())
    }

    /// Delete a function set from its declaring branch.
    pub fn remove_funcset(&mut self, id: &SafeIdent) -> bool {
        fn descend(branch: &mut Branch, id: &str) -> bool {
            if let Some(pos) = branch.funcsets.iter().position(|f| f.id == id) {
                branch.funcsets.remove(pos);
                return true;
            }
            branch.children.iter_mut().any(|child| descend(child, id))
        }
        descend(&mut self.root, id.as_str())
    }

    /// The branch employing a person, with the occupied position.
    pub fn employment(&self, user: &str) -> Option<(&Branch, &Position)> {
        self.root.subtree().into_iter().find_map(|b| {
            b.positions
                .iter()
                .find(|p| p.person.as_deref() == Some(user))
                .map(|p| (b, p))
        })
    }
}
