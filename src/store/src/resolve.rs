//! Permission resolution engine
//!
//! Pure functions over a borrowed view of the documents. The caller holds
//! the read lock, so the recursion never observes a half-mutated tree.

use crate::catalogue::Catalogue;
use crate::tree::{Branch, Role, Universe};
use std::collections::BTreeSet;
use tracing::{debug, error};

/// Function sets effectively visible at the last branch of an ancestor
/// chain (root first, target last).
///
/// Local declarations are always visible. With `propagate_parent` the
/// parent's effective set passes through unfiltered; otherwise only the
/// intersection of the parent's set with the whitelist entries survives.
/// Terminates because the chain shrinks by one branch per step.
pub fn collect_branch_funcsets(chain: &[&Branch]) -> BTreeSet<String> {
    let Some((branch, ancestors)) = chain.split_last() else {
        return BTreeSet::new();
    };

    let local = branch.local_funcset_ids();
    if ancestors.is_empty() {
        debug!(branch = %branch.id, "no ancestors, effective funcsets are the local ones");
        return local;
    }

    let parent = collect_branch_funcsets(ancestors);
    let effective: BTreeSet<String> = if branch.whitelist.propagate_parent {
        local.union(&parent).cloned().collect()
    } else {
        let admitted: BTreeSet<String> = parent
            .intersection(&branch.whitelist.entries)
            .cloned()
            .collect();
        local.union(&admitted).cloned().collect()
    };

    debug!(branch = %branch.id, ?effective, "collected branch funcsets");
    effective
}

/// Role definition closest to the end of the chain, self before ancestors.
///
/// Deeper definitions shadow outer ones, mirroring lexical scoping.
/// Returns the definition together with the branch that carries it.
pub fn find_closest_role<'a>(chain: &[&'a Branch], name: &str) -> Option<(&'a Role, &'a Branch)> {
    chain
        .iter()
        .rev()
        .find_map(|branch| branch.role(name).map(|role| (role, *branch)))
}

/// Function sets a person may currently exercise.
///
/// The unemployed resolve to the empty set. A position whose role name has
/// no definition anywhere on the ancestor chain also resolves to the empty
/// set: access fails closed, and the misconfiguration is logged as an
/// anomaly rather than raised.
pub fn user_funcsets(universe: &Universe, user: &str) -> BTreeSet<String> {
    let Some((branch, position)) = universe.employment(user) else {
        debug!(user, "user occupies no position, no duties");
        return BTreeSet::new();
    };

    // The branch came out of the tree itself, so its id needs no
    // sanitization round-trip; rebuild the chain directly.
    let chain = chain_to_branch(universe, branch);
    let whitelist = collect_branch_funcsets(&chain);

    let Some((role, owner)) = find_closest_role(&chain, &position.role) else {
        error!(
            pos = %position.role,
            branch = %branch.id,
            "position used without any role definition, fix the stored document"
        );
        return BTreeSet::new();
    };

    let granted: BTreeSet<String> = whitelist.intersection(&role.duties).cloned().collect();
    debug!(
        user,
        role = %role.name,
        owner = %owner.id,
        ?granted,
        "resolved user funcsets"
    );
    granted
}

/// Function identifiers a person may currently invoke: the union of their
/// funcsets' members, restricted to functions the catalogue still knows.
pub fn user_functions(universe: &Universe, catalogue: &Catalogue, user: &str) -> BTreeSet<String> {
    let mut allowed = BTreeSet::new();
    for fs_id in user_funcsets(universe, user) {
        if let Some(fs) = find_funcset(universe, &fs_id) {
            allowed.extend(fs.functions.iter().cloned());
        }
    }
    let known = catalogue.known_ids();
    allowed.intersection(&known).cloned().collect()
}

fn chain_to_branch<'a>(universe: &'a Universe, target: &Branch) -> Vec<&'a Branch> {
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
    descend(&universe.root, &target.id, &mut chain);
    chain
}

fn find_funcset<'a>(universe: &'a Universe, id: &str) -> Option<&'a crate::tree::Funcset> {
    universe
        .root
        .subtree()
        .into_iter()
        .flat_map(|b| b.funcsets.iter())
        .find(|f| f.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Funcset, Position, Whitelist};

    fn funcset(id: &str, functions: &[&str]) -> Funcset {
        Funcset {
            id: id.into(),
            name: None,
            functions: functions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn role(name: &str, duties: &[&str]) -> Role {
        Role {
            name: name.into(),
            duties: duties.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// root defines fs1; dept whitelists {fs1} without propagation; the
    /// worker role at dept lists fs1 as a duty.
    fn two_level_org() -> Universe {
        let mut universe = Universe::bootstrap("root");
        universe.root.funcsets.push(funcset("fs1", &["f-a", "f-b"]));
        universe.root.whitelist.propagate_parent = true;

        let mut dept = Branch::new("dept");
        dept.whitelist = Whitelist {
            propagate_parent: false,
            entries: ["fs1".to_string()].into(),
        };
        dept.roles.push(role("worker", &["fs1"]));
        dept.positions.push(Position {
            role: "worker".into(),
            person: Some("u1".into()),
        });
        universe.root.children.push(dept);
        universe
    }

    fn chain<'a>(u: &'a Universe, id: &str) -> Vec<&'a Branch> {
        u.chain_to(&crate::ident::SafeIdent::new(id).unwrap()).unwrap()
    }

    #[test]
    fn whitelisted_inheritance() {
        let universe = two_level_org();
        let got = collect_branch_funcsets(&chain(&universe, "dept"));
        assert_eq!(got, ["fs1".to_string()].into());
    }

    #[test]
    fn idempotent_without_mutation() {
        let universe = two_level_org();
        let first = collect_branch_funcsets(&chain(&universe, "dept"));
        let second = collect_branch_funcsets(&chain(&universe, "dept"));
        assert_eq!(first, second);
    }

    #[test]
    fn closed_whitelist_filters_parent() {
        let mut universe = two_level_org();
        universe.root.funcsets.push(funcset("fs2", &[]));
        // fs2 is not whitelisted at dept
        let got = collect_branch_funcsets(&chain(&universe, "dept"));
        assert!(!got.contains("fs2"));
    }

    #[test]
    fn propagate_parent_is_a_superset_of_local() {
        let mut universe = two_level_org();
        universe.root.funcsets.push(funcset("fs2", &[]));
        if let Some(dept) = universe.root.children.first_mut() {
            dept.whitelist.propagate_parent = true;
            dept.funcsets.push(funcset("fs-local", &[]));
        }
        let got = collect_branch_funcsets(&chain(&universe, "dept"));
        for id in ["fs-local", "fs1", "fs2"] {
            assert!(got.contains(id), "{id} missing from {got:?}");
        }
    }

    #[test]
    fn deeper_role_definition_shadows_outer() {
        let mut universe = two_level_org();
        universe.root.roles.push(role("worker", &["fs-outer"]));
        let chain = chain(&universe, "dept");
        let (found, owner) = find_closest_role(&chain, "worker").unwrap();
        assert_eq!(owner.id, "dept");
        assert!(found.duties.contains("fs1"));
    }

    #[test]
    fn two_level_org_resolves_to_fs1_exactly() {
        let universe = two_level_org();
        assert_eq!(user_funcsets(&universe, "u1"), ["fs1".to_string()].into());
    }

    #[test]
    fn unemployed_user_has_no_duties() {
        let universe = two_level_org();
        assert!(user_funcsets(&universe, "nobody").is_empty());
    }

    #[test]
    fn missing_role_definition_fails_closed() {
        let mut universe = two_level_org();
        if let Some(dept) = universe.root.children.first_mut() {
            dept.roles.clear();
        }
        assert!(user_funcsets(&universe, "u1").is_empty());
    }

    #[test]
    fn stale_function_references_are_filtered() {
        let universe = two_level_org();
        let catalogue = Catalogue {
            functions: vec![crate::catalogue::FunctionDef {
                id: "f-a".into(),
                name: None,
                title: None,
                descr: None,
                method: None,
                call_url: None,
                content_type: None,
                tags: Default::default(),
            }],
        };
        // fs1 lists f-a and f-b, but only f-a is catalogued
        let got = user_functions(&universe, &catalogue, "u1");
        assert_eq!(got, ["f-a".to_string()].into());
    }
}
