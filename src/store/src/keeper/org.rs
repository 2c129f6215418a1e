//! Tree administration: branches, whitelists, roles and function sets.

use super::{require_branch, Keeper};
use crate::error::{Fault, Reason, Result};
use crate::ident::SafeIdent;
use crate::resolve;
use crate::tree::{Branch, Funcset, Role};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::info;

/// A branch whitelist as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct WhitelistView {
    pub funcsets: Vec<String>,
    pub propagate_parent_flag: bool,
}

/// A role name paired with the branch that defines it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RoleInBranch {
    pub role: String,
    pub branch: String,
}

impl Keeper {
    /// All branch identifiers, document order.
    pub fn list_branches(&self) -> Vec<String> {
        self.docs().universe.read().branch_ids()
    }

    /// Sorted descendants of a branch, the branch excluded. `None` walks
    /// from the root (root included).
    pub fn branch_subtree(&self, branch: Option<&str>) -> Result<Vec<String>> {
        let universe = self.docs().universe.read();
        let mut ids = match SafeIdent::opt(branch)? {
            Some(id) => require_branch(&universe, &id)?.descendant_ids(),
            None => universe.branch_ids(),
        };
        ids.sort();
        Ok(ids)
    }

    /// Attach a fresh branch under an existing one.
    ///
    /// The new branch starts with empty collections and a whitelist
    /// closed to the parent.
    pub fn add_subbranch(&self, branch: &str, sub: &str) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let sub = SafeIdent::new(sub)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            if universe.branch(&sub).is_some() {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("branch '{sub}' already exists in the tree"),
                )
                .with("bad_value", sub.as_str())
                .into());
            }
            info!(parent = %branch, sub = %sub, "attaching subbranch");
            let parent = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            parent.children.push(Branch::new(sub.as_str()));
        }
        self.mark_dirty()
    }

    /// Remove a branch and its whole subtree.
    ///
    /// The root is untouchable and a subtree still employing anyone must
    /// be emptied first; the fault lists who to fire.
    pub fn delete_branch(&self, branch: &str) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        {
            let mut universe = self.docs().universe.write();
            let node = require_branch(&universe, &branch)?;
            if universe.root.id == *branch.as_str() {
                return Err(Fault::new(
                    Reason::NotAllowed,
                    format!("deletion of the root branch '{branch}' is not allowed"),
                )
                .with("bad_value", branch.as_str())
                .into());
            }
            let employed = node.employed();
            if !employed.is_empty() {
                return Err(Fault::new(
                    Reason::UserEmployed,
                    format!("branch '{branch}' still has employees"),
                )
                .with("fire_them", Value::from(employed))
                .into());
            }
            info!(branch = %branch, "deleting branch subtree");
            universe.remove_branch(&branch);
        }
        self.mark_dirty()
    }

    pub fn whitelist(&self, branch: &str) -> Result<WhitelistView> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let node = require_branch(&universe, &branch)?;
        Ok(WhitelistView {
            funcsets: node.whitelist.entries.iter().cloned().collect(),
            propagate_parent_flag: node.whitelist.propagate_parent,
        })
    }

    /// Replace a branch whitelist wholesale.
    pub fn set_whitelist(
        &self,
        branch: &str,
        propagate_parent: bool,
        entries: &[String],
    ) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            node.whitelist.propagate_parent = propagate_parent;
            node.whitelist.entries = entries.iter().cloned().collect();
        }
        self.mark_dirty()
    }

    /// Funcsets effectively visible at a branch after whitelist
    /// propagation.
    pub fn branch_enabled_funcsets(&self, branch: &str) -> Result<Vec<String>> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let chain = universe.chain_to(&branch).ok_or_else(|| {
            Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown"))
                .with("bad_value", branch.as_str())
        })?;
        Ok(resolve::collect_branch_funcsets(&chain).into_iter().collect())
    }

    /// Role names of a branch; `with_inherited` unions the ancestors in.
    pub fn branch_roles(&self, branch: &str, with_inherited: bool) -> Result<Vec<String>> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let chain = universe.chain_to(&branch).ok_or_else(|| {
            Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown"))
                .with("bad_value", branch.as_str())
        })?;
        let names: BTreeSet<String> = if with_inherited {
            chain
                .iter()
                .flat_map(|b| b.roles.iter())
                .map(|r| r.name.clone())
                .collect()
        } else {
            chain
                .last()
                .map(|b| b.roles.iter().map(|r| r.name.clone()).collect())
                .unwrap_or_default()
        };
        Ok(names.into_iter().collect())
    }

    /// Inherited role names, each paired with the branch whose definition
    /// wins at this depth.
    pub fn branch_roles_with_origin(&self, branch: &str) -> Result<Vec<RoleInBranch>> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let chain = universe.chain_to(&branch).ok_or_else(|| {
            Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown"))
                .with("bad_value", branch.as_str())
        })?;
        let names: BTreeSet<String> = chain
            .iter()
            .flat_map(|b| b.roles.iter())
            .map(|r| r.name.clone())
            .collect();
        Ok(names
            .into_iter()
            .filter_map(|name| {
                resolve::find_closest_role(&chain, &name).map(|(_, owner)| RoleInBranch {
                    role: name,
                    branch: owner.id.clone(),
                })
            })
            .collect())
    }

    pub fn create_role(&self, branch: &str, role: &str, duties: &[String]) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            if node.role(role.as_str()).is_some() {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("role '{role}' is already defined in branch '{branch}'"),
                )
                .with("bad_value", role.as_str())
                .into());
            }
            node.roles.push(Role {
                name: role.as_str().to_string(),
                duties: duties.iter().cloned().collect(),
            });
        }
        self.mark_dirty()
    }

    /// Remove a role defined directly in this branch. Inherited
    /// definitions are out of reach here.
    pub fn delete_role(&self, branch: &str, role: &str) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            let Some(idx) = node.roles.iter().position(|r| r.name == *role.as_str()) else {
                return Err(Fault::new(
                    Reason::RoleUnknown,
                    format!("role '{role}' has no direct definition in branch '{branch}'"),
                )
                .with("bad_value", role.as_str())
                .into());
            };
            node.roles.remove(idx);
        }
        self.mark_dirty()
    }

    pub fn role_funcsets(&self, branch: &str, role: &str) -> Result<Vec<String>> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        let universe = self.docs().universe.read();
        let node = require_branch(&universe, &branch)?;
        let role = node.role(role.as_str()).ok_or_else(|| {
            Fault::new(
                Reason::RoleUnknown,
                format!("role '{role}' is not defined in branch '{branch}'"),
            )
        })?;
        Ok(role.duties.iter().cloned().collect())
    }

    pub fn role_funcset_add(&self, branch: &str, role: &str, funcset: &str) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        let funcset = SafeIdent::new(funcset)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            let entry = node.role_mut(role.as_str()).ok_or_else(|| {
                Fault::new(
                    Reason::RoleUnknown,
                    format!("role '{role}' is not defined in branch '{branch}'"),
                )
            })?;
            if !entry.duties.insert(funcset.as_str().to_string()) {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("funcset '{funcset}' is already in role '{role}' of '{branch}'"),
                )
                .into());
            }
        }
        self.mark_dirty()
    }

    pub fn role_funcset_remove(&self, branch: &str, role: &str, funcset: &str) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        let funcset = SafeIdent::new(funcset)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            let entry = node.role_mut(role.as_str()).ok_or_else(|| {
                Fault::new(
                    Reason::RoleUnknown,
                    format!("role '{role}' is not defined in branch '{branch}'"),
                )
            })?;
            if !entry.duties.remove(funcset.as_str()) {
                return Err(Fault::new(
                    Reason::NotInSet,
                    format!("funcset '{funcset}' is not in role '{role}' of '{branch}'"),
                )
                .into());
            }
        }
        self.mark_dirty()
    }

    /// All funcset identifiers declared anywhere in the tree.
    pub fn list_funcsets(&self) -> Vec<String> {
        self.docs()
            .universe
            .read()
            .all_funcset_ids()
            .into_iter()
            .collect()
    }

    /// Declare a funcset inside a branch. Identifiers are unique across
    /// the whole tree, not just the declaring branch.
    pub fn funcset_create(&self, branch: &str, funcset: &str, name: Option<&str>) -> Result<()> {
        let branch = SafeIdent::new(branch)?;
        let funcset = SafeIdent::new(funcset)?;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            if universe.funcset(&funcset).is_some() {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("funcset '{funcset}' is already defined somewhere"),
                )
                .with("bad_value", funcset.as_str())
                .into());
            }
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            node.funcsets.push(Funcset {
                id: funcset.as_str().to_string(),
                name: name.filter(|n| !n.is_empty()).map(str::to_string),
                functions: BTreeSet::new(),
            });
        }
        self.mark_dirty()
    }

    pub fn funcset_delete(&self, funcset: &str) -> Result<()> {
        let funcset = SafeIdent::new(funcset)?;
        {
            let mut universe = self.docs().universe.write();
            if !universe.remove_funcset(&funcset) {
                return Err(Fault::new(
                    Reason::FuncsetUnknown,
                    format!("funcset '{funcset}' is unknown"),
                )
                .with("bad_value", funcset.as_str())
                .into());
            }
        }
        self.mark_dirty()
    }

    pub fn funcset_details(&self, funcset: &str) -> Result<Funcset> {
        let funcset = SafeIdent::new(funcset)?;
        let universe = self.docs().universe.read();
        universe.funcset(&funcset).cloned().ok_or_else(|| {
            Fault::new(
                Reason::FuncsetUnknown,
                format!("funcset '{funcset}' is unknown"),
            )
            .with("bad_value", funcset.as_str())
            .into()
        })
    }

    pub fn funcset_func_add(&self, funcset: &str, func: &str) -> Result<()> {
        let funcset = SafeIdent::new(funcset)?;
        let func = SafeIdent::new(func)?;
        {
            let mut universe = self.docs().universe.write();
            let entry = universe.funcset_mut(&funcset).ok_or_else(|| {
                Fault::new(
                    Reason::FuncsetUnknown,
                    format!("funcset '{funcset}' is unknown"),
                )
                .with("bad_value", funcset.as_str())
            })?;
            if !entry.functions.insert(func.as_str().to_string()) {
                return Err(Fault::new(
                    Reason::AlreadyExists,
                    format!("function '{func}' is already in '{funcset}'"),
                )
                .with("bad_value", func.as_str())
                .into());
            }
        }
        self.mark_dirty()
    }

    pub fn funcset_func_remove(&self, funcset: &str, func: &str) -> Result<()> {
        let funcset = SafeIdent::new(funcset)?;
        let func = SafeIdent::new(func)?;
        {
            let mut universe = self.docs().universe.write();
            let entry = universe.funcset_mut(&funcset).ok_or_else(|| {
                Fault::new(
                    Reason::FuncsetUnknown,
                    format!("funcset '{funcset}' is unknown"),
                )
                .with("bad_value", funcset.as_str())
            })?;
            if !entry.functions.remove(func.as_str()) {
                return Err(Fault::new(
                    Reason::NotInSet,
                    format!("function '{func}' is not in '{funcset}'"),
                )
                .with("bad_value", func.as_str())
                .into());
            }
        }
        self.mark_dirty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::testutil::seeded_keeper;

    fn reason_of(err: crate::error::StoreError) -> Reason {
        err.fault().unwrap().reason
    }

    #[test]
    fn subbranch_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.add_subbranch("dept", "team").unwrap();
        assert_eq!(keeper.branch_subtree(Some("dept")).unwrap(), vec!["team"]);

        let err = keeper.add_subbranch("root", "team").unwrap_err();
        assert_eq!(reason_of(err), Reason::AlreadyExists);

        keeper.delete_branch("team").unwrap();
        assert!(keeper.branch_subtree(Some("dept")).unwrap().is_empty());
    }

    #[test]
    fn root_branch_is_undeletable() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        let err = keeper.delete_branch("root").unwrap_err();
        assert_eq!(reason_of(err), Reason::NotAllowed);
        assert!(keeper.list_branches().contains(&"root".to_string()));
    }

    #[test]
    fn staffed_branch_is_undeletable() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        let err = keeper.delete_branch("dept").unwrap_err();
        let fault = err.fault().unwrap().clone();
        assert_eq!(fault.reason, Reason::UserEmployed);
        assert_eq!(fault.context["fire_them"], serde_json::json!(["boss"]));
    }

    #[test]
    fn whitelist_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .set_whitelist("dept", true, &["fs1".into(), "fs9".into()])
            .unwrap();
        let view = keeper.whitelist("dept").unwrap();
        assert!(view.propagate_parent_flag);
        assert_eq!(view.funcsets, vec!["fs1", "fs9"]);
    }

    #[test]
    fn enabled_funcsets_follow_the_whitelist() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        assert_eq!(keeper.branch_enabled_funcsets("dept").unwrap(), vec!["fs1"]);
        keeper.set_whitelist("dept", false, &[]).unwrap();
        assert!(keeper.branch_enabled_funcsets("dept").unwrap().is_empty());
    }

    #[test]
    fn role_lifecycle_and_origin() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.create_role("root", "auditor", &["fs1".into()]).unwrap();

        assert_eq!(
            keeper.branch_roles("dept", true).unwrap(),
            vec!["auditor", "worker"]
        );
        assert_eq!(keeper.branch_roles("dept", false).unwrap(), vec!["worker"]);

        let origins = keeper.branch_roles_with_origin("dept").unwrap();
        assert!(origins.contains(&RoleInBranch {
            role: "auditor".into(),
            branch: "root".into(),
        }));
        assert!(origins.contains(&RoleInBranch {
            role: "worker".into(),
            branch: "dept".into(),
        }));

        // inherited definitions cannot be deleted from below
        let err = keeper.delete_role("dept", "auditor").unwrap_err();
        assert_eq!(reason_of(err), Reason::RoleUnknown);
        keeper.delete_role("root", "auditor").unwrap();
    }

    #[test]
    fn role_duty_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.role_funcset_add("dept", "worker", "fs2").unwrap();
        let err = keeper.role_funcset_add("dept", "worker", "fs2").unwrap_err();
        assert_eq!(reason_of(err), Reason::AlreadyExists);

        keeper.role_funcset_remove("dept", "worker", "fs2").unwrap();
        let err = keeper
            .role_funcset_remove("dept", "worker", "fs2")
            .unwrap_err();
        assert_eq!(reason_of(err), Reason::NotInSet);

        assert_eq!(keeper.role_funcsets("dept", "worker").unwrap(), vec!["fs1"]);
    }

    #[test]
    fn funcset_ids_are_unique_tree_wide() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        // fs1 is declared at the root; redeclaring it in dept must fail
        let err = keeper.funcset_create("dept", "fs1", None).unwrap_err();
        assert_eq!(reason_of(err), Reason::AlreadyExists);

        keeper.funcset_create("dept", "fs2", Some("Second")).unwrap();
        assert_eq!(keeper.list_funcsets(), vec!["fs1", "fs2"]);
    }

    #[test]
    fn funcset_member_edits() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.funcset_func_add("fs1", "f-c").unwrap();
        let err = keeper.funcset_func_add("fs1", "f-c").unwrap_err();
        assert_eq!(reason_of(err), Reason::AlreadyExists);

        keeper.funcset_func_remove("fs1", "f-c").unwrap();
        let err = keeper.funcset_func_remove("fs1", "f-c").unwrap_err();
        assert_eq!(reason_of(err), Reason::NotInSet);

        let details = keeper.funcset_details("fs1").unwrap();
        assert_eq!(details.name.as_deref(), Some("First set"));
        let err = keeper.funcset_details("fs9").unwrap_err();
        assert_eq!(reason_of(err), Reason::FuncsetUnknown);
    }
}
