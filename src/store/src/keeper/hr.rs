//! Employment: hiring, firing, position slots and staffing reports.

use super::{operator_branch, require_branch, require_person, Keeper};
use crate::error::{Fault, Reason, Result};
use crate::ident::SafeIdent;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

/// Where a person was fired from.
#[derive(Debug, Clone, Serialize)]
pub struct FireOutcome {
    pub branch: String,
    pub pos: String,
}

/// Slot totals for one role in one branch, reported after a slot edit.
#[derive(Debug, Clone, Serialize)]
pub struct SlotCounts {
    pub branch: String,
    pub pos: String,
    pub total: usize,
    pub vacant: usize,
}

/// One position in a staffing review.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PositionView {
    pub pos: String,
    pub branch: String,
    pub vacant: bool,
}

/// One line of a position-count report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PositionCount {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub count: usize,
}

/// Position counts over the tree, optionally per role or vacant-only.
#[derive(Debug, Clone, Serialize)]
pub struct PositionsReport {
    pub branch_filter: String,
    pub only_vacant: bool,
    pub report: Vec<PositionCount>,
}

impl Keeper {
    /// Put a person into a vacant position.
    ///
    /// The operator must be employed and the target branch must lie in
    /// the operator's own subtree.
    pub fn hire(&self, user: &str, branch: &str, pos: &str, operator: &str) -> Result<()> {
        let user = SafeIdent::new(user)?;
        let branch = SafeIdent::new(branch)?;
        let operator = SafeIdent::new(operator)?;
        if pos.is_empty() {
            return Err(Fault::new(
                Reason::WrongFormat,
                "required parameter absent: position is empty",
            )
            .into());
        }

        {
            let mut universe = self.docs().universe.write();
            require_person(&universe, &user)?;
            if let Some((employer, _)) = universe.employment(user.as_str()) {
                return Err(Fault::new(
                    Reason::AlreadyEmployed,
                    format!("user '{user}' is already employed at '{}'", employer.id),
                )
                .into());
            }
            let target = require_branch(&universe, &branch)?;
            if !target.positions.iter().any(|p| p.role == pos && p.person.is_none()) {
                return Err(Fault::new(
                    Reason::NoVacantPositions,
                    format!("no vacant '{pos}' positions in '{branch}'"),
                )
                .into());
            }
            let scope = operator_branch(&universe, &operator)?;
            if !scope.subtree_contains(&branch) {
                return Err(Fault::new(
                    Reason::ForbiddenForOperator,
                    format!("branch '{branch}' is not accountable to operator '{operator}'"),
                )
                .into());
            }

            info!(user = %user, branch = %branch, pos, operator = %operator, "hiring employee");
            let target = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            if let Some(slot) = target
                .positions
                .iter_mut()
                .find(|p| p.role == pos && p.person.is_none())
            {
                slot.person = Some(user.as_str().to_string());
            }
        }
        self.mark_dirty()
    }

    /// Vacate a person's position, keeping the slot.
    pub fn fire(&self, user: &str, operator: &str) -> Result<FireOutcome> {
        let user = SafeIdent::new(user)?;
        let operator = SafeIdent::new(operator)?;

        let outcome;
        {
            let mut universe = self.docs().universe.write();
            require_person(&universe, &user)?;
            let Some((employer, position)) = universe.employment(user.as_str()) else {
                return Err(Fault::new(
                    Reason::AlreadyUnemployed,
                    format!("user '{user}' is already unemployed"),
                )
                .into());
            };
            outcome = FireOutcome {
                branch: employer.id.clone(),
                pos: position.role.clone(),
            };

            let scope = operator_branch(&universe, &operator)?;
            if !scope.employed().iter().any(|p| p == user.as_str()) {
                return Err(Fault::new(
                    Reason::ForbiddenForOperator,
                    format!("user '{user}' is not accountable to operator '{operator}'"),
                )
                .into());
            }

            info!(user = %user, branch = %outcome.branch, pos = %outcome.pos, operator = %operator, "firing employee");
            let employer_id = SafeIdent::new(&outcome.branch)?;
            if let Some(branch) = universe.branch_mut(&employer_id) {
                if let Some(slot) = branch
                    .positions
                    .iter_mut()
                    .find(|p| p.person.as_deref() == Some(user.as_str()))
                {
                    slot.person = None;
                }
            }
        }
        self.mark_dirty()?;
        Ok(outcome)
    }

    /// Add one vacant slot for a role to a branch.
    pub fn create_position(&self, branch: &str, role: &str) -> Result<SlotCounts> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        let counts;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            node.positions.push(crate::tree::Position {
                role: role.as_str().to_string(),
                person: None,
            });
            let (total, vacant) = node.position_counts(role.as_str());
            counts = SlotCounts {
                branch: branch.as_str().to_string(),
                pos: role.as_str().to_string(),
                total,
                vacant,
            };
        }
        self.mark_dirty()?;
        Ok(counts)
    }

    /// Remove one vacant slot for a role; occupied slots are untouchable.
    pub fn delete_position(&self, branch: &str, role: &str) -> Result<SlotCounts> {
        let branch = SafeIdent::new(branch)?;
        let role = SafeIdent::new(role)?;
        let counts;
        {
            let mut universe = self.docs().universe.write();
            require_branch(&universe, &branch)?;
            let node = universe
                .branch_mut(&branch)
                .ok_or_else(|| Fault::new(Reason::BranchUnknown, format!("branch '{branch}' is unknown")))?;
            let Some(idx) = node
                .positions
                .iter()
                .rposition(|p| p.role == *role.as_str() && p.person.is_none())
            else {
                return Err(Fault::new(
                    Reason::NotInSet,
                    format!("branch '{branch}' has no vacant '{role}' positions"),
                )
                .into());
            };
            node.positions.remove(idx);
            let (total, vacant) = node.position_counts(role.as_str());
            counts = SlotCounts {
                branch: branch.as_str().to_string(),
                pos: role.as_str().to_string(),
                total,
                vacant,
            };
        }
        self.mark_dirty()?;
        Ok(counts)
    }

    /// Every position slot, tree-wide or for one branch.
    pub fn review_positions(&self, branch: Option<&str>) -> Result<Vec<PositionView>> {
        let filter = SafeIdent::opt(branch)?;
        let universe = self.docs().universe.read();
        Ok(universe
            .root
            .subtree()
            .into_iter()
            .filter(|b| filter.as_ref().map_or(true, |f| b.id == *f.as_str()))
            .flat_map(|b| {
                b.positions.iter().map(|p| PositionView {
                    pos: p.role.clone(),
                    branch: b.id.clone(),
                    vacant: p.person.is_none(),
                })
            })
            .collect())
    }

    /// Position counts per branch, optionally per role and vacant-only.
    /// `branch` `None` covers the whole tree.
    pub fn positions_report(
        &self,
        branch: Option<&str>,
        per_role: bool,
        only_vacant: bool,
    ) -> Result<PositionsReport> {
        let filter = SafeIdent::opt(branch)?;
        let universe = self.docs().universe.read();

        let mut report = Vec::new();
        for node in universe.root.subtree() {
            if let Some(f) = &filter {
                if node.id != *f.as_str() {
                    continue;
                }
            }
            let matching: Vec<_> = node
                .positions
                .iter()
                .filter(|p| !only_vacant || p.person.is_none())
                .collect();
            if matching.is_empty() {
                continue;
            }
            if per_role {
                let roles: BTreeSet<&str> = matching.iter().map(|p| p.role.as_str()).collect();
                for role in roles {
                    report.push(PositionCount {
                        branch: node.id.clone(),
                        role: Some(role.to_string()),
                        count: matching.iter().filter(|p| p.role == role).count(),
                    });
                }
            } else {
                report.push(PositionCount {
                    branch: node.id.clone(),
                    role: None,
                    count: matching.len(),
                });
            }
        }

        Ok(PositionsReport {
            branch_filter: branch.unwrap_or("*ALL*").to_string(),
            only_vacant,
            report,
        })
    }

    /// Sorted role names with at least one vacant slot in a branch.
    pub fn vacant_positions(&self, branch: &str) -> Result<Vec<String>> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let node = require_branch(&universe, &branch)?;
        let roles: BTreeSet<String> = node
            .positions
            .iter()
            .filter(|p| p.person.is_none())
            .map(|p| p.role.clone())
            .collect();
        Ok(roles.into_iter().collect())
    }

    /// People occupying positions in a branch, with or without its
    /// descendants.
    pub fn branch_employees(&self, branch: &str, with_subbranches: bool) -> Result<Vec<String>> {
        let branch = SafeIdent::new(branch)?;
        let universe = self.docs().universe.read();
        let node = require_branch(&universe, &branch)?;
        Ok(if with_subbranches {
            node.employed()
        } else {
            node.positions.iter().filter_map(|p| p.person.clone()).collect()
        })
    }

    /// Branches reachable downward from a person's employing branch.
    ///
    /// `all_levels` descends the whole subtree instead of the direct
    /// children; `exclude_own` drops the employing branch itself.
    pub fn employee_subbranches(
        &self,
        user: &str,
        all_levels: bool,
        exclude_own: bool,
    ) -> Result<Vec<String>> {
        let user = SafeIdent::new(user)?;
        let universe = self.docs().universe.read();
        require_person(&universe, &user)?;

        let mut ids = BTreeSet::new();
        if let Some((home, _)) = universe.employment(user.as_str()) {
            if all_levels {
                ids.extend(home.descendant_ids());
            } else {
                ids.extend(home.children.iter().map(|c| c.id.clone()));
            }
            if !exclude_own {
                ids.insert(home.id.clone());
            }
        }
        Ok(ids.into_iter().collect())
    }
}
