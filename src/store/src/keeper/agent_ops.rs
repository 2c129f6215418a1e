//! Agent attachment: registering endpoint machines against tree branches.

use super::{require_branch, Keeper};
use crate::agents::AgentRecord;
use crate::error::{Fault, Reason, Result};
use crate::ident::SafeIdent;
use serde::Serialize;
use tracing::info;

/// Alias accepted wherever a branch id names the attachment point.
pub const ROOT_ALIAS: &str = "*ROOT*";
/// Alias accepted by listings to cover the whole tree.
pub const ALL_ALIAS: &str = "*ALL*";

/// Free-form attributes carried by an agent record.
#[derive(Debug, Clone, Default)]
pub struct AgentFields {
    pub descr: Option<String>,
    pub location: Option<String>,
    pub extra: Option<String>,
    pub tags: Vec<String>,
}

/// One line of an agent listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AgentListing {
    Id(String),
    Located { agent: String, branch: String },
}

impl Keeper {
    /// Attach a new agent to a branch. `*ROOT*` resolves to the tree root.
    pub fn register_agent(&self, branch: &str, agent: &str, fields: AgentFields) -> Result<()> {
        let agent = SafeIdent::new(agent)?;
        let branch_id = {
            let universe = self.docs().universe.read();
            if branch == ROOT_ALIAS {
                universe.root.id.clone()
            } else {
                let branch = SafeIdent::new(branch)?;
                require_branch(&universe, &branch)?.id.clone()
            }
        };

        if let Some(owner) = self.agents().owning_branch(agent.as_str()) {
            return Err(Fault::new(
                Reason::AlreadyExists,
                format!("agent '{agent}' is already registered in branch '{owner}'"),
            )
            .with("bad_value", agent.as_str())
            .into());
        }

        info!(agent = %agent, branch = %branch_id, "registering agent");
        self.agents().add(AgentRecord {
            id: agent.as_str().to_string(),
            branch: branch_id,
            descr: fields.descr,
            location: fields.location,
            extra: fields.extra,
            tags: fields.tags,
        });
        Ok(())
    }

    /// Re-attach an existing agent to a branch inside its current owner's
    /// subtree. A move never climbs the tree.
    pub fn move_agent(&self, branch: &str, agent: &str, fields: AgentFields) -> Result<()> {
        let agent = SafeIdent::new(agent)?;
        let Some(owner) = self.agents().owning_branch(agent.as_str()) else {
            return Err(Fault::new(
                Reason::AgentUnknown,
                format!("agent '{agent}' was never registered"),
            )
            .with("bad_value", agent.as_str())
            .into());
        };

        let target_id = {
            let universe = self.docs().universe.read();
            let owner_id = SafeIdent::new(&owner)?;
            let Some(owner_branch) = universe.branch(&owner_id) else {
                return Err(Fault::new(
                    Reason::DatabaseError,
                    format!("branch '{owner}' referenced from agent '{agent}' no longer exists"),
                )
                .into());
            };
            let target = if branch == ROOT_ALIAS {
                SafeIdent::new(&universe.root.id)?
            } else {
                SafeIdent::new(branch)?
            };
            if !owner_branch.subtree_contains(&target) {
                return Err(Fault::new(
                    Reason::NotInSet,
                    format!(
                        "branch '{target}' is not a subsidiary of '{owner}' holding agent '{agent}'"
                    ),
                )
                .with("bad_value", target.as_str())
                .into());
            }
            target.as_str().to_string()
        };

        info!(agent = %agent, from = %owner, to = %target_id, "moving agent");
        self.agents().delete(agent.as_str());
        self.agents().add(AgentRecord {
            id: agent.as_str().to_string(),
            branch: target_id,
            descr: fields.descr,
            location: fields.location,
            extra: fields.extra,
            tags: fields.tags,
        });
        Ok(())
    }

    pub fn unregister_agent(&self, agent: &str) -> Result<()> {
        if !self.agents().delete(agent) {
            return Err(Fault::new(
                Reason::AgentUnknown,
                format!("agent '{agent}' was never registered"),
            )
            .with("bad_value", agent)
            .into());
        }
        info!(agent, "agent unregistered");
        Ok(())
    }

    pub fn agent_details(&self, agent: &str) -> Result<AgentRecord> {
        self.agents().get(agent, true).ok_or_else(|| {
            Fault::new(
                Reason::AgentUnknown,
                format!("agent '{agent}' was never registered"),
            )
            .with("bad_value", agent)
            .into()
        })
    }

    /// Branch of the agent's owner plus everything below it.
    pub fn agent_subbranches(&self, agent: &str) -> Result<Vec<String>> {
        let Some(owner) = self.agents().owning_branch(agent) else {
            return Err(Fault::new(
                Reason::AgentUnknown,
                format!("agent '{agent}' was never registered"),
            )
            .with("bad_value", agent)
            .into());
        };
        let universe = self.docs().universe.read();
        let owner_id = SafeIdent::new(&owner)?;
        let mut ids = vec![owner.clone()];
        if let Some(branch) = universe.branch(&owner_id) {
            ids.extend(branch.descendant_ids());
        }
        Ok(ids)
    }

    pub fn list_all_agents(&self) -> Vec<String> {
        self.agents().list_ids()
    }

    /// Agents attached at a branch (`*ALL*` for the whole tree), with or
    /// without descendants, as ids or `(agent, branch)` pairs.
    pub fn list_agents(
        &self,
        branch: &str,
        with_subbranches: bool,
        with_location: bool,
    ) -> Result<Vec<AgentListing>> {
        let branch_ids = {
            let universe = self.docs().universe.read();
            if branch == ALL_ALIAS {
                universe.branch_ids()
            } else {
                let branch = SafeIdent::new(branch)?;
                let node = require_branch(&universe, &branch)?;
                if with_subbranches {
                    let mut ids = vec![node.id.clone()];
                    ids.extend(node.descendant_ids());
                    ids
                } else {
                    vec![node.id.clone()]
                }
            }
        };

        Ok(self
            .agents()
            .list_by_branches(&branch_ids)
            .into_iter()
            .map(|(agent, branch)| {
                if with_location {
                    AgentListing::Located { agent, branch }
                } else {
                    AgentListing::Id(agent)
                }
            })
            .collect())
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
    fn register_resolves_the_root_alias() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .register_agent(ROOT_ALIAS, "ag-1", AgentFields::default())
            .unwrap();
        assert_eq!(keeper.agent_subbranches("ag-1").unwrap(), vec!["root", "dept"]);

        let err = keeper
            .register_agent("dept", "ag-1", AgentFields::default())
            .unwrap_err();
        assert_eq!(reason_of(err), Reason::AlreadyExists);
    }

    #[test]
    fn register_requires_a_real_branch() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        let err = keeper
            .register_agent("nowhere", "ag-1", AgentFields::default())
            .unwrap_err();
        assert_eq!(reason_of(err), Reason::BranchUnknown);
    }

    #[test]
    fn moves_stay_inside_the_owning_subtree() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.add_subbranch("dept", "team").unwrap();
        keeper
            .register_agent("dept", "ag-1", AgentFields::default())
            .unwrap();

        keeper.move_agent("team", "ag-1", AgentFields::default()).unwrap();
        assert_eq!(
            keeper.agent_details("ag-1").unwrap().branch,
            "team".to_string()
        );

        // team's subtree does not include dept, so the way back is shut
        let err = keeper
            .move_agent("dept", "ag-1", AgentFields::default())
            .unwrap_err();
        assert_eq!(reason_of(err), Reason::NotInSet);
    }

    #[test]
    fn moving_an_orphaned_agent_is_an_anomaly() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.add_subbranch("dept", "team").unwrap();
        keeper
            .register_agent("team", "ag-1", AgentFields::default())
            .unwrap();
        keeper.delete_branch("team").unwrap();

        let err = keeper
            .move_agent("dept", "ag-1", AgentFields::default())
            .unwrap_err();
        assert_eq!(reason_of(err), Reason::DatabaseError);
    }

    #[test]
    fn unregister_and_details() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper
            .register_agent(
                "dept",
                "ag-1",
                AgentFields {
                    descr: Some("rack 3".into()),
                    location: Some("hall B".into()),
                    extra: None,
                    tags: vec!["prod".into()],
                },
            )
            .unwrap();

        let details = keeper.agent_details("ag-1").unwrap();
        assert_eq!(details.location.as_deref(), Some("hall B"));
        assert_eq!(details.tags, vec!["prod".to_string()]);

        keeper.unregister_agent("ag-1").unwrap();
        let err = keeper.unregister_agent("ag-1").unwrap_err();
        assert_eq!(reason_of(err), Reason::AgentUnknown);
    }

    #[test]
    fn listings_respect_scope_and_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let keeper = seeded_keeper(tmp.path());
        keeper.add_subbranch("dept", "team").unwrap();
        keeper
            .register_agent("dept", "ag-1", AgentFields::default())
            .unwrap();
        keeper
            .register_agent("team", "ag-2", AgentFields::default())
            .unwrap();

        let direct = keeper.list_agents("dept", false, false).unwrap();
        assert_eq!(direct, vec![AgentListing::Id("ag-1".into())]);

        let deep = keeper.list_agents("dept", true, true).unwrap();
        assert_eq!(
            deep,
            vec![
                AgentListing::Located {
                    agent: "ag-1".into(),
                    branch: "dept".into(),
                },
                AgentListing::Located {
                    agent: "ag-2".into(),
                    branch: "team".into(),
                },
            ]
        );

        let all = keeper.list_agents(ALL_ALIAS, true, false).unwrap();
        assert_eq!(all.len(), 2);
    }
}
