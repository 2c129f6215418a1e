//! Store facade
//!
//! One [`Keeper`] instance owns the documents, the debounced saver and the
//! agent registry handle. Every operation sanitizes caller-supplied
//! identifiers at the boundary, validates before mutating, and marks the
//! documents dirty only after a successful mutation.

mod agent_ops;
mod functions;
mod hr;
mod identity;
mod org;

pub use agent_ops::{AgentFields, AgentListing, ALL_ALIAS, ROOT_ALIAS};
pub use functions::{FunctionList, PutOutcome, RemoveOutcome, TagsetOutcome};
pub use hr::{FireOutcome, PositionCount, PositionView, PositionsReport, SlotCounts};
pub use identity::{AppView, CredentialStamp, FuncsetView, RegDetails, UserOpts};
pub use org::{RoleInBranch, WhitelistView};

use crate::agents::AgentRegistry;
use crate::error::{Fault, Reason, Result};
use crate::ident::SafeIdent;
use crate::persist::{Documents, Saver, SaverConfig};
use crate::tree::{Branch, Person, Universe};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Startup tuning for a [`Keeper`].
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    pub saver: SaverConfig,
    /// Session cap applied to people created without an explicit one.
    pub default_session_max: u32,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            saver: SaverConfig::default(),
            default_session_max: 5,
        }
    }
}

/// The store facade. Constructed once at startup and shared behind `Arc`.
pub struct Keeper {
    saver: Arc<Saver>,
    agents: Arc<dyn AgentRegistry>,
    default_session_max: u32,
}

impl Keeper {
    /// Load or bootstrap the documents in `dir` and assemble the facade.
    pub fn open(
        dir: &Path,
        config: KeeperConfig,
        agents: Arc<dyn AgentRegistry>,
    ) -> Result<Self> {
        let docs = Arc::new(Documents::load(dir)?);
        info!(
            dir = %dir.display(),
            branches = docs.universe.read().branch_ids().len(),
            people = docs.universe.read().people.len(),
            functions = docs.catalogue.read().functions.len(),
            "documents loaded"
        );
        Ok(Self {
            saver: Arc::new(Saver::new(docs, config.saver)),
            agents,
            default_session_max: config.default_session_max,
        })
    }

    /// Flush pending work and stop the debounce timer. Call on the way out.
    pub fn shutdown(&self) -> Result<()> {
        self.saver.shutdown()
    }

    /// Direct access to the documents, for seeding and inspection.
    pub fn docs(&self) -> &Arc<Documents> {
        self.saver.documents()
    }

    pub(crate) fn agents(&self) -> &Arc<dyn AgentRegistry> {
        &self.agents
    }

    pub(crate) fn default_session_max(&self) -> u32 {
        self.default_session_max
    }

    /// Record a completed mutation. Never call while holding a document
    /// lock: a threshold flush re-acquires the read side.
    pub(crate) fn mark_dirty(&self) -> Result<()> {
        self.saver.mark_dirty()
    }

    pub(crate) fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Person lookup, faulting with `USER-UNKNOWN`.
pub(crate) fn require_person<'a>(universe: &'a Universe, user: &SafeIdent) -> Result<&'a Person> {
    universe.people.get(user.as_str()).ok_or_else(|| {
        Fault::new(Reason::UserUnknown, format!("user '{user}' is unknown"))
            .with("bad_value", user.as_str())
            .into()
    })
}

/// Operator lookup, faulting with `OPERATOR-UNKNOWN`.
pub(crate) fn require_operator(universe: &Universe, operator: &SafeIdent) -> Result<()> {
    if universe.people.contains_key(operator.as_str()) {
        Ok(())
    } else {
        Err(Fault::new(
            Reason::OperatorUnknown,
            format!("operator '{operator}' is unknown"),
        )
        .with("bad_value", operator.as_str())
        .into())
    }
}

/// The branch employing the operator. An unemployed operator may not act
/// on the tree at all.
pub(crate) fn operator_branch<'a>(
    universe: &'a Universe,
    operator: &SafeIdent,
) -> Result<&'a Branch> {
    universe
        .employment(operator.as_str())
        .map(|(branch, _)| branch)
        .ok_or_else(|| {
            Fault::new(
                Reason::ForbiddenForOperator,
                format!("operator '{operator}' is nowhere employed"),
            )
            .into()
        })
}

/// Branch lookup, faulting with `BRANCH-UNKNOWN`.
pub(crate) fn require_branch<'a>(universe: &'a Universe, id: &SafeIdent) -> Result<&'a Branch> {
    universe.branch(id).ok_or_else(|| {
        Fault::new(Reason::BranchUnknown, format!("branch '{id}' is unknown"))
            .with("bad_value", id.as_str())
            .into()
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::agents::MemoryAgentRegistry;
    use crate::tree::{Funcset, Position, Role, Whitelist};

    /// One keeper over a throwaway directory, pre-seeded with the
    /// root/dept tree used across the operation tests.
    pub fn seeded_keeper(dir: &Path) -> Keeper {
        let keeper = Keeper::open(
            dir,
            KeeperConfig::default(),
            Arc::new(MemoryAgentRegistry::new()),
        )
        .unwrap();

        {
            let mut universe = keeper.docs().universe.write();
            universe.root.funcsets.push(Funcset {
                id: "fs1".into(),
                name: Some("First set".into()),
                functions: ["f-a".to_string(), "f-b".to_string()].into(),
            });

            let mut dept = Branch::new("dept");
            dept.whitelist = Whitelist {
                propagate_parent: false,
                entries: ["fs1".to_string()].into(),
            };
            dept.roles.push(Role {
                name: "worker".into(),
                duties: ["fs1".to_string()].into(),
            });
            dept.positions.push(Position {
                role: "worker".into(),
                person: None,
            });
            dept.positions.push(Position {
                role: "boss".into(),
                person: None,
            });
            universe.root.children.push(dept);

            universe.people.insert(
                "boss".into(),
                Person {
                    id: "boss".into(),
                    secret: "h-boss".into(),
                    secret_changed_at: 1_000,
                    expire_at: None,
                    failures: 0,
                    readable_name: "The Boss".into(),
                    session_max: 5,
                    created_by: "init".into(),
                    created_at: 1_000,
                    last_error_at: None,
                    last_success_at: None,
                    changed: Vec::new(),
                },
            );
        }

        // the boss runs the dept
        {
            let mut universe = keeper.docs().universe.write();
            let dept = universe
                .branch_mut(&SafeIdent::new("dept").unwrap())
                .unwrap();
            dept.positions[1].person = Some("boss".into());
        }

        keeper
    }
}
