//! Agent directory
//!
//! Agents are endpoint machines attached to branches of the tree. The
//! registry is a seam: the bundled in-memory implementation suits a single
//! process, and anything network-backed can slot in behind the same trait.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One registered agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    /// Branch the agent is attached to.
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Storage seam for agent records. Implementations are internally
/// synchronized; the keeper calls them without holding document locks.
pub trait AgentRegistry: Send + Sync {
    fn list_ids(&self) -> Vec<String>;

    /// Branch id the agent is attached to, if the agent exists.
    fn owning_branch(&self, id: &str) -> Option<String>;

    /// Full record lookup; `with_tags` false strips the tag list.
    fn get(&self, id: &str, with_tags: bool) -> Option<AgentRecord>;

    /// Insert or replace a record under its id.
    fn add(&self, record: AgentRecord);

    /// Remove a record; true when something was removed.
    fn delete(&self, id: &str) -> bool;

    /// `(agent_id, branch_id)` pairs for agents attached to any of the
    /// given branches, ordered by agent id.
    fn list_by_branches(&self, branches: &[String]) -> Vec<(String, String)>;
}

/// Process-local registry backed by an ordered map.
#[derive(Default)]
pub struct MemoryAgentRegistry {
    records: RwLock<BTreeMap<String, AgentRecord>>,
}

impl MemoryAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentRegistry for MemoryAgentRegistry {
    fn list_ids(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    fn owning_branch(&self, id: &str) -> Option<String> {
        self.records.read().get(id).map(|r| r.branch.clone())
    }

    fn get(&self, id: &str, with_tags: bool) -> Option<AgentRecord> {
        let mut record = self.records.read().get(id).cloned()?;
        if !with_tags {
            record.tags.clear();
        }
        Some(record)
    }

    fn add(&self, record: AgentRecord) {
        self.records.write().insert(record.id.clone(), record);
    }

    fn delete(&self, id: &str) -> bool {
        self.records.write().remove(id).is_some()
    }

    fn list_by_branches(&self, branches: &[String]) -> Vec<(String, String)> {
        self.records
            .read()
            .values()
            .filter(|r| branches.iter().any(|b| *b == r.branch))
            .map(|r| (r.id.clone(), r.branch.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, branch: &str) -> AgentRecord {
        AgentRecord {
            id: id.into(),
            branch: branch.into(),
            descr: Some("rack 3".into()),
            location: None,
            extra: None,
            tags: vec!["prod".into()],
        }
    }

    #[test]
    fn add_get_delete_cycle() {
        let reg = MemoryAgentRegistry::new();
        reg.add(record("ag-1", "dept"));
        assert_eq!(reg.owning_branch("ag-1").as_deref(), Some("dept"));
        assert!(reg.delete("ag-1"));
        assert!(!reg.delete("ag-1"));
        assert!(reg.get("ag-1", true).is_none());
    }

    #[test]
    fn get_without_tags_strips_them() {
        let reg = MemoryAgentRegistry::new();
        reg.add(record("ag-1", "dept"));
        assert!(reg.get("ag-1", false).unwrap().tags.is_empty());
        assert_eq!(reg.get("ag-1", true).unwrap().tags, vec!["prod".to_string()]);
    }

    #[test]
    fn listing_filters_by_branch_set() {
        let reg = MemoryAgentRegistry::new();
        reg.add(record("ag-1", "dept"));
        reg.add(record("ag-2", "lab"));
        reg.add(record("ag-3", "dept"));

        let got = reg.list_by_branches(&["dept".into()]);
        assert_eq!(
            got,
            vec![
                ("ag-1".to_string(), "dept".to_string()),
                ("ag-3".to_string(), "dept".to_string()),
            ]
        );
    }
}
