//! Agent identity and registration state.

use crate::domain::ids::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Everything the core knows about a registered agent.
///
/// Created at registration, mutated only by the registrar (the
/// coordination manager), destroyed on unregister. Exactly one profile
/// exists per live agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: AgentId,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub priority: i32,
    pub max_concurrent_tasks: usize,
    /// Monotonically increasing registration sequence number, used as the
    /// stable tie-break when two agents are otherwise equally eligible.
    pub registration_sequence: u64,
}

impl AgentProfile {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        capabilities: HashSet<String>,
        priority: i32,
        max_concurrent_tasks: usize,
        registration_sequence: u64,
    ) -> Self {
        Self {
            id: AgentId::new(),
            name: name.into(),
            capabilities,
            priority,
            max_concurrent_tasks,
            registration_sequence,
        }
    }

    /// A capability set containing `"*"` matches every task type.
    #[must_use]
    pub fn can_handle(&self, task_type: &str) -> bool {
        self.capabilities.contains("*") || self.capabilities.contains(task_type)
    }

    /// True if this agent can handle `task`'s type and holds every tag in
    /// its `required_capabilities`, if any. `type` alone decides eligibility
    /// for most tasks; `required_capabilities` is an additional, optional
    /// filter for tasks that need specific tooling beyond their type.
    #[must_use]
    pub fn is_eligible_for(&self, task: &crate::domain::models::task::Task) -> bool {
        self.can_handle(&task.task_type)
            && task
                .required_capabilities
                .iter()
                .all(|cap| self.capabilities.contains("*") || self.capabilities.contains(cap))
    }
}

/// Runtime status tracked by the swarm monitor (C9), distinct from the
/// scheduler's own notion of a task's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentActivity {
    Idle,
    Running,
    Completed,
    Failed,
    Stalled,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wildcard_capability_matches_anything() {
        let agent = AgentProfile::new("worker", caps(&["*"]), 0, 4, 0);
        assert!(agent.can_handle("anything"));
    }

    #[test]
    fn specific_capability_matches_only_itself() {
        let agent = AgentProfile::new("worker", caps(&["compile"]), 0, 4, 0);
        assert!(agent.can_handle("compile"));
        assert!(!agent.can_handle("deploy"));
    }

    fn task_with_requirements(task_type: &str, required: &[&str]) -> crate::domain::models::task::Task {
        crate::domain::models::task::Task::new(
            task_type,
            crate::domain::models::task::TaskPriority::Medium,
            vec![],
            required.iter().map(|s| s.to_string()).collect(),
            serde_json::Value::Null,
            std::time::SystemTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn eligibility_requires_every_required_capability() {
        let agent = AgentProfile::new("worker", caps(&["build", "gpu"]), 0, 4, 0);
        assert!(agent.is_eligible_for(&task_with_requirements("build", &["gpu"])));
        assert!(!agent.is_eligible_for(&task_with_requirements("build", &["tpu"])));
    }

    #[test]
    fn wildcard_capability_satisfies_any_required_capability() {
        let agent = AgentProfile::new("worker", caps(&["*"]), 0, 4, 0);
        assert!(agent.is_eligible_for(&task_with_requirements("deploy", &["gpu", "tpu"])));
    }
}
