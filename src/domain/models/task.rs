//! Task data model and the status state machine described in §4.6.

use crate::domain::ids::{AgentId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// A task's position in the state machine. Transitions are enforced by
/// the scheduler, not by this type — it only names the legal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses never transition further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work submitted to the coordination core.
///
/// Owned exclusively by the scheduler from submission until it reaches
/// a terminal status; other components only read task data handed to
/// them explicitly (e.g. the dependency graph gets ids, not `Task`s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: String,
    pub priority: TaskPriority,
    pub dependencies: Vec<TaskId>,
    pub required_capabilities: HashSet<String>,
    pub payload: serde_json::Value,
    pub assigned_agent: Option<AgentId>,
    pub status: TaskStatus,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub attempt: u32,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new(
        task_type: impl Into<String>,
        priority: TaskPriority,
        dependencies: Vec<TaskId>,
        required_capabilities: HashSet<String>,
        payload: serde_json::Value,
        created_at: SystemTime,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            priority,
            dependencies,
            required_capabilities,
            payload,
            assigned_agent: None,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            attempt: 0,
            output: None,
            error: None,
        }
    }
}
