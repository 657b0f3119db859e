//! Resource lock and wait-queue entries owned by the resource manager (C4).

use crate::domain::ids::{AgentId, ResourceId};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A lockable resource. Created lazily on first `acquire`.
///
/// Invariant: at most one owner at a time (`locked_by` is `Some` iff
/// `locked` is true).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub resource_type: String,
    pub locked: bool,
    pub locked_by: Option<AgentId>,
    pub locked_at: Option<SystemTime>,
}

impl Resource {
    #[must_use]
    pub fn new(id: ResourceId, resource_type: impl Into<String>) -> Self {
        Self {
            id,
            resource_type: resource_type.into(),
            locked: false,
            locked_by: None,
            locked_at: None,
        }
    }
}

/// One agent's place in a resource's wait queue.
///
/// Ordering in the queue is descending by priority, then ascending by
/// `requested_at` (FIFO tie-break) — see `WaitQueue` in the resource
/// manager for the comparator that implements this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceWaitEntry {
    pub agent_id: AgentId,
    pub resource_id: ResourceId,
    pub requested_at: SystemTime,
    pub priority: i32,
}
