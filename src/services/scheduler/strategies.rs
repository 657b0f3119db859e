//! Placement strategies (§4.6): a capability set of `select_agent`
//! implementations represented as a tagged enum rather than a trait
//! hierarchy, since the four strategies share no state and a match
//! arm is simpler than dynamic dispatch here.

use crate::domain::ids::AgentId;
use crate::domain::models::agent::AgentProfile;
use crate::domain::models::scheduling_context::SchedulingContext;
use crate::domain::models::task::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementStrategy {
    Capability,
    RoundRobin,
    LeastLoaded,
    Affinity,
}

/// Candidates are compared by registration sequence ascending as the
/// final, deterministic tie-break (§9 Open Question (b)) — this keeps
/// `select_agent` a pure function with no HashMap-iteration-order
/// dependence.
pub(super) fn eligible_sorted_by_registration<'a>(
    task: &Task,
    agents: &'a HashMap<AgentId, AgentProfile>,
) -> Vec<&'a AgentProfile> {
    let mut eligible: Vec<&AgentProfile> = agents
        .values()
        .filter(|a| a.is_eligible_for(task))
        .collect();
    eligible.sort_by_key(|a| a.registration_sequence);
    eligible
}

impl PlacementStrategy {
    #[must_use]
    pub fn select_agent(
        &self,
        task: &Task,
        agents: &HashMap<AgentId, AgentProfile>,
        context: &SchedulingContext,
    ) -> Option<AgentId> {
        match self {
            Self::Capability => select_capability(task, agents, context),
            Self::RoundRobin => select_round_robin(task, agents, context),
            Self::LeastLoaded => select_least_loaded(task, agents, context),
            Self::Affinity => select_affinity(task, agents, context),
        }
    }
}

/// Keep agents whose capability set contains the task type (or `*`).
/// Sort by current load ascending, then agent priority descending.
/// Pick first, breaking remaining ties by registration order.
fn select_capability(
    task: &Task,
    agents: &HashMap<AgentId, AgentProfile>,
    context: &SchedulingContext,
) -> Option<AgentId> {
    let mut eligible = eligible_sorted_by_registration(task, agents);
    eligible.sort_by(|a, b| {
        context
            .load_of(a.id)
            .cmp(&context.load_of(b.id))
            .then(b.priority.cmp(&a.priority))
            .then(a.registration_sequence.cmp(&b.registration_sequence))
    });
    eligible.first().map(|a| a.id)
}

/// Cycles through eligible agents using the task type's call count as
/// the index, so repeated calls for the same type visit every eligible
/// agent in registration order before repeating.
fn select_round_robin(
    task: &Task,
    agents: &HashMap<AgentId, AgentProfile>,
    context: &SchedulingContext,
) -> Option<AgentId> {
    let eligible = eligible_sorted_by_registration(task, agents);
    if eligible.is_empty() {
        return None;
    }
    let calls = context
        .type_stats
        .get(&task.task_type)
        .map(|s| s.sample_count)
        .unwrap_or(0);
    let index = (calls as usize) % eligible.len();
    Some(eligible[index].id)
}

/// Sort by current load ascending; tie-break by registration order
/// (agent priority is not considered here — that's `Capability`'s job).
fn select_least_loaded(
    task: &Task,
    agents: &HashMap<AgentId, AgentProfile>,
    context: &SchedulingContext,
) -> Option<AgentId> {
    let mut eligible = eligible_sorted_by_registration(task, agents);
    eligible.sort_by(|a, b| {
        context
            .load_of(a.id)
            .cmp(&context.load_of(b.id))
            .then(a.registration_sequence.cmp(&b.registration_sequence))
    });
    eligible.first().map(|a| a.id)
}

/// If the task type has prior history and the last-used agent is still
/// under 80% of its `max_concurrent_tasks`, reuse it; else fall back to
/// capability.
fn select_affinity(
    task: &Task,
    agents: &HashMap<AgentId, AgentProfile>,
    context: &SchedulingContext,
) -> Option<AgentId> {
    if let Some(stats) = context.type_stats.get(&task.task_type) {
        if let Some(last_agent) = stats.last_assigned_agent {
            if let Some(profile) = agents.get(&last_agent) {
                let load = context.load_of(last_agent) as f64;
                let cap = profile.max_concurrent_tasks as f64;
                if cap > 0.0 && load < 0.8 * cap {
                    return Some(last_agent);
                }
            }
        }
    }
    select_capability(task, agents, context)
}
