//! The ephemeral snapshot built per placement decision (§3).

use crate::domain::ids::AgentId;
use std::collections::HashMap;

/// Rolling per-`task_type` history used by the affinity strategy and by
/// the work-stealing scorer's `predicted_queued_time` term.
#[derive(Debug, Clone, Default)]
pub struct TypeStats {
    pub last_assigned_agent: Option<AgentId>,
    pub rolling_mean_duration_ms: f64,
    pub success_rate: f64,
    pub sample_count: u64,
}

impl TypeStats {
    /// Folds a completed task's outcome into the rolling mean/rate using
    /// a simple exponential moving average (alpha = 0.2).
    pub fn record(&mut self, agent: AgentId, duration_ms: f64, succeeded: bool) {
        const ALPHA: f64 = 0.2;
        self.last_assigned_agent = Some(agent);
        if self.sample_count == 0 {
            self.rolling_mean_duration_ms = duration_ms;
            self.success_rate = if succeeded { 1.0 } else { 0.0 };
        } else {
            self.rolling_mean_duration_ms =
                ALPHA * duration_ms + (1.0 - ALPHA) * self.rolling_mean_duration_ms;
            let outcome = if succeeded { 1.0 } else { 0.0 };
            self.success_rate = ALPHA * outcome + (1.0 - ALPHA) * self.success_rate;
        }
        self.sample_count += 1;
    }
}

/// A snapshot of current agent load, handed to a placement strategy so
/// `select_agent` stays a pure function of `(task, agents, context)`.
#[derive(Debug, Clone, Default)]
pub struct SchedulingContext {
    pub current_load: HashMap<AgentId, usize>,
    pub type_stats: HashMap<String, TypeStats>,
    /// Most recent work-stealing workload snapshot per agent, feeding the
    /// scorer's `cpu`/`mem`/`predicted_queued_time` terms when present.
    pub workload_snapshots: HashMap<AgentId, WorkloadSnapshot>,
}

impl SchedulingContext {
    #[must_use]
    pub fn load_of(&self, agent: AgentId) -> usize {
        self.current_load.get(&agent).copied().unwrap_or(0)
    }
}

/// A point-in-time resource reading for one agent, used by the
/// work-stealing scorer and by the steal-threshold sampler.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkloadSnapshot {
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub predicted_queued_time_ms: f64,
}
