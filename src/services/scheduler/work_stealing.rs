//! Work-stealing scorer and steal-decision arithmetic (§4.6).
//!
//! Kept as pure functions over a workload snapshot so they're testable
//! without spinning up the scheduler's background loop, which just
//! calls these on a timer and emits the resulting `WorkStealingRequest`
//! through the event bus.

use crate::domain::ids::AgentId;
use crate::domain::models::scheduling_context::WorkloadSnapshot;

/// `100 − 10·load − 0.5·cpu − 0.3·mem + 5·priority + (+20 if capability
/// matches) − predicted_queued_time/1000`. Highest score wins among
/// candidates with a recorded snapshot.
#[must_use]
pub fn score(
    load: usize,
    priority: i32,
    capability_matches: bool,
    snapshot: WorkloadSnapshot,
) -> f64 {
    let mut score = 100.0
        - 10.0 * load as f64
        - 0.5 * snapshot.cpu_percent
        - 0.3 * snapshot.mem_percent
        + 5.0 * f64::from(priority)
        - snapshot.predicted_queued_time_ms / 1000.0;
    if capability_matches {
        score += 20.0;
    }
    score
}

/// Picks the highest-scoring candidate, or `None` if no candidate has
/// a recorded workload snapshot (the caller should fall back to the
/// configured placement strategy in that case).
#[must_use]
pub fn best_scored_candidate(
    candidates: &[(AgentId, usize, i32, bool, Option<WorkloadSnapshot>)],
) -> Option<AgentId> {
    candidates
        .iter()
        .filter_map(|&(agent, load, priority, matches, snapshot)| {
            snapshot.map(|s| (agent, score(load, priority, matches, s)))
        })
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(agent, _)| agent)
}

/// A steal request emitted when the imbalance between the busiest and
/// idlest agent reaches `steal_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealRequest {
    pub source: AgentId,
    pub target: AgentId,
    pub count: usize,
}

/// `count = min(floor((max_load - min_load) / 2), max_steal_batch)`.
#[must_use]
pub fn decide_steal(
    busiest: (AgentId, usize),
    idlest: (AgentId, usize),
    steal_threshold: usize,
    max_steal_batch: usize,
) -> Option<StealRequest> {
    let (source, max_load) = busiest;
    let (target, min_load) = idlest;
    let imbalance = max_load.saturating_sub(min_load);
    if imbalance < steal_threshold {
        return None;
    }
    let count = (imbalance / 2).min(max_steal_batch).max(1);
    Some(StealRequest {
        source,
        target,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_match_adds_twenty() {
        let snapshot = WorkloadSnapshot::default();
        let with = score(0, 0, true, snapshot);
        let without = score(0, 0, false, snapshot);
        assert!((with - without - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn higher_load_lowers_score() {
        let snapshot = WorkloadSnapshot::default();
        assert!(score(1, 0, false, snapshot) < score(0, 0, false, snapshot));
    }

    #[test]
    fn below_threshold_no_steal() {
        let a = AgentId::new();
        let b = AgentId::new();
        assert_eq!(decide_steal((a, 5), (b, 4), 3, 10), None);
    }

    #[test]
    fn imbalance_at_threshold_steals_half_capped_at_batch() {
        let a = AgentId::new();
        let b = AgentId::new();
        let request = decide_steal((a, 10), (b, 0), 3, 2).unwrap();
        assert_eq!(request.source, a);
        assert_eq!(request.target, b);
        assert_eq!(request.count, 2, "floor(10/2)=5 capped at max_steal_batch=2");
    }
}
