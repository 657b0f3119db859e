//! Property-based tests over the pure, stateless pieces of the
//! coordination core: the work-stealing scorer, its steal-amount
//! arithmetic, and the dependency graph's cycle rejection.

use abathur::domain::ids::{AgentId, TaskId};
use abathur::services::dependency_graph::DependencyGraph;
use abathur::services::scheduler::work_stealing::{decide_steal, score};
use abathur::domain::models::scheduling_context::WorkloadSnapshot;
use proptest::prelude::*;

fn snapshot(cpu_percent: f64, mem_percent: f64, predicted_queued_time_ms: f64) -> WorkloadSnapshot {
    WorkloadSnapshot {
        cpu_percent,
        mem_percent,
        predicted_queued_time_ms,
    }
}

proptest! {
    /// Adding load to a candidate, all else equal, never raises its score.
    #[test]
    fn higher_load_never_increases_score(
        load_a in 0usize..50,
        load_b in 0usize..50,
        priority in -10i32..10,
        cpu in 0.0f64..100.0,
        mem in 0.0f64..100.0,
        queued_ms in 0.0f64..60_000.0,
    ) {
        let snap = snapshot(cpu, mem, queued_ms);
        let (lower, higher) = if load_a <= load_b { (load_a, load_b) } else { (load_b, load_a) };
        prop_assert!(score(lower, priority, false, snap) >= score(higher, priority, false, snap));
    }

    /// A capability match always adds exactly +20 to the score,
    /// independent of every other input.
    #[test]
    fn capability_match_always_adds_exactly_twenty(
        load in 0usize..50,
        priority in -10i32..10,
        cpu in 0.0f64..100.0,
        mem in 0.0f64..100.0,
        queued_ms in 0.0f64..60_000.0,
    ) {
        let snap = snapshot(cpu, mem, queued_ms);
        let with = score(load, priority, true, snap);
        let without = score(load, priority, false, snap);
        prop_assert!((with - without - 20.0).abs() < 1e-9);
    }

    /// `decide_steal` never proposes stealing more than `max_steal_batch`,
    /// never steals when the imbalance is under the threshold, and the
    /// proposed count is always positive when it does steal.
    #[test]
    fn decide_steal_respects_threshold_and_batch_cap(
        max_load in 0usize..1000,
        min_load in 0usize..1000,
        threshold in 0usize..50,
        max_batch in 1usize..50,
    ) {
        let a = AgentId::new();
        let b = AgentId::new();
        let (busiest_load, idlest_load) = if max_load >= min_load { (max_load, min_load) } else { (min_load, max_load) };
        let result = decide_steal((a, busiest_load), (b, idlest_load), threshold, max_batch);

        let imbalance = busiest_load - idlest_load;
        if imbalance < threshold {
            prop_assert!(result.is_none());
        } else if let Some(request) = result {
            prop_assert!(request.count <= max_batch);
            prop_assert!(request.count >= 1);
            prop_assert_eq!(request.source, a);
            prop_assert_eq!(request.target, b);
        } else {
            prop_assert!(false, "expected a steal request once imbalance >= threshold");
        }
    }

    /// A chain of `n` tasks, each depending on the previous, is always
    /// accepted (chains never form a cycle) and its depth is exactly
    /// `n - 1` for the last task in the chain.
    #[test]
    fn acyclic_chain_is_always_accepted_with_depth_equal_to_its_length(len in 1usize..25) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let graph = DependencyGraph::new();
            let mut ids = Vec::with_capacity(len);
            for i in 0..len {
                let id = TaskId::new();
                let deps = if i == 0 { vec![] } else { vec![ids[i - 1]] };
                let accepted = graph.add(id, deps).await;
                prop_assert!(accepted, "a linear chain must never be rejected as a cycle");
                ids.push(id);
            }
            let last = *ids.last().unwrap();
            prop_assert_eq!(graph.depth(last).await, len - 1);
            Ok(())
        })?;
    }

    /// Closing a chain back on itself (appending an edge from the first
    /// task to the last) is always rejected, regardless of chain length,
    /// and the graph's acyclic state from before the attempt is preserved.
    #[test]
    fn closing_a_chain_into_a_cycle_is_always_rejected(len in 2usize..20) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let graph = DependencyGraph::new();
            let mut ids = Vec::with_capacity(len);
            for i in 0..len {
                let id = TaskId::new();
                let deps = if i == 0 { vec![] } else { vec![ids[i - 1]] };
                graph.add(id, deps).await;
                ids.push(id);
            }
            let first = ids[0];
            let last = *ids.last().unwrap();
            let accepted = graph.add(first, vec![last]).await;
            prop_assert!(!accepted, "closing the chain into a loop must be rejected");
            prop_assert!(graph.is_ready(first).await, "first task's dependencies must be unchanged (still empty) after the rejected edge");
            Ok(())
        })?;
    }
}
