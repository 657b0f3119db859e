//! Dependency-ordering and failure-propagation scenarios driven through
//! `CoordinationManager`'s public API.

use abathur::domain::models::task::{TaskPriority, TaskStatus};
use abathur::domain::ports::{AgentTransport, NullAgentTransport, TaskExecutor};
use abathur::services::config::CoordinationConfig;
use abathur::{CoordinationManager, CoordinationResult, PlacementStrategy};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

struct ConditionalExecutor {
    fail_task_type: &'static str,
}

#[async_trait]
impl TaskExecutor for ConditionalExecutor {
    async fn execute(
        &self,
        task_id: abathur::TaskId,
        task_type: &str,
        _payload: serde_json::Value,
    ) -> CoordinationResult<serde_json::Value> {
        if task_type == self.fail_task_type {
            Err(abathur::CoordinationError::TaskFailed {
                task: task_id,
                message: "intentional failure".into(),
                retryable: false,
            })
        } else {
            Ok(serde_json::json!({"ok": true}))
        }
    }
}

fn caps() -> HashSet<String> {
    let mut set = HashSet::new();
    set.insert("*".to_string());
    set
}

#[tokio::test]
async fn dependent_task_only_runs_after_its_dependency_completes() {
    let manager = CoordinationManager::new(
        Arc::new(ConditionalExecutor { fail_task_type: "__never__" }),
        Arc::new(NullAgentTransport) as Arc<dyn AgentTransport>,
        Arc::new(abathur::infrastructure::clock::SystemClock),
        CoordinationConfig::default(),
        PlacementStrategy::Capability,
    );
    manager.initialize().await;
    manager.scheduler.register_agent("worker", caps(), 0, 4).await;

    let compile = manager
        .scheduler
        .submit_task("compile", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();
    let deploy = manager
        .scheduler
        .submit_task("deploy", TaskPriority::Medium, vec![compile], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();

    assert_eq!(manager.scheduler.task_status(deploy).await, Some(TaskStatus::Pending));
    assert_eq!(
        manager.scheduler.assign_task(deploy).await,
        Err(abathur::CoordinationError::DependencyUnmet { task: deploy, dependency: compile })
    );

    manager.scheduler.assign_task(compile).await.unwrap();
    manager.scheduler.dispatch(compile).await.unwrap();

    assert_eq!(manager.scheduler.task_status(compile).await, Some(TaskStatus::Completed));
    assert!(manager.scheduler.assign_task(deploy).await.unwrap().is_some());
}

#[tokio::test]
async fn a_terminally_failed_task_cancels_its_whole_downstream_subgraph() {
    let manager = CoordinationManager::new(
        Arc::new(ConditionalExecutor { fail_task_type: "compile" }),
        Arc::new(NullAgentTransport) as Arc<dyn AgentTransport>,
        Arc::new(abathur::infrastructure::clock::SystemClock),
        CoordinationConfig {
            max_retries: 0,
            ..Default::default()
        },
        PlacementStrategy::Capability,
    );
    manager.initialize().await;
    manager.scheduler.register_agent("worker", caps(), 0, 4).await;

    let compile = manager
        .scheduler
        .submit_task("compile", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();
    let test = manager
        .scheduler
        .submit_task("test", TaskPriority::Medium, vec![compile], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();
    let deploy = manager
        .scheduler
        .submit_task("deploy", TaskPriority::Medium, vec![test], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();

    manager.scheduler.assign_task(compile).await.unwrap();
    manager.scheduler.dispatch(compile).await.unwrap();

    assert_eq!(manager.scheduler.task_status(compile).await, Some(TaskStatus::Failed));
    assert_eq!(manager.scheduler.task_status(test).await, Some(TaskStatus::Cancelled));
    assert_eq!(manager.scheduler.task_status(deploy).await, Some(TaskStatus::Cancelled));
}

/// A resource held past `2 × resourceTimeout` is force-released by the
/// maintenance sweep, unblocking a waiter without anyone calling `release`.
#[tokio::test]
async fn stale_resource_lock_is_force_released_by_maintenance_sweep() {
    let clock = Arc::new(abathur::infrastructure::clock::FakeClock::new(std::time::SystemTime::UNIX_EPOCH));
    let config = CoordinationConfig {
        resource_timeout_ms: 10,
        ..Default::default()
    };
    let manager = CoordinationManager::new(
        Arc::new(ConditionalExecutor { fail_task_type: "__never__" }),
        Arc::new(NullAgentTransport) as Arc<dyn AgentTransport>,
        clock.clone(),
        config,
        PlacementStrategy::Capability,
    );

    let holder = abathur::AgentId::new();
    let resource = abathur::ResourceId::new();
    manager.resource_manager.acquire(resource, holder, 0, "lock").await.unwrap();

    clock.advance(std::time::Duration::from_millis(25));
    manager.resource_manager.run_maintenance_sweep().await;

    assert!(
        manager.resource_manager.allocations().await.get(&resource).is_none(),
        "lock held past 2x timeout should have been force-released"
    );
}

/// A deadlock formed by two agents each waiting on a resource the other
/// holds is both detected and resolved by releasing one victim's locks.
#[tokio::test]
async fn mutual_resource_wait_is_detected_and_resolved() {
    let manager = CoordinationManager::new(
        Arc::new(ConditionalExecutor { fail_task_type: "__never__" }),
        Arc::new(NullAgentTransport) as Arc<dyn AgentTransport>,
        Arc::new(abathur::infrastructure::clock::SystemClock),
        CoordinationConfig {
            resource_timeout_ms: 60_000,
            ..Default::default()
        },
        PlacementStrategy::Capability,
    );

    let agent_a = abathur::AgentId::new();
    let agent_b = abathur::AgentId::new();
    let resource_x = abathur::ResourceId::new();
    let resource_y = abathur::ResourceId::new();

    manager.resource_manager.acquire(resource_x, agent_a, 0, "lock").await.unwrap();
    manager.resource_manager.acquire(resource_y, agent_b, 0, "lock").await.unwrap();

    let manager = Arc::new(manager);
    let m1 = manager.clone();
    let handle_a = tokio::spawn(async move { m1.resource_manager.acquire(resource_y, agent_a, 0, "lock").await });
    let m2 = manager.clone();
    let handle_b = tokio::spawn(async move { m2.resource_manager.acquire(resource_x, agent_b, 0, "lock").await });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let deadlock = manager.detect_deadlock().await;
    assert!(deadlock.is_some(), "expected a wait-for cycle between agent_a and agent_b");
    let (cycle, _resources) = deadlock.unwrap();
    assert!(cycle.contains(&agent_a) && cycle.contains(&agent_b));

    manager.resolve_deadlock(cycle[0]).await.unwrap();

    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), handle_a).await;
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), handle_b).await;
}

/// A retryable failure stays under `max_retries` attempts before
/// reaching the terminal `failed` status, not before.
#[tokio::test]
async fn retryable_failure_reaches_terminal_status_only_after_max_retries() {
    struct CountingExecutor {
        fail_until: std::sync::atomic::AtomicU32,
    }
    #[async_trait]
    impl TaskExecutor for CountingExecutor {
        async fn execute(
            &self,
            task_id: abathur::TaskId,
            _task_type: &str,
            _payload: serde_json::Value,
        ) -> CoordinationResult<serde_json::Value> {
            let remaining = self.fail_until.fetch_sub(1, Ordering::SeqCst);
            if remaining > 0 {
                Err(abathur::CoordinationError::TaskFailed {
                    task: task_id,
                    message: "transient".into(),
                    retryable: true,
                })
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        }
    }
    let manager = CoordinationManager::new(
        Arc::new(CountingExecutor { fail_until: std::sync::atomic::AtomicU32::new(2) }),
        Arc::new(NullAgentTransport) as Arc<dyn AgentTransport>,
        Arc::new(abathur::infrastructure::clock::SystemClock),
        CoordinationConfig {
            max_retries: 5,
            retry_delay_ms: 1,
            ..Default::default()
        },
        PlacementStrategy::Capability,
    );
    manager.initialize().await;
    manager.scheduler.register_agent("worker", caps(), 0, 4).await;

    let task_id = manager
        .scheduler
        .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
        .await
        .unwrap();

    for _ in 0..3 {
        manager.scheduler.assign_task(task_id).await.unwrap();
        manager.scheduler.dispatch(task_id).await.unwrap();
    }

    assert_eq!(manager.scheduler.task_status(task_id).await, Some(TaskStatus::Completed));
}
