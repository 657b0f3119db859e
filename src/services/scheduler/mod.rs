//! C6: the task scheduler. Owns task state from submission to a
//! terminal status (§3), consults the dependency graph for readiness,
//! a placement strategy (optionally overridden by the work-stealing
//! scorer) for agent choice, and the circuit breaker before dispatch.

pub mod strategies;
pub mod work_stealing;

pub use strategies::PlacementStrategy;

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::ids::{AgentId, TaskId};
use crate::domain::models::agent::AgentProfile;
use crate::domain::models::scheduling_context::{SchedulingContext, WorkloadSnapshot};
use crate::domain::models::task::{Task, TaskPriority, TaskStatus};
use crate::domain::ports::{Clock, TaskExecutor};
use crate::services::circuit_breaker::{CircuitAdmission, CircuitBreakerService};
use crate::services::config::CoordinationConfig;
use crate::services::dependency_graph::DependencyGraph;
use crate::services::event_bus::{CoordinationEvent, EventBus, EventKind};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{info, instrument, warn};

use self::work_stealing::{decide_steal, StealRequest};

/// Circuit breaker target name for calls dispatched to `agent`, matching
/// the `assign-<agentId>` naming the deadlock/termination paths log
/// under.
fn circuit_target(agent: AgentId) -> String {
    format!("assign-{agent}")
}

pub struct TaskScheduler {
    tasks: RwLock<HashMap<TaskId, Task>>,
    agents: RwLock<HashMap<AgentId, AgentProfile>>,
    context: RwLock<SchedulingContext>,
    dependency_graph: Arc<DependencyGraph>,
    event_bus: Arc<EventBus>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn Clock>,
    config: CoordinationConfig,
    strategy: PlacementStrategy,
    circuit_breaker: Arc<CircuitBreakerService>,
    registration_sequence: AtomicU64,
    work_stealing_shutdown: Notify,
}

impl TaskScheduler {
    #[must_use]
    pub fn new(
        dependency_graph: Arc<DependencyGraph>,
        event_bus: Arc<EventBus>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn Clock>,
        config: CoordinationConfig,
        strategy: PlacementStrategy,
        circuit_breaker: Arc<CircuitBreakerService>,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            agents: RwLock::new(HashMap::new()),
            context: RwLock::new(SchedulingContext::default()),
            dependency_graph,
            event_bus,
            executor,
            clock,
            config,
            strategy,
            circuit_breaker,
            registration_sequence: AtomicU64::new(0),
            work_stealing_shutdown: Notify::new(),
        }
    }

    pub async fn register_agent(
        &self,
        name: impl Into<String>,
        capabilities: HashSet<String>,
        priority: i32,
        max_concurrent_tasks: usize,
    ) -> AgentId {
        let sequence = self.registration_sequence.fetch_add(1, Ordering::SeqCst);
        let profile = AgentProfile::new(name, capabilities, priority, max_concurrent_tasks, sequence);
        let agent_id = profile.id;
        self.agents.write().await.insert(agent_id, profile);
        self.event_bus
            .emit(CoordinationEvent::new(EventKind::AgentSpawned, serde_json::Value::Null).with_agent(agent_id))
            .await;
        agent_id
    }

    #[instrument(skip(self, payload))]
    pub async fn submit_task(
        &self,
        task_type: impl Into<String>,
        priority: TaskPriority,
        dependencies: Vec<TaskId>,
        required_capabilities: HashSet<String>,
        payload: serde_json::Value,
    ) -> CoordinationResult<TaskId> {
        let task = Task::new(task_type, priority, dependencies.clone(), required_capabilities, payload, self.clock.now());
        let task_id = task.id;

        if !self.dependency_graph.add(task_id, dependencies).await {
            return Err(CoordinationError::DependencyCycle(task_id));
        }

        let mut task = task;
        task.status = if self.dependency_graph.is_ready(task_id).await {
            TaskStatus::Queued
        } else {
            TaskStatus::Pending
        };
        self.tasks.write().await.insert(task_id, task);

        self.event_bus
            .emit(CoordinationEvent::new(EventKind::TaskCreated, serde_json::Value::Null).with_task(task_id))
            .await;
        Ok(task_id)
    }

    /// Picks an agent for a `queued` task and moves it to `assigned`.
    /// Rejects with `DependencyUnmet` if `task_id` still has an
    /// incomplete prerequisite (§4.6, scenario 3). Returns `Ok(None)` if
    /// the task isn't in a startable status, or no eligible agent exists
    /// yet — both legitimate states to retry later from, not errors.
    #[instrument(skip(self))]
    pub async fn assign_task(&self, task_id: TaskId) -> CoordinationResult<Option<AgentId>> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&task_id) else {
            return Err(CoordinationError::TaskNotFound(task_id));
        };
        if task.status != TaskStatus::Queued && task.status != TaskStatus::Pending {
            return Ok(None);
        }
        if let Some(dependency) = self.dependency_graph.first_unmet_dependency(task_id).await {
            return Err(CoordinationError::DependencyUnmet { task: task_id, dependency });
        }

        let agents = self.agents.read().await;
        let context = self.context.read().await;
        let candidates: Vec<(AgentId, usize, i32, bool, Option<WorkloadSnapshot>)> = agents
            .values()
            .filter(|a| a.is_eligible_for(task))
            .map(|a| {
                (
                    a.id,
                    context.load_of(a.id),
                    a.priority,
                    true,
                    context.workload_snapshots.get(&a.id).copied(),
                )
            })
            .collect();
        let scored = work_stealing::best_scored_candidate(&candidates);
        let Some(agent_id) = scored.or_else(|| self.strategy.select_agent(task, &agents, &context)) else {
            return Ok(None);
        };
        drop(context);
        drop(agents);

        task.assigned_agent = Some(agent_id);
        task.status = TaskStatus::Assigned;
        let mut context = self.context.write().await;
        *context.current_load.entry(agent_id).or_insert(0) += 1;
        drop(context);

        self.event_bus
            .emit(CoordinationEvent::new(EventKind::TaskStarted, serde_json::Value::Null).with_task(task_id).with_agent(agent_id))
            .await;
        Ok(Some(agent_id))
    }

    /// Runs an assigned task's executor and records the outcome. On
    /// failure, retries with exponential back-off up to `max_retries`
    /// before reaching terminal `failed`; descendants of a terminally
    /// failed task are cancelled. Consults the circuit breaker for the
    /// assigned agent immediately before the call, and reports the
    /// outcome back to it afterwards, so a string of failed dispatches
    /// to the same agent trips it open for everyone else's tasks too.
    /// The executor call itself is capped at `resourceTimeout` (§4.6);
    /// an expiry is folded into the same retry/back-off path as any
    /// other execution failure, reported as `TaskTimeout`.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, task_id: TaskId) -> CoordinationResult<()> {
        let agent_id = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(&task_id).ok_or(CoordinationError::TaskNotFound(task_id))?;
            task.assigned_agent
        };
        if let Some(agent_id) = agent_id {
            let target = circuit_target(agent_id);
            match self.circuit_breaker.allows(&target).await {
                CircuitAdmission::Admitted => {}
                CircuitAdmission::Open => return Err(CoordinationError::CircuitOpen(target)),
                CircuitAdmission::HalfOpenSaturated => {
                    return Err(CoordinationError::CircuitHalfOpenSaturated(target));
                }
            }
        }

        let (task_type, payload, agent_id) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinationError::TaskNotFound(task_id))?;
            if task.status != TaskStatus::Assigned {
                return Err(CoordinationError::Internal(format!(
                    "cannot dispatch task {task_id} in status other than assigned"
                )));
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(self.clock.now());
            task.attempt += 1;
            (task.task_type.clone(), task.payload.clone(), task.assigned_agent)
        };

        let outcome = match tokio::time::timeout(
            self.config.resource_timeout(),
            self.executor.execute(task_id, &task_type, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(CoordinationError::TaskTimeout(task_id)),
        };
        if let Some(agent_id) = agent_id {
            let target = circuit_target(agent_id);
            match &outcome {
                Ok(_) => self.circuit_breaker.record_success(&target).await,
                Err(_) => self.circuit_breaker.record_failure(&target).await,
            }
        }

        match outcome {
            Ok(output) => self.complete_task(task_id, output).await,
            Err(err) => {
                let retryable = err.is_retryable();
                self.fail_task(task_id, err.to_string(), retryable, agent_id).await
            }
        }
    }

    #[instrument(skip(self, output))]
    pub async fn complete_task(&self, task_id: TaskId, output: serde_json::Value) -> CoordinationResult<()> {
        let (agent_id, task_type, duration_ms) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinationError::TaskNotFound(task_id))?;
            if task.status.is_terminal() {
                return Err(CoordinationError::TaskAlreadyTerminal(task_id));
            }
            let completed_at = self.clock.now();
            task.status = TaskStatus::Completed;
            task.completed_at = Some(completed_at);
            task.output = Some(output);
            let duration_ms = task
                .started_at
                .and_then(|started| completed_at.duration_since(started).ok())
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            (task.assigned_agent, task.task_type.clone(), duration_ms)
        };

        let newly_ready = self.dependency_graph.mark_completed(task_id).await;
        if let Some(agent_id) = agent_id {
            let mut context = self.context.write().await;
            if let Some(load) = context.current_load.get_mut(&agent_id) {
                *load = load.saturating_sub(1);
            }
            context.type_stats.entry(task_type).or_default().record(agent_id, duration_ms, true);
        }
        self.mark_ready(&newly_ready).await;

        let mut event = CoordinationEvent::new(EventKind::TaskCompleted, serde_json::Value::Null).with_task(task_id);
        if let Some(agent_id) = agent_id {
            event = event.with_agent(agent_id);
        }
        self.event_bus.emit(event).await;
        Ok(())
    }

    /// Flips each id's status `Pending` -> `Queued` and emits
    /// `TaskCreated` so the caller's dispatch loop picks it up, the same
    /// readiness signal a fresh submission produces.
    async fn mark_ready(&self, ids: &[TaskId]) {
        for &id in ids {
            {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                if task.status != TaskStatus::Pending {
                    continue;
                }
                task.status = TaskStatus::Queued;
            }
            self.event_bus
                .emit(CoordinationEvent::new(EventKind::TaskCreated, serde_json::Value::Null).with_task(id))
                .await;
        }
    }

    async fn fail_task(
        &self,
        task_id: TaskId,
        message: String,
        retryable: bool,
        agent_id: Option<AgentId>,
    ) -> CoordinationResult<()> {
        let (attempt, task_type, duration_ms) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(CoordinationError::TaskNotFound(task_id))?;
            let completed_at = self.clock.now();
            let duration_ms = task
                .started_at
                .and_then(|started| completed_at.duration_since(started).ok())
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            let attempt = if retryable && task.attempt < self.config.max_retries {
                task.status = TaskStatus::Assigned;
                task.error = Some(message.clone());
                Some(task.attempt)
            } else {
                task.status = TaskStatus::Failed;
                task.error = Some(message.clone());
                task.completed_at = Some(completed_at);
                None
            };
            (attempt, task.task_type.clone(), duration_ms)
        };

        if let Some(agent_id) = agent_id {
            let mut context = self.context.write().await;
            if let Some(load) = context.current_load.get_mut(&agent_id) {
                *load = load.saturating_sub(1);
            }
            context.type_stats.entry(task_type).or_default().record(agent_id, duration_ms, false);
        }

        if let Some(attempt) = attempt {
            let delay = self.config.backoff_for_attempt(attempt);
            tokio::time::sleep(delay).await;
            let mut event = CoordinationEvent::new(EventKind::TaskFailed, serde_json::json!({"retrying": true})).with_task(task_id);
            if let Some(agent_id) = agent_id {
                event = event.with_agent(agent_id);
            }
            self.event_bus.emit(event).await;
            return Ok(());
        }

        let descendants = self.dependency_graph.mark_failed(task_id).await;
        let mut event = CoordinationEvent::new(EventKind::TaskFailed, serde_json::json!({"terminal": true})).with_task(task_id);
        if let Some(agent_id) = agent_id {
            event = event.with_agent(agent_id);
        }
        self.event_bus.emit(event).await;
        self.cancel_descendants(&descendants).await;
        Ok(())
    }

    /// Cancels every id already known (from the dependency graph) to be
    /// unreachable, skipping any already in a terminal status.
    async fn cancel_descendants(&self, descendant_ids: &[TaskId]) {
        for &id in descendant_ids {
            {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                if task.status.is_terminal() {
                    continue;
                }
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(self.clock.now());
            }
            self.event_bus
                .emit(CoordinationEvent::new(EventKind::TaskCancelled, serde_json::Value::Null).with_task(id))
                .await;
        }
    }

    pub async fn cancel_task(&self, task_id: TaskId) -> CoordinationResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(CoordinationError::TaskNotFound(task_id))?;
        if task.status.is_terminal() {
            return Err(CoordinationError::TaskAlreadyTerminal(task_id));
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(self.clock.now());
        drop(tasks);

        // Cancellation is terminal-but-not-completed, the same as a
        // terminal failure from the dependency graph's point of view:
        // every direct or transitive dependent becomes unreachable too.
        let descendants = self.dependency_graph.mark_failed(task_id).await;
        self.event_bus
            .emit(CoordinationEvent::new(EventKind::TaskCancelled, serde_json::Value::Null).with_task(task_id))
            .await;
        self.cancel_descendants(&descendants).await;
        Ok(())
    }

    /// On agent termination, resets that agent's running tasks to
    /// `queued` instead of cancelling them (§9 Open Question (a)), so
    /// they become eligible for reassignment elsewhere.
    pub async fn reschedule_agent_tasks(&self, agent_id: AgentId) {
        let affected: Vec<TaskId> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .filter(|(_, t)| t.assigned_agent == Some(agent_id) && !t.status.is_terminal())
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &affected {
            let mut tasks = self.tasks.write().await;
            if let Some(task) = tasks.get_mut(id) {
                task.status = TaskStatus::Queued;
                task.assigned_agent = None;
            }
            drop(tasks);
            self.event_bus
                .emit(CoordinationEvent::new(EventKind::TaskCreated, serde_json::Value::Null).with_task(*id))
                .await;
        }
        if !affected.is_empty() {
            warn!(?agent_id, count = affected.len(), "rescheduled tasks from terminated agent");
        }
    }

    pub async fn task_status(&self, task_id: TaskId) -> Option<TaskStatus> {
        self.tasks.read().await.get(&task_id).map(|t| t.status)
    }

    pub async fn task(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Records a point-in-time resource reading for `agent_id`, feeding
    /// both the work-stealing scorer's pre-filter in `assign_task` and
    /// the periodic steal decision.
    pub async fn record_workload_snapshot(&self, agent_id: AgentId, snapshot: WorkloadSnapshot) {
        self.context.write().await.workload_snapshots.insert(agent_id, snapshot);
    }

    /// Reassigns up to `count` not-yet-running tasks from `source` to
    /// `target`. Returns the number actually moved, which can be less
    /// than `count` if `source` doesn't have that many movable tasks.
    #[instrument(skip(self))]
    pub async fn steal_tasks(&self, source: AgentId, target: AgentId, count: usize) -> usize {
        let candidates: Vec<TaskId> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .filter(|(_, t)| t.assigned_agent == Some(source) && t.status == TaskStatus::Assigned)
                .take(count)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut moved = 0;
        for id in candidates {
            {
                let mut tasks = self.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                task.assigned_agent = Some(target);
            }
            {
                let mut context = self.context.write().await;
                if let Some(load) = context.current_load.get_mut(&source) {
                    *load = load.saturating_sub(1);
                }
                *context.current_load.entry(target).or_insert(0) += 1;
            }
            self.event_bus
                .emit(
                    CoordinationEvent::new(EventKind::TaskStarted, serde_json::Value::Null)
                        .with_task(id)
                        .with_agent(target),
                )
                .await;
            moved += 1;
        }
        if moved > 0 {
            info!(?source, ?target, moved, "stole tasks to rebalance load");
        }
        moved
    }

    /// One sampling round: finds the busiest and idlest registered
    /// agents by current load, and steals from the former to the latter
    /// if the imbalance reaches `workStealing.stealThreshold`.
    async fn run_work_stealing_tick(&self) {
        let agent_ids: Vec<AgentId> = self.agents.read().await.keys().copied().collect();
        if agent_ids.len() < 2 {
            return;
        }
        let context = self.context.read().await;
        let loads: Vec<(AgentId, usize)> = agent_ids.iter().map(|&id| (id, context.load_of(id))).collect();
        drop(context);

        let Some(&busiest) = loads.iter().max_by_key(|(_, load)| *load) else {
            return;
        };
        let Some(&idlest) = loads.iter().min_by_key(|(_, load)| *load) else {
            return;
        };
        if busiest.0 == idlest.0 {
            return;
        }

        let Some(StealRequest { source, target, count }) = decide_steal(
            busiest,
            idlest,
            self.config.work_stealing.steal_threshold,
            self.config.work_stealing.max_steal_batch,
        ) else {
            return;
        };

        self.event_bus
            .emit(CoordinationEvent::new(
                EventKind::WorkStealingRequest,
                serde_json::json!({"source": source, "target": target, "count": count}),
            ))
            .await;
        self.steal_tasks(source, target, count).await;
    }

    /// Runs `run_work_stealing_tick` on `workStealing.stealInterval`
    /// until `shutdown_work_stealing` is called. A no-op loop (just
    /// waiting on shutdown) when work stealing is disabled, so callers
    /// don't need to branch on the config before spawning it.
    pub async fn run_work_stealing_loop(self: Arc<Self>) {
        if !self.config.work_stealing.enabled {
            self.work_stealing_shutdown.notified().await;
            return;
        }
        let mut interval = tokio::time::interval(self.config.work_stealing.steal_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_work_stealing_tick().await,
                () = self.work_stealing_shutdown.notified() => {
                    info!("work-stealing loop shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown_work_stealing(&self) {
        self.work_stealing_shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CoordinationError;
    use crate::infrastructure::clock::SystemClock;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct AlwaysFailExecutor {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskExecutor for AlwaysFailExecutor {
        async fn execute(
            &self,
            _task_id: TaskId,
            _task_type: &str,
            _payload: serde_json::Value,
        ) -> CoordinationResult<serde_json::Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CoordinationError::TaskFailed {
                task: TaskId::new(),
                message: "boom".into(),
                retryable: true,
            })
        }
    }

    struct AlwaysSucceedExecutor;

    #[async_trait]
    impl TaskExecutor for AlwaysSucceedExecutor {
        async fn execute(
            &self,
            _task_id: TaskId,
            _task_type: &str,
            _payload: serde_json::Value,
        ) -> CoordinationResult<serde_json::Value> {
            Ok(serde_json::json!({"done": true}))
        }
    }

    fn scheduler(executor: Arc<dyn TaskExecutor>, max_retries: u32) -> TaskScheduler {
        let config = CoordinationConfig {
            max_retries,
            retry_delay_ms: 1,
            ..Default::default()
        };
        TaskScheduler::new(
            Arc::new(DependencyGraph::new()),
            Arc::new(EventBus::new()),
            executor,
            Arc::new(SystemClock),
            config.clone(),
            PlacementStrategy::Capability,
            Arc::new(CircuitBreakerService::new(config.circuit_breaker)),
        )
    }

    #[tokio::test]
    async fn retry_then_terminal_cancels_dependents() {
        let scheduler = scheduler(Arc::new(AlwaysFailExecutor { calls: AtomicU32::new(0) }), 2);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        scheduler.register_agent("worker", caps, 0, 4).await;

        let task_id = scheduler
            .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        let dependent_id = scheduler
            .submit_task("deploy", TaskPriority::Medium, vec![task_id], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();

        for _ in 0..3 {
            scheduler.assign_task(task_id).await.unwrap();
            let _ = scheduler.dispatch(task_id).await;
        }

        assert_eq!(scheduler.task_status(task_id).await, Some(TaskStatus::Failed));
        assert_eq!(scheduler.task_status(dependent_id).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn open_circuit_blocks_dispatch_without_consuming_a_retry() {
        let scheduler = scheduler(Arc::new(AlwaysSucceedExecutor), 3);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        let agent = scheduler.register_agent("worker", caps, 0, 4).await;

        let target = circuit_target(agent);
        // Default failure_threshold is 5; trip it directly rather than
        // failing five real dispatches.
        for _ in 0..5 {
            scheduler.circuit_breaker.record_failure(&target).await;
        }

        let task_id = scheduler
            .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        scheduler.assign_task(task_id).await.unwrap();

        let result = scheduler.dispatch(task_id).await;
        assert!(matches!(result, Err(CoordinationError::CircuitOpen(_))));
        assert_eq!(scheduler.task_status(task_id).await, Some(TaskStatus::Assigned));
    }

    #[tokio::test]
    async fn dependent_task_stays_pending_until_dependency_completes() {
        let scheduler = scheduler(Arc::new(AlwaysSucceedExecutor), 3);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        scheduler.register_agent("worker", caps, 0, 4).await;

        let dep = scheduler
            .submit_task("compile", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        let dependent = scheduler
            .submit_task("deploy", TaskPriority::Medium, vec![dep], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(scheduler.task_status(dependent).await, Some(TaskStatus::Pending));
        assert_eq!(
            scheduler.assign_task(dependent).await,
            Err(CoordinationError::DependencyUnmet { task: dependent, dependency: dep })
        );

        scheduler.assign_task(dep).await.unwrap();
        scheduler.dispatch(dep).await.unwrap();

        assert!(scheduler.assign_task(dependent).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn agent_termination_reschedules_running_tasks() {
        let scheduler = scheduler(Arc::new(AlwaysSucceedExecutor), 3);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        let agent = scheduler.register_agent("worker", caps, 0, 4).await;

        let task_id = scheduler
            .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        scheduler.assign_task(task_id).await.unwrap();

        scheduler.reschedule_agent_tasks(agent).await;
        assert_eq!(scheduler.task_status(task_id).await, Some(TaskStatus::Queued));
    }

    #[tokio::test]
    async fn steal_tasks_reassigns_only_not_yet_running_tasks() {
        let scheduler = scheduler(Arc::new(AlwaysSucceedExecutor), 3);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        let busy = scheduler.register_agent("busy", caps.clone(), 0, 10).await;
        let idle = scheduler.register_agent("idle", caps, 0, 10).await;

        let assigned = scheduler
            .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        scheduler.assign_task(assigned).await.unwrap();
        // Force both tasks onto `busy` regardless of what the placement
        // strategy would have picked, to make the scenario deterministic.
        {
            let mut tasks = scheduler.tasks.write().await;
            tasks.get_mut(&assigned).unwrap().assigned_agent = Some(busy);
        }

        let moved = scheduler.steal_tasks(busy, idle, 5).await;
        assert_eq!(moved, 1);
        assert_eq!(scheduler.task(assigned).await.unwrap().assigned_agent, Some(idle));
    }

    #[tokio::test]
    async fn work_stealing_tick_moves_tasks_once_imbalance_crosses_threshold() {
        let config = CoordinationConfig {
            work_stealing: crate::services::config::WorkStealingConfig {
                enabled: true,
                steal_threshold: 2,
                max_steal_batch: 5,
                steal_interval_ms: 1,
            },
            ..Default::default()
        };
        let scheduler = TaskScheduler::new(
            Arc::new(DependencyGraph::new()),
            Arc::new(EventBus::new()),
            Arc::new(AlwaysSucceedExecutor),
            Arc::new(SystemClock),
            config.clone(),
            PlacementStrategy::Capability,
            Arc::new(CircuitBreakerService::new(config.circuit_breaker)),
        );
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        let busy = scheduler.register_agent("busy", caps.clone(), 0, 10).await;
        let idle = scheduler.register_agent("idle", caps, 0, 10).await;

        let mut assigned_ids = Vec::new();
        for _ in 0..3 {
            let id = scheduler
                .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
                .await
                .unwrap();
            {
                let mut tasks = scheduler.tasks.write().await;
                tasks.get_mut(&id).unwrap().assigned_agent = Some(busy);
                tasks.get_mut(&id).unwrap().status = TaskStatus::Assigned;
            }
            assigned_ids.push(id);
        }
        {
            let mut context = scheduler.context.write().await;
            context.current_load.insert(busy, 3);
            context.current_load.insert(idle, 0);
        }

        scheduler.run_work_stealing_tick().await;

        let moved_to_idle = assigned_ids
            .iter()
            .filter(|&&id| scheduler.task(id).await.unwrap().assigned_agent == Some(idle))
            .count();
        assert!(moved_to_idle > 0, "expected at least one task stolen onto the idle agent");
    }

    struct HangingExecutor;

    #[async_trait]
    impl TaskExecutor for HangingExecutor {
        async fn execute(
            &self,
            _task_id: TaskId,
            _task_type: &str,
            _payload: serde_json::Value,
        ) -> CoordinationResult<serde_json::Value> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn dispatch_times_out_an_executor_that_never_returns() {
        let config = CoordinationConfig {
            max_retries: 0,
            resource_timeout_ms: 5,
            ..Default::default()
        };
        let scheduler = TaskScheduler::new(
            Arc::new(DependencyGraph::new()),
            Arc::new(EventBus::new()),
            Arc::new(HangingExecutor),
            Arc::new(SystemClock),
            config.clone(),
            PlacementStrategy::Capability,
            Arc::new(CircuitBreakerService::new(config.circuit_breaker)),
        );
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        scheduler.register_agent("worker", caps, 0, 4).await;

        let task_id = scheduler
            .submit_task("build", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        scheduler.assign_task(task_id).await.unwrap();
        scheduler.dispatch(task_id).await.unwrap();

        let task = scheduler.task(task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some(CoordinationError::TaskTimeout(task_id).to_string().as_str()));
    }

    #[tokio::test]
    async fn assigning_a_task_before_its_dependency_completes_is_dependency_unmet() {
        let scheduler = scheduler(Arc::new(AlwaysSucceedExecutor), 3);
        let mut caps = HashSet::new();
        caps.insert("*".to_string());
        scheduler.register_agent("worker", caps, 0, 4).await;

        let dep = scheduler
            .submit_task("compile", TaskPriority::Medium, vec![], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();
        let dependent = scheduler
            .submit_task("deploy", TaskPriority::Medium, vec![dep], HashSet::new(), serde_json::Value::Null)
            .await
            .unwrap();

        assert_eq!(
            scheduler.assign_task(dependent).await,
            Err(CoordinationError::DependencyUnmet { task: dependent, dependency: dep })
        );
    }
}
