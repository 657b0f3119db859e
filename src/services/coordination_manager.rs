//! C7: composes C1–C6, owns the deadlock detector, agent-termination
//! fan-out, and the single maintenance loop that drives every other
//! component's periodic cleanup (§5) — one scheduling loop fanning out
//! to per-component sweeps, instead of each component owning a
//! redundant background task.

use crate::domain::errors::CoordinationResult;
use crate::domain::ids::{AgentId, ResourceId};
use crate::domain::ports::{Clock, TaskExecutor};
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::config::CoordinationConfig;
use crate::services::dependency_graph::DependencyGraph;
use crate::services::event_bus::{CoordinationEvent, EventBus, EventFilter, EventKind};
use crate::services::message_router::MessageRouter;
use crate::services::metrics_collector::MetricsCollector;
use crate::services::resource_manager::ResourceManager;
use crate::services::scheduler::{PlacementStrategy, TaskScheduler};
use crate::services::swarm_monitor::SwarmMonitor;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// Owns lifecycle (`initialize`/`shutdown`) and composes every other
/// component. Lock ordering across components, when an operation must
/// touch more than one, is fixed: tasks -> dependency-graph ->
/// resource-manager -> message-router -> metrics, matching §5.
pub struct CoordinationManager {
    pub scheduler: Arc<TaskScheduler>,
    pub dependency_graph: Arc<DependencyGraph>,
    pub resource_manager: Arc<ResourceManager>,
    pub message_router: Arc<MessageRouter>,
    pub circuit_breaker: Arc<CircuitBreakerService>,
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<MetricsCollector>,
    pub swarm_monitor: Arc<SwarmMonitor>,
    config: CoordinationConfig,
    initialized: AtomicBool,
    shutdown_requested: AtomicBool,
    shutdown_notify: Arc<Notify>,
}

impl CoordinationManager {
    #[must_use]
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        transport: Arc<dyn crate::domain::ports::AgentTransport>,
        clock: Arc<dyn Clock>,
        config: CoordinationConfig,
        strategy: PlacementStrategy,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new());
        let dependency_graph = Arc::new(DependencyGraph::new());
        let resource_manager = Arc::new(ResourceManager::new(clock.clone(), config.resource_timeout()));
        let message_router = Arc::new(MessageRouter::new(transport, clock.clone(), config.message_timeout()));
        let circuit_breaker = Arc::new(CircuitBreakerService::new(config.circuit_breaker.clone()));
        let metrics = Arc::new(MetricsCollector::new());
        let swarm_monitor = Arc::new(SwarmMonitor::new(clock.clone(), config.stall_timeout()));
        let scheduler = Arc::new(TaskScheduler::new(
            dependency_graph.clone(),
            event_bus.clone(),
            executor,
            clock,
            config.clone(),
            strategy,
            circuit_breaker.clone(),
        ));

        Self {
            scheduler,
            dependency_graph,
            resource_manager,
            message_router,
            circuit_breaker,
            event_bus,
            metrics,
            swarm_monitor,
            config,
            initialized: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Subscribes C8 and C9 on the event bus and marks the manager
    /// ready to accept work. C8/C9 are passive observers of C1 rather
    /// than components the scheduler or resource manager call into
    /// directly, so adding or removing either never touches the
    /// components it observes.
    pub async fn initialize(&self) {
        let metrics = self.metrics.clone();
        let metrics_handler: crate::services::event_bus::EventHandler = Arc::new(move |event| {
            let metrics = metrics.clone();
            let counter_name = metric_name_for(event.kind);
            tokio::spawn(async move {
                metrics.increment(counter_name).await;
            });
        });
        self.event_bus.subscribe(EventFilter::any(), metrics_handler).await;

        let monitor = self.swarm_monitor.clone();
        let monitor_handler: crate::services::event_bus::EventHandler = Arc::new(move |event| {
            let monitor = monitor.clone();
            let kind = event.kind;
            let agent_id = event.correlation.agent_id;
            tokio::spawn(async move {
                match (kind, agent_id) {
                    (EventKind::AgentSpawned, Some(agent)) => monitor.register_agent(agent).await,
                    (EventKind::AgentTerminated, Some(agent)) => monitor.unregister_agent(agent).await,
                    (EventKind::AgentIdle, Some(agent)) => monitor.record_agent_idle(agent).await,
                    (EventKind::TaskStarted, Some(agent)) => monitor.record_task_started(agent).await,
                    (EventKind::TaskCompleted, Some(agent)) => monitor.record_task_completed(agent, 0.0).await,
                    (EventKind::TaskFailed, Some(agent)) => monitor.record_task_failed(agent, 0.0).await,
                    _ => {}
                }
            });
        });
        self.event_bus.subscribe(EventFilter::any(), monitor_handler).await;

        tokio::spawn(self.scheduler.clone().run_work_stealing_loop());

        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Installs an outbound event-bus adapter, replacing the default
    /// no-op sink. Safe to call before or after `initialize`.
    pub async fn set_event_sink(&self, sink: Arc<dyn crate::domain::ports::EventSink>) {
        self.event_bus.set_sink(sink).await;
    }

    fn require_initialized(&self) -> CoordinationResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(crate::domain::errors::CoordinationError::NotInitialized);
        }
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return Err(crate::domain::errors::CoordinationError::ShutdownInProgress);
        }
        Ok(())
    }

    /// Called when an agent leaves the swarm. Releases its resources
    /// first (they're real artifacts of a dead process either way),
    /// then reschedules its in-flight tasks rather than cancelling them
    /// (§9 Open Question (a)).
    #[instrument(skip(self))]
    pub async fn terminate_agent(&self, agent_id: AgentId) -> CoordinationResult<()> {
        self.require_initialized()?;
        self.resource_manager.release_all_for_agent(agent_id).await;
        self.scheduler.reschedule_agent_tasks(agent_id).await;
        self.event_bus
            .emit(CoordinationEvent::new(EventKind::AgentTerminated, serde_json::Value::Null).with_agent(agent_id))
            .await;
        Ok(())
    }

    /// Builds a wait-for graph from the resource manager's current
    /// allocations and wait queues (an edge `a -> b` iff `a` waits on a
    /// resource `b` holds) and searches it for a cycle via DFS with a
    /// recursion stack, the same shape as the dependency graph's own
    /// cycle check.
    #[instrument(skip(self))]
    pub async fn detect_deadlock(&self) -> Option<(Vec<AgentId>, Vec<ResourceId>)> {
        if !self.config.deadlock_detection {
            return None;
        }
        let allocations = self.resource_manager.allocations().await;
        let waiting = self.resource_manager.waiting_requests().await;

        let mut wait_for: HashMap<AgentId, Vec<AgentId>> = HashMap::new();
        let mut resource_by_edge: HashMap<(AgentId, AgentId), ResourceId> = HashMap::new();
        for (resource_id, waiters) in &waiting {
            let Some(&holder) = allocations.get(resource_id) else {
                continue;
            };
            for &waiter in waiters {
                if waiter == holder {
                    continue;
                }
                wait_for.entry(waiter).or_default().push(holder);
                resource_by_edge.insert((waiter, holder), *resource_id);
            }
        }

        for &start in wait_for.keys() {
            if let Some(cycle) = find_cycle(&wait_for, start) {
                let resources = cycle
                    .windows(2)
                    .filter_map(|pair| resource_by_edge.get(&(pair[0], pair[1])).copied())
                    .collect();
                warn!(?cycle, "deadlock detected");
                self.event_bus
                    .emit(CoordinationEvent::new(
                        EventKind::DeadlockDetected,
                        serde_json::json!({"agents": cycle}),
                    ))
                    .await;
                return Some((cycle, resources));
            }
        }
        None
    }

    /// Breaks a detected deadlock by releasing every resource the
    /// chosen victim holds and rescheduling its tasks, the same
    /// recovery path as a normal agent termination.
    pub async fn resolve_deadlock(&self, victim: AgentId) -> CoordinationResult<()> {
        self.resource_manager.release_all_for_agent(victim).await;
        self.scheduler.reschedule_agent_tasks(victim).await;
        Ok(())
    }

    /// Drives every component's periodic cleanup sweep from a single
    /// tick, per §5, instead of each owning its own background task.
    pub async fn run_maintenance_tick(&self) {
        self.resource_manager.run_maintenance_sweep().await;
        self.message_router.run_maintenance_sweep().await;
        if let Some((agents, resources)) = self.detect_deadlock().await {
            if let Some(&victim) = agents.first() {
                warn!(?victim, ?resources, "resolving deadlock by releasing victim's resources");
                let _ = self.resolve_deadlock(victim).await;
            }
        }

        for alert in self.swarm_monitor.sweep_stalls().await {
            self.emit_alert(alert).await;
        }
        let usage = self.swarm_monitor.sample_system().await;
        self.metrics.set_gauge("swarm.cpu_percent", usage.cpu_percent).await;
        self.metrics.set_gauge("swarm.mem_percent", usage.mem_percent).await;
        for alert in crate::services::swarm_monitor::SwarmMonitor::threshold_alerts(
            usage,
            self.config.resource_alert_threshold_percent,
        ) {
            self.emit_alert(alert).await;
        }
    }

    async fn emit_alert(&self, alert: crate::services::swarm_monitor::Alert) {
        warn!(?alert, "swarm monitor alert");
        let mut event = CoordinationEvent::new(
            EventKind::SystemError,
            serde_json::json!({"severity": format!("{:?}", alert.severity), "message": alert.message}),
        );
        if let Some(agent_id) = alert.agent_id {
            event = event.with_agent(agent_id);
        }
        self.event_bus.emit(event).await;
    }

    /// Runs `run_maintenance_tick` on `config.maintenance_interval`
    /// until `shutdown` is called.
    pub async fn run_maintenance_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.maintenance_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => self.run_maintenance_tick().await,
                () = self.shutdown_notify.notified() => {
                    info!("maintenance loop shutting down");
                    break;
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.message_router.shutdown().await;
        self.scheduler.shutdown_work_stealing();
        self.shutdown_notify.notify_waiters();
    }
}

/// Stable counter name per event kind, used only by the metrics
/// subscriber — kept separate from `Debug`/`Display` so renaming an
/// `EventKind` variant doesn't silently rename a published metric.
fn metric_name_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::TaskCreated => "events.task_created",
        EventKind::TaskStarted => "events.task_started",
        EventKind::TaskCompleted => "events.task_completed",
        EventKind::TaskFailed => "events.task_failed",
        EventKind::TaskCancelled => "events.task_cancelled",
        EventKind::AgentSpawned => "events.agent_spawned",
        EventKind::AgentTerminated => "events.agent_terminated",
        EventKind::AgentIdle => "events.agent_idle",
        EventKind::AgentActive => "events.agent_active",
        EventKind::ResourceAcquired => "events.resource_acquired",
        EventKind::ResourceReleased => "events.resource_released",
        EventKind::DeadlockDetected => "events.deadlock_detected",
        EventKind::MessageSent => "events.message_sent",
        EventKind::MessageReceived => "events.message_received",
        EventKind::ConflictRaised => "events.conflict_raised",
        EventKind::ConflictResolved => "events.conflict_resolved",
        EventKind::CircuitStateChange => "events.circuit_state_change",
        EventKind::WorkStealingRequest => "events.work_stealing_request",
        EventKind::SystemError => "events.system_error",
    }
}

/// DFS with an explicit recursion stack; returns the cycle (inclusive
/// of the repeated node at both ends) if one is reachable from `start`.
fn find_cycle(graph: &HashMap<AgentId, Vec<AgentId>>, start: AgentId) -> Option<Vec<AgentId>> {
    fn visit(
        graph: &HashMap<AgentId, Vec<AgentId>>,
        node: AgentId,
        visited: &mut HashSet<AgentId>,
        path: &mut Vec<AgentId>,
    ) -> Option<Vec<AgentId>> {
        if let Some(pos) = path.iter().position(|&n| n == node) {
            return Some(path[pos..].to_vec());
        }
        if visited.contains(&node) {
            return None;
        }
        visited.insert(node);
        path.push(node);
        if let Some(neighbors) = graph.get(&node) {
            for &next in neighbors {
                if let Some(cycle) = visit(graph, next, visited, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    let mut path = Vec::new();
    visit(graph, start, &mut visited, &mut path)
}
