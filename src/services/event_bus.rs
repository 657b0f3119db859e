//! C1: typed publish/subscribe hub for coordination lifecycle events.
//!
//! Subscriptions are typed values with opaque cancellation handles
//! (`SubscriptionId`), not string keys — a subscriber registers an
//! `EventFilter` alongside its handler so the bus can skip non-matching
//! handlers cheaply. Handler panics are caught per-subscriber and
//! logged rather than propagated, so one broken handler never blocks
//! delivery to the rest of the registry.

use crate::domain::ids::{AgentId, MessageId, ResourceId, TaskId};
use crate::domain::ports::{EventSink, NullEventSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

/// Opaque handle returned by `subscribe`, used only to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// The event kinds the core can emit (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    AgentSpawned,
    AgentTerminated,
    AgentIdle,
    AgentActive,
    ResourceAcquired,
    ResourceReleased,
    DeadlockDetected,
    MessageSent,
    MessageReceived,
    ConflictRaised,
    ConflictResolved,
    CircuitStateChange,
    WorkStealingRequest,
    SystemError,
}

impl EventKind {
    /// Stable kebab-case name forwarded to an installed [`EventSink`],
    /// matching the event-kind vocabulary external adapters subscribe to.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskCreated => "task-created",
            Self::TaskStarted => "task-started",
            Self::TaskCompleted => "task-completed",
            Self::TaskFailed => "task-failed",
            Self::TaskCancelled => "task-cancelled",
            Self::AgentSpawned => "agent-spawned",
            Self::AgentTerminated => "agent-terminated",
            Self::AgentIdle => "agent-idle",
            Self::AgentActive => "agent-active",
            Self::ResourceAcquired => "resource-acquired",
            Self::ResourceReleased => "resource-released",
            Self::DeadlockDetected => "deadlock-detected",
            Self::MessageSent => "message-sent",
            Self::MessageReceived => "message-received",
            Self::ConflictRaised => "conflict-raised",
            Self::ConflictResolved => "conflict-resolved",
            Self::CircuitStateChange => "circuit-state-change",
            Self::WorkStealingRequest => "work-stealing-request",
            Self::SystemError => "system-error",
        }
    }
}

/// Correlates an event to the entities it concerns, so a filter can
/// narrow by more than just event kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCorrelation {
    pub task_id: Option<TaskId>,
    pub agent_id: Option<AgentId>,
    pub resource_id: Option<ResourceId>,
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub kind: EventKind,
    pub correlation: EventCorrelation,
    pub payload: serde_json::Value,
}

impl CoordinationEvent {
    #[must_use]
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            correlation: EventCorrelation::default(),
            payload,
        }
    }

    #[must_use]
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.correlation.task_id = Some(task_id);
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.correlation.agent_id = Some(agent_id);
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource_id: ResourceId) -> Self {
        self.correlation.resource_id = Some(resource_id);
        self
    }
}

/// A predicate a subscriber registers to avoid paying for events it
/// does not care about.
#[derive(Clone, Default)]
pub struct EventFilter {
    kinds: Option<Vec<EventKind>>,
    task_id: Option<TaskId>,
    agent_id: Option<AgentId>,
}

impl EventFilter {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    #[must_use]
    pub fn for_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    fn matches(&self, event: &CoordinationEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(task_id) = self.task_id {
            if event.correlation.task_id != Some(task_id) {
                return false;
            }
        }
        if let Some(agent_id) = self.agent_id {
            if event.correlation.agent_id != Some(agent_id) {
                return false;
            }
        }
        true
    }
}

/// A subscriber's callback. Long work must be handed off to the
/// subscriber's own task rather than run inline — the bus only
/// guarantees the call itself returns quickly.
pub type EventHandler = Arc<dyn Fn(&CoordinationEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    handler: EventHandler,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// The event bus itself. Delivery is in-process and synchronous with
/// respect to emission order; a panic inside one handler is caught and
/// logged instead of poisoning the emitter or the remaining
/// subscribers.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    sink: RwLock<Arc<dyn EventSink>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sink: RwLock::new(Arc::new(NullEventSink)),
        }
    }

    /// Installs an outbound adapter that every subsequent `emit` also
    /// forwards to, beyond the in-process subscriber registry. Replaces
    /// whatever sink (or the default `NullEventSink`) was installed
    /// before.
    pub async fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().await = sink;
    }

    pub async fn subscribe(&self, filter: EventFilter, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers.write().await.push(Subscriber {
            id,
            filter,
            handler,
        });
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Invokes every matching subscriber in registration order. A
    /// handler that panics is caught via `catch_unwind`; its error is
    /// logged rather than propagated, so one broken subscriber never
    /// blocks delivery to its siblings.
    #[instrument(skip(self, event), fields(kind = ?event.kind))]
    pub async fn emit(&self, event: CoordinationEvent) {
        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            if !subscriber.filter.matches(&event) {
                continue;
            }
            let handler = subscriber.handler.clone();
            let event_ref = &event;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event_ref);
            }));
            if outcome.is_err() {
                warn!(subscription = subscriber.id.0, "event handler panicked");
            }
        }
        drop(subscribers);

        let sink = self.sink.read().await.clone();
        sink.emit(event.kind.as_str(), event.payload).await;
    }

    #[must_use]
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn matching_subscriber_receives_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            EventFilter::kinds(vec![EventKind::TaskCreated]),
            Arc::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        bus.emit(CoordinationEvent::new(
            EventKind::TaskCreated,
            serde_json::Value::Null,
        ))
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_matching_filter_is_skipped() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            EventFilter::kinds(vec![EventKind::TaskFailed]),
            Arc::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        bus.emit(CoordinationEvent::new(
            EventKind::TaskCreated,
            serde_json::Value::Null,
        ))
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = bus
            .subscribe(
                EventFilter::any(),
                Arc::new(move |_event| {
                    count_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await;

        bus.unsubscribe(id).await;
        bus.emit(CoordinationEvent::new(
            EventKind::TaskCreated,
            serde_json::Value::Null,
        ))
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        bus.subscribe(EventFilter::any(), Arc::new(|_event| panic!("boom")))
            .await;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            EventFilter::any(),
            Arc::new(move |_event| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await;

        bus.emit(CoordinationEvent::new(
            EventKind::TaskCreated,
            serde_json::Value::Null,
        ))
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    struct RecordingSink {
        kinds: Arc<RwLock<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl crate::domain::ports::EventSink for RecordingSink {
        async fn emit(&self, event_kind: &str, _payload: serde_json::Value) {
            self.kinds.write().await.push(event_kind.to_string());
        }
    }

    #[tokio::test]
    async fn installed_sink_receives_every_emitted_event() {
        let bus = EventBus::new();
        let kinds = Arc::new(RwLock::new(Vec::new()));
        bus.set_sink(Arc::new(RecordingSink { kinds: kinds.clone() })).await;

        bus.emit(CoordinationEvent::new(EventKind::TaskCreated, serde_json::Value::Null)).await;
        bus.emit(CoordinationEvent::new(EventKind::TaskCompleted, serde_json::Value::Null)).await;

        assert_eq!(*kinds.read().await, vec!["task-created", "task-completed"]);
    }
}
