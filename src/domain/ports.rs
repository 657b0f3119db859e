//! Port traits: the seams where the coordination core depends on
//! something outside itself (§6). Each has a default or in-memory
//! implementation so the core runs standalone in tests; a host
//! process substitutes a real adapter.

use crate::domain::errors::CoordinationResult;
use crate::domain::ids::AgentId;
use async_trait::async_trait;
use std::time::SystemTime;

/// Wall-clock access, injected so timeout- and backoff-driven logic can
/// be driven deterministically under `tokio::time::pause`/`advance` in
/// tests instead of sleeping real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Runs a task's payload on behalf of the scheduler.
///
/// The core never inspects `payload` or `result` — they are opaque
/// `serde_json::Value`s passed straight through to whatever the host
/// registers.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task_id: crate::domain::ids::TaskId,
        task_type: &str,
        payload: serde_json::Value,
    ) -> CoordinationResult<serde_json::Value>;
}

/// Forwards messages to agents living outside this process.
///
/// The message router is purely in-process when no transport is
/// installed; `NullAgentTransport` is that default.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn deliver(&self, to: AgentId, payload: serde_json::Value) -> CoordinationResult<()>;
}

/// A sink for events the core emits, beyond its own in-process bus.
///
/// Mirrors the event-bus transport contract in §6: a narrow
/// subscribe/emit surface, with a no-op default.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event_kind: &str, payload: serde_json::Value);
}

/// The default `EventSink`: discards everything. Installed when no
/// outbound adapter is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event_kind: &str, _payload: serde_json::Value) {}
}

/// The default `AgentTransport`: every delivery fails, since there is
/// nowhere in-process for it to go. Installed when the router has no
/// external agents registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAgentTransport;

#[async_trait]
impl AgentTransport for NullAgentTransport {
    async fn deliver(
        &self,
        to: AgentId,
        _payload: serde_json::Value,
    ) -> CoordinationResult<()> {
        Err(crate::domain::errors::CoordinationError::AgentNotFound(to))
    }
}
