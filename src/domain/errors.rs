//! Error types for the coordination core.
//!
//! One `thiserror`-derived enum per §7 of the design, with an
//! `is_retryable` classifier so callers (and the scheduler's own retry
//! logic) can branch on error shape instead of string-matching
//! messages.

use crate::domain::ids::{AgentId, ResourceId, TaskId};
use thiserror::Error;

/// Errors surfaced by the coordination core's public operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// An operation was attempted before `initialize` completed.
    #[error("coordination manager is not initialized")]
    NotInitialized,

    /// An operation was attempted while `shutdown` was in progress.
    #[error("coordination manager is shutting down")]
    ShutdownInProgress,

    /// A task was submitted or started with an unmet dependency.
    #[error("task {task} depends on {dependency}, which is not completed")]
    DependencyUnmet { task: TaskId, dependency: TaskId },

    /// A task's declared dependencies would close a cycle in the
    /// dependency graph. Adversarial/malformed input, not an invariant
    /// violation — the submission is rejected and the graph is
    /// untouched.
    #[error("task {0}'s dependencies would introduce a cycle in the dependency graph")]
    DependencyCycle(TaskId),

    /// Referenced task does not exist.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// An operation tried to mutate a task that already reached a terminal status.
    #[error("task {0} already reached a terminal status")]
    TaskAlreadyTerminal(TaskId),

    /// A running task exceeded its execution deadline.
    #[error("task {0} timed out")]
    TaskTimeout(TaskId),

    /// A task was cancelled while running or queued.
    #[error("task {0} was cancelled")]
    TaskCancelled(TaskId),

    /// A task's executor returned an error; `retryable` reflects whether
    /// another attempt remains under `maxRetries`.
    #[error("task {task} failed: {message}")]
    TaskFailed {
        task: TaskId,
        message: String,
        retryable: bool,
    },

    /// No agent could be selected to run a task.
    #[error("no eligible agent found for task {0}")]
    NoEligibleAgent(TaskId),

    /// Referenced agent does not exist.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    /// `acquire` exceeded `resourceTimeout` waiting for a resource.
    #[error("timed out waiting to acquire resource {resource} for agent {agent}")]
    LockTimeout {
        resource: ResourceId,
        agent: AgentId,
    },

    /// `release` was called by an agent that does not hold the lock.
    #[error("agent {agent} does not hold resource {resource}")]
    LockNotOwned {
        resource: ResourceId,
        agent: AgentId,
    },

    /// `sendWithResponse` exceeded its deadline with no `sendResponse`.
    #[error("no response for message {0} within the deadline")]
    ResponseTimeout(crate::domain::ids::MessageId),

    /// The message router was (or is being) shut down.
    #[error("message router is shutting down")]
    RouterShutdown,

    /// A circuit breaker is open and refused the call.
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),

    /// A circuit breaker's half-open probe slots are full.
    #[error("circuit '{0}' is half-open and saturated")]
    CircuitHalfOpenSaturated(String),

    /// The deadlock detector found a cycle; resolution is in progress or was attempted.
    #[error("deadlock detected among agents {agents:?} over resources {resources:?}")]
    DeadlockDetected {
        agents: Vec<AgentId>,
        resources: Vec<ResourceId>,
    },

    /// Deadlock victim resolution (release + reschedule) itself failed.
    #[error("failed to resolve deadlock for victim {victim}: {reason}")]
    DeadlockResolutionFailed { victim: AgentId, reason: String },

    /// An invariant was violated. This should never happen in correct
    /// code; it aborts the current operation without corrupting state.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl CoordinationError {
    /// True for errors where the *same* operation, retried later, has a
    /// reasonable chance of succeeding (vs. errors that reflect a
    /// permanent fact about the request).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. }
                | Self::ResponseTimeout(_)
                | Self::CircuitOpen(_)
                | Self::CircuitHalfOpenSaturated(_)
                | Self::TaskTimeout(_)
                | Self::TaskFailed {
                    retryable: true,
                    ..
                }
        )
    }
}

/// Convenience alias used throughout the coordination core.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
