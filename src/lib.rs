//! Coordination core for a multi-agent swarm runtime.
//!
//! A swarm of worker agents cooperatively executes a dependency graph of
//! tasks; this crate is the subsystem that accepts task submissions,
//! selects agents, enforces dependency ordering, locks shared resources,
//! routes inter-agent messages, detects deadlocks, recovers from agent
//! failures, and rebalances load across the swarm.
//!
//! The crate is transport- and storage-agnostic: persistence, process
//! spawning, CLI front-ends and vector/ML plug-ins are external
//! collaborators invoked only through the narrow port traits in
//! [`domain::ports`].

pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{CoordinationError, CoordinationResult};
pub use domain::ids::{AgentId, MessageId, ResourceId, TaskId};
pub use services::config::CoordinationConfig;
pub use services::coordination_manager::CoordinationManager;
pub use services::scheduler::PlacementStrategy;
