//! The coordination core's components (§2 of the design): one module
//! per component, composed by [`coordination_manager::CoordinationManager`].

pub mod circuit_breaker;
pub mod config;
pub mod coordination_manager;
pub mod dependency_graph;
pub mod event_bus;
pub mod message_router;
pub mod metrics_collector;
pub mod resource_manager;
pub mod scheduler;
pub mod swarm_monitor;

pub use circuit_breaker::{CircuitAdmission, CircuitBreakerService, CircuitStats};
pub use config::{CircuitBreakerDefaults, CoordinationConfig, WorkStealingConfig};
pub use coordination_manager::CoordinationManager;
pub use dependency_graph::{DependencyGraph, DependencyStats};
pub use event_bus::{CoordinationEvent, EventBus, EventFilter, EventKind, SubscriptionId};
pub use message_router::MessageRouter;
pub use metrics_collector::{MetricsCollector, MetricsSnapshot};
pub use resource_manager::ResourceManager;
pub use scheduler::{PlacementStrategy, TaskScheduler};
pub use swarm_monitor::{Alert, AlertSeverity, SwarmMonitor, SystemUsage};
