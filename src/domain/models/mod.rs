//! Plain data types shared across the coordination core's components.

pub mod agent;
pub mod message;
pub mod resource;
pub mod scheduling_context;
pub mod task;

pub use agent::{AgentActivity, AgentProfile};
pub use message::Message;
pub use resource::{Resource, ResourceWaitEntry};
pub use scheduling_context::{SchedulingContext, TypeStats, WorkloadSnapshot};
pub use task::{Task, TaskPriority, TaskStatus};
