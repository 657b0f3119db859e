//! C4: exclusive resource locks with priority wait-queues.
//!
//! Waiters suspend on a `tokio::sync::Notify` per resource rather than
//! polling, avoiding a busy-wait loop. A background maintenance
//! sweep (driven by the coordination manager's single maintenance tick,
//! §5) drops stale wait entries and force-releases locks held past
//! `2 × resource_timeout`.

use crate::domain::errors::{CoordinationError, CoordinationResult};
use crate::domain::ids::{AgentId, ResourceId};
use crate::domain::models::resource::{Resource, ResourceWaitEntry};
use crate::domain::ports::Clock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::time::timeout;
use tracing::{instrument, warn};

struct ResourceState {
    resource: Resource,
    waiters: Vec<ResourceWaitEntry>,
    notify: Arc<Notify>,
}

impl ResourceState {
    fn new(id: ResourceId, resource_type: impl Into<String>) -> Self {
        Self {
            resource: Resource::new(id, resource_type),
            waiters: Vec::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Descending by priority, then ascending by arrival — the
    /// FIFO-within-priority ordering from §3.
    fn insert_waiter(&mut self, entry: ResourceWaitEntry) {
        let position = self
            .waiters
            .iter()
            .position(|w| {
                w.priority < entry.priority
                    || (w.priority == entry.priority && w.requested_at > entry.requested_at)
            })
            .unwrap_or(self.waiters.len());
        self.waiters.insert(position, entry);
    }
}

pub struct ResourceManager {
    resources: RwLock<HashMap<ResourceId, ResourceState>>,
    clock: Arc<dyn Clock>,
    resource_timeout: Duration,
}

impl ResourceManager {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, resource_timeout: Duration) -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
            clock,
            resource_timeout,
        }
    }

    /// Acquires `resource` for `agent`, waiting in priority order if
    /// it's already held. Re-acquisition by the current holder is
    /// idempotent and does not reset `locked_at`.
    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        resource_id: ResourceId,
        agent_id: AgentId,
        priority: i32,
        resource_type: &str,
    ) -> CoordinationResult<()> {
        let notify = {
            let mut resources = self.resources.write().await;
            let state = resources
                .entry(resource_id)
                .or_insert_with(|| ResourceState::new(resource_id, resource_type));

            if !state.resource.locked {
                state.resource.locked = true;
                state.resource.locked_by = Some(agent_id);
                state.resource.locked_at = Some(self.clock.now());
                return Ok(());
            }
            if state.resource.locked_by == Some(agent_id) {
                return Ok(());
            }

            state.insert_waiter(ResourceWaitEntry {
                agent_id,
                resource_id,
                requested_at: self.clock.now(),
                priority,
            });
            state.notify.clone()
        };

        let wait = async {
            loop {
                notify.notified().await;
                let mut resources = self.resources.write().await;
                if let Some(state) = resources.get_mut(&resource_id) {
                    if state.resource.locked_by == Some(agent_id) {
                        return;
                    }
                }
            }
        };

        if timeout(self.resource_timeout, wait).await.is_err() {
            let mut resources = self.resources.write().await;
            if let Some(state) = resources.get_mut(&resource_id) {
                state.waiters.retain(|w| w.agent_id != agent_id);
            }
            return Err(CoordinationError::LockTimeout {
                resource: resource_id,
                agent: agent_id,
            });
        }
        Ok(())
    }

    /// No-op (with a logged warning) if `agent_id` does not hold the
    /// lock. Otherwise hands the lock to the head of the wait queue, if
    /// any.
    #[instrument(skip(self))]
    pub async fn release(&self, resource_id: ResourceId, agent_id: AgentId) {
        let mut resources = self.resources.write().await;
        let Some(state) = resources.get_mut(&resource_id) else {
            warn!(?resource_id, ?agent_id, "release of unknown resource");
            return;
        };
        if state.resource.locked_by != Some(agent_id) {
            warn!(?resource_id, ?agent_id, "release by non-holder ignored");
            return;
        }

        if state.waiters.is_empty() {
            state.resource.locked = false;
            state.resource.locked_by = None;
            state.resource.locked_at = None;
        } else {
            let next = state.waiters.remove(0);
            state.resource.locked_by = Some(next.agent_id);
            state.resource.locked_at = Some(self.clock.now());
        }
        state.notify.notify_waiters();
    }

    /// Releases every resource `agent_id` holds, used when an agent
    /// terminates. Runs before any task-rescheduling decision, since
    /// the resources are real artifacts of a now-dead process either way.
    pub async fn release_all_for_agent(&self, agent_id: AgentId) {
        let ids: Vec<ResourceId> = {
            let resources = self.resources.read().await;
            resources
                .iter()
                .filter(|(_, s)| s.resource.locked_by == Some(agent_id))
                .map(|(id, _)| *id)
                .collect()
        };
        for id in ids {
            self.release(id, agent_id).await;
        }
    }

    /// Snapshot of current holders, fed to the coordination manager's
    /// deadlock detector.
    pub async fn allocations(&self) -> HashMap<ResourceId, AgentId> {
        self.resources
            .read()
            .await
            .iter()
            .filter_map(|(id, s)| s.resource.locked_by.map(|agent| (*id, agent)))
            .collect()
    }

    /// Snapshot of waiters per resource, also feeding the deadlock
    /// detector's wait-for graph.
    pub async fn waiting_requests(&self) -> HashMap<ResourceId, Vec<AgentId>> {
        self.resources
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, s.waiters.iter().map(|w| w.agent_id).collect()))
            .collect()
    }

    /// Drops wait entries older than `resource_timeout` and
    /// force-releases locks held longer than `2 × resource_timeout`
    /// (treating the holder as dead).
    pub async fn run_maintenance_sweep(&self) {
        let now = self.clock.now();
        let stale_lock_threshold = self.resource_timeout * 2;
        let mut resources = self.resources.write().await;
        for state in resources.values_mut() {
            state.waiters.retain(|w| {
                now.duration_since(w.requested_at)
                    .map(|elapsed| elapsed < self.resource_timeout)
                    .unwrap_or(true)
            });

            if let Some(locked_at) = state.resource.locked_at {
                if now
                    .duration_since(locked_at)
                    .map(|elapsed| elapsed >= stale_lock_threshold)
                    .unwrap_or(false)
                {
                    warn!(resource = ?state.resource.id, "force-releasing stale lock");
                    if let Some(next) = state.waiters.first().cloned() {
                        state.waiters.remove(0);
                        state.resource.locked_by = Some(next.agent_id);
                        state.resource.locked_at = Some(now);
                    } else {
                        state.resource.locked = false;
                        state.resource.locked_by = None;
                        state.resource.locked_at = None;
                    }
                    state.notify.notify_waiters();
                }
            }
        }
    }
}
