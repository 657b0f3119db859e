//! C9: per-agent liveness tracking, stall detection, and system-wide
//! resource sampling (§4.8).
//!
//! CPU/memory sampling is a `sysinfo::System` refreshed on each sweep,
//! the same crate and refresh pattern the codebase's own resource
//! monitor uses, scoped here to whole-swarm gauges rather than a
//! standalone throttling subsystem — measuring is this component's
//! job, not gating task admission.

use crate::domain::ids::AgentId;
use crate::domain::models::agent::AgentActivity;
use crate::domain::ports::Clock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::RwLock;
use tracing::{instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub agent_id: Option<AgentId>,
    pub severity: AlertSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct AgentState {
    activity: AgentActivity,
    tasks_completed: u64,
    tasks_failed: u64,
    rolling_mean_duration_ms: f64,
    last_activity: SystemTime,
}

impl AgentState {
    fn new(now: SystemTime) -> Self {
        Self {
            activity: AgentActivity::Idle,
            tasks_completed: 0,
            tasks_failed: 0,
            rolling_mean_duration_ms: 0.0,
            last_activity: now,
        }
    }

    /// Exponential moving average, alpha = 0.2, matching the smoothing
    /// used for scheduling's own per-type duration stats.
    fn record_duration(&mut self, duration_ms: f64) {
        const ALPHA: f64 = 0.2;
        if self.tasks_completed + self.tasks_failed == 0 {
            self.rolling_mean_duration_ms = duration_ms;
        } else {
            self.rolling_mean_duration_ms =
                ALPHA * duration_ms + (1.0 - ALPHA) * self.rolling_mean_duration_ms;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AgentSnapshot {
    pub activity: AgentActivity,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub rolling_mean_duration_ms: f64,
    pub last_activity: SystemTime,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUsage {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Tracks per-agent activity and swarm-wide resource/throughput
/// gauges. Sweeps are driven by the coordination manager's single
/// maintenance tick rather than an owned background task, the same
/// shape every other periodic component here uses.
pub struct SwarmMonitor {
    agents: RwLock<HashMap<AgentId, AgentState>>,
    system: RwLock<System>,
    clock: Arc<dyn Clock>,
    stall_timeout: Duration,
    /// Timestamps of recent completions, used to compute a rolling
    /// tasks-per-minute throughput figure.
    completions: RwLock<VecDeque<SystemTime>>,
}

impl SwarmMonitor {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, stall_timeout: Duration) -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            agents: RwLock::new(HashMap::new()),
            system: RwLock::new(System::new_with_specifics(refresh_kind)),
            clock,
            stall_timeout,
            completions: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn register_agent(&self, agent_id: AgentId) {
        self.agents
            .write()
            .await
            .insert(agent_id, AgentState::new(self.clock.now()));
    }

    pub async fn unregister_agent(&self, agent_id: AgentId) {
        self.agents.write().await.remove(&agent_id);
    }

    pub async fn record_task_started(&self, agent_id: AgentId) {
        let now = self.clock.now();
        let mut agents = self.agents.write().await;
        let state = agents.entry(agent_id).or_insert_with(|| AgentState::new(now));
        state.activity = AgentActivity::Running;
        state.last_activity = now;
    }

    pub async fn record_task_completed(&self, agent_id: AgentId, duration_ms: f64) {
        let now = self.clock.now();
        {
            let mut agents = self.agents.write().await;
            let state = agents.entry(agent_id).or_insert_with(|| AgentState::new(now));
            state.activity = AgentActivity::Completed;
            state.tasks_completed += 1;
            state.record_duration(duration_ms);
            state.last_activity = now;
        }
        self.completions.write().await.push_back(now);
    }

    pub async fn record_task_failed(&self, agent_id: AgentId, duration_ms: f64) {
        let now = self.clock.now();
        let mut agents = self.agents.write().await;
        let state = agents.entry(agent_id).or_insert_with(|| AgentState::new(now));
        state.activity = AgentActivity::Failed;
        state.tasks_failed += 1;
        state.record_duration(duration_ms);
        state.last_activity = now;
    }

    pub async fn record_agent_idle(&self, agent_id: AgentId) {
        let now = self.clock.now();
        let mut agents = self.agents.write().await;
        let state = agents.entry(agent_id).or_insert_with(|| AgentState::new(now));
        state.activity = AgentActivity::Idle;
        state.last_activity = now;
    }

    pub async fn snapshot(&self, agent_id: AgentId) -> Option<AgentSnapshot> {
        self.agents.read().await.get(&agent_id).map(|s| AgentSnapshot {
            activity: s.activity,
            tasks_completed: s.tasks_completed,
            tasks_failed: s.tasks_failed,
            rolling_mean_duration_ms: s.rolling_mean_duration_ms,
            last_activity: s.last_activity,
        })
    }

    /// Marks every agent whose `last_activity` is older than
    /// `stall_timeout` as `stalled` (unless already terminal-ish idle),
    /// returning the ids that changed plus a `warning`-severity alert
    /// per stalled agent.
    #[instrument(skip(self))]
    pub async fn sweep_stalls(&self) -> Vec<Alert> {
        let now = self.clock.now();
        let mut alerts = Vec::new();
        let mut agents = self.agents.write().await;
        for (&agent_id, state) in agents.iter_mut() {
            if state.activity == AgentActivity::Stalled {
                continue;
            }
            let elapsed = now.duration_since(state.last_activity).unwrap_or(Duration::ZERO);
            if state.activity == AgentActivity::Running && elapsed > self.stall_timeout {
                state.activity = AgentActivity::Stalled;
                warn!(?agent_id, elapsed_ms = elapsed.as_millis(), "agent stalled");
                alerts.push(Alert {
                    agent_id: Some(agent_id),
                    severity: AlertSeverity::Warning,
                    message: format!("agent {agent_id} has not reported activity in {elapsed:?}"),
                });
            }
        }
        alerts
    }

    /// Refreshes and returns whole-swarm CPU/memory usage. Scoped as
    /// observability data, not a throttling gate.
    pub async fn sample_system(&self) -> SystemUsage {
        let mut system = self.system.write().await;
        system.refresh_cpu_all();
        system.refresh_memory();
        let cpu_percent = f64::from(system.global_cpu_usage());
        let mem_percent = if system.total_memory() == 0 {
            0.0
        } else {
            100.0 * system.used_memory() as f64 / system.total_memory() as f64
        };
        SystemUsage { cpu_percent, mem_percent }
    }

    /// Tasks completed in the trailing 60 seconds, dropping older
    /// samples as it goes so the window never grows unbounded.
    pub async fn throughput_per_minute(&self) -> usize {
        let now = self.clock.now();
        let mut completions = self.completions.write().await;
        while let Some(&front) = completions.front() {
            if now.duration_since(front).unwrap_or(Duration::ZERO) > Duration::from_secs(60) {
                completions.pop_front();
            } else {
                break;
            }
        }
        completions.len()
    }

    /// A `critical` alert whenever whole-swarm CPU or memory exceeds
    /// `threshold_percent`; `warning` at 80% of that threshold.
    #[must_use]
    pub fn threshold_alerts(usage: SystemUsage, threshold_percent: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let warning_threshold = threshold_percent * 0.8;
        if usage.cpu_percent >= threshold_percent {
            alerts.push(Alert {
                agent_id: None,
                severity: AlertSeverity::Critical,
                message: format!("swarm CPU usage {:.1}% exceeds {:.1}%", usage.cpu_percent, threshold_percent),
            });
        } else if usage.cpu_percent >= warning_threshold {
            alerts.push(Alert {
                agent_id: None,
                severity: AlertSeverity::Warning,
                message: format!("swarm CPU usage {:.1}% approaching {:.1}%", usage.cpu_percent, threshold_percent),
            });
        }
        if usage.mem_percent >= threshold_percent {
            alerts.push(Alert {
                agent_id: None,
                severity: AlertSeverity::Critical,
                message: format!("swarm memory usage {:.1}% exceeds {:.1}%", usage.mem_percent, threshold_percent),
            });
        } else if usage.mem_percent >= warning_threshold {
            alerts.push(Alert {
                agent_id: None,
                severity: AlertSeverity::Warning,
                message: format!("swarm memory usage {:.1}% approaching {:.1}%", usage.mem_percent, threshold_percent),
            });
        }
        alerts
    }
}
