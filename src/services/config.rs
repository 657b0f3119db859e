//! `CoordinationConfig`: the single options table described in §6.
//!
//! Loaded through [`crate::infrastructure::config::ConfigLoader`], which
//! layers programmatic defaults, an on-disk YAML file, and environment
//! variables via `figment`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkStealingConfig {
    pub enabled: bool,
    pub steal_threshold: usize,
    pub max_steal_batch: usize,
    pub steal_interval_ms: u64,
}

impl Default for WorkStealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            steal_threshold: 3,
            max_steal_batch: 5,
            steal_interval_ms: 2_000,
        }
    }
}

impl WorkStealingConfig {
    #[must_use]
    pub fn steal_interval(&self) -> Duration {
        Duration::from_millis(self.steal_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerDefaults {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub half_open_limit: usize,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 30_000,
            half_open_limit: 1,
        }
    }
}

impl CircuitBreakerDefaults {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// The coordination core's tunable knobs, per the options table in §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Maximum failed attempts before a task reaches terminal `failed`.
    pub max_retries: u32,
    /// Base delay for exponential back-off between retries (`retryDelay · 2^(attempts-1)`).
    pub retry_delay_ms: u64,
    /// Max wait for a resource `acquire`; also the per-task execution cap.
    /// Stale-lock reclamation fires at `2 × resource_timeout_ms`.
    pub resource_timeout_ms: u64,
    /// Default response timeout, and expiry, for messages with none set.
    pub message_timeout_ms: u64,
    /// Enables the periodic deadlock scanner.
    #[serde(default = "default_true")]
    pub deadlock_detection: bool,
    pub work_stealing: WorkStealingConfig,
    pub circuit_breaker: CircuitBreakerDefaults,
    /// Period of the maintenance tick that drives every component's cleanup sweep.
    pub maintenance_interval_ms: u64,
    /// How long an agent may go without activity before the swarm monitor marks it stalled.
    pub stall_timeout_ms: u64,
    /// Whole-swarm CPU/memory percentage at which the swarm monitor emits a `critical`
    /// alert (and 80% of it for `warning`).
    pub resource_alert_threshold_percent: f64,
    #[serde(flatten)]
    pub logging: crate::infrastructure::logging::LogConfig,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            resource_timeout_ms: 30_000,
            message_timeout_ms: 10_000,
            deadlock_detection: true,
            work_stealing: WorkStealingConfig::default(),
            circuit_breaker: CircuitBreakerDefaults::default(),
            maintenance_interval_ms: 5_000,
            stall_timeout_ms: 60_000,
            resource_alert_threshold_percent: 90.0,
            logging: crate::infrastructure::logging::LogConfig::default(),
        }
    }
}

impl CoordinationConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn resource_timeout(&self) -> Duration {
        Duration::from_millis(self.resource_timeout_ms)
    }

    #[must_use]
    pub fn stale_lock_threshold(&self) -> Duration {
        self.resource_timeout() * 2
    }

    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    #[must_use]
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    /// Backoff delay for the given 1-indexed attempt number.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.retry_delay() * 2u32.saturating_pow(exponent)
    }
}
