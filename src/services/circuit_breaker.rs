//! C3: per-target circuit breakers guarding dispatch to a flaky agent
//! or downstream collaborator.
//!
//! `half_open_in_flight` caps concurrent probe calls while a breaker is
//! `HalfOpen` instead of only gating on success/failure counts —
//! without it, a burst of callers could all race into the probe window
//! at once and re-trip the breaker before any of them reports back.

use crate::services::config::CircuitBreakerDefaults;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Outcome of an admission check, distinguishing *why* a call was
/// refused (§4.3/§7: `circuit-open` vs. `circuit-half-open-saturated`
/// are different caller-facing errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitAdmission {
    /// The call may proceed.
    Admitted,
    /// The circuit is open and not yet past its timeout.
    Open,
    /// The circuit is half-open but its probe slots are full.
    HalfOpenSaturated,
}

impl CircuitAdmission {
    #[must_use]
    pub const fn is_admitted(self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug, Clone)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<SystemTime>,
    half_open_in_flight: usize,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Manages one circuit per named target (e.g. `"assign-<agentId>"`),
/// creating it lazily on first use with the configured defaults.
pub struct CircuitBreakerService {
    circuits: RwLock<HashMap<String, Circuit>>,
    defaults: CircuitBreakerDefaults,
    now: Box<dyn Fn() -> SystemTime + Send + Sync>,
}

impl std::fmt::Debug for CircuitBreakerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerService")
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl CircuitBreakerService {
    #[must_use]
    pub fn new(defaults: CircuitBreakerDefaults) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            defaults,
            now: Box::new(SystemTime::now),
        }
    }

    #[cfg(test)]
    fn with_clock(
        defaults: CircuitBreakerDefaults,
        now: impl Fn() -> SystemTime + Send + Sync + 'static,
    ) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            defaults,
            now: Box::new(now),
        }
    }

    /// Returns whether a call to `target` may proceed, transitioning
    /// `Open` circuits to `HalfOpen` once their timeout has elapsed and
    /// admitting at most `half_open_limit` concurrent probes while
    /// `HalfOpen`. The refusal reason is reported distinctly so callers
    /// can surface `circuit-open` and `circuit-half-open-saturated` as
    /// the separate errors §7 names.
    #[instrument(skip(self))]
    pub async fn allows(&self, target: &str) -> CircuitAdmission {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(target.to_string())
            .or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => CircuitAdmission::Admitted,
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .and_then(|opened| (self.now)().duration_since(opened).ok())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.defaults.timeout() {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.half_open_in_flight = 1;
                    info!(target, "circuit half-opening for a probe call");
                    CircuitAdmission::Admitted
                } else {
                    CircuitAdmission::Open
                }
            }
            CircuitState::HalfOpen => {
                if circuit.half_open_in_flight < self.defaults.half_open_limit {
                    circuit.half_open_in_flight += 1;
                    CircuitAdmission::Admitted
                } else {
                    CircuitAdmission::HalfOpenSaturated
                }
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn record_success(&self, target: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(target.to_string())
            .or_insert_with(Circuit::new);

        circuit.consecutive_failures = 0;
        match circuit.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.defaults.success_threshold {
                    circuit.state = CircuitState::Closed;
                    circuit.consecutive_successes = 0;
                    circuit.opened_at = None;
                    info!(target, "circuit closed after successful probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    #[instrument(skip(self))]
    pub async fn record_failure(&self, target: &str) {
        let mut circuits = self.circuits.write().await;
        let circuit = circuits
            .entry(target.to_string())
            .or_insert_with(Circuit::new);

        circuit.consecutive_successes = 0;
        match circuit.state {
            CircuitState::Closed => {
                circuit.consecutive_failures += 1;
                if circuit.consecutive_failures >= self.defaults.failure_threshold {
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some((self.now)());
                    info!(target, "circuit opened after failure threshold");
                }
            }
            CircuitState::HalfOpen => {
                circuit.half_open_in_flight = circuit.half_open_in_flight.saturating_sub(1);
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some((self.now)());
                info!(target, "probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    pub async fn stats(&self, target: &str) -> Option<CircuitStats> {
        self.circuits
            .read()
            .await
            .get(target)
            .map(|c| CircuitStats {
                state: c.state,
                consecutive_failures: c.consecutive_failures,
                consecutive_successes: c.consecutive_successes,
            })
    }

    pub async fn reset(&self, target: &str) {
        self.circuits.write().await.remove(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn defaults() -> CircuitBreakerDefaults {
        CircuitBreakerDefaults {
            failure_threshold: 2,
            success_threshold: 2,
            timeout_ms: 1_000,
            half_open_limit: 1,
        }
    }

    fn clock_at(millis: Arc<AtomicU64>) -> impl Fn() -> SystemTime + Send + Sync + 'static {
        move || SystemTime::UNIX_EPOCH + Duration::from_millis(millis.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let breaker = CircuitBreakerService::new(defaults());
        breaker.record_failure("t").await;
        assert_eq!(
            breaker.stats("t").await.unwrap().state,
            CircuitState::Closed
        );
        breaker.record_failure("t").await;
        assert_eq!(breaker.stats("t").await.unwrap().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_refuses_calls_before_timeout() {
        let breaker = CircuitBreakerService::new(defaults());
        breaker.record_failure("t").await;
        breaker.record_failure("t").await;
        assert_eq!(breaker.allows("t").await, CircuitAdmission::Open);
    }

    #[tokio::test]
    async fn half_open_limits_concurrent_probes() {
        let millis = Arc::new(AtomicU64::new(0));
        let breaker = CircuitBreakerService::with_clock(defaults(), clock_at(millis.clone()));
        breaker.record_failure("t").await;
        breaker.record_failure("t").await;

        millis.store(2_000, Ordering::SeqCst);
        assert_eq!(breaker.allows("t").await, CircuitAdmission::Admitted, "first probe admitted");
        assert_eq!(
            breaker.allows("t").await,
            CircuitAdmission::HalfOpenSaturated,
            "second concurrent probe refused"
        );
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let millis = Arc::new(AtomicU64::new(0));
        let breaker = CircuitBreakerService::with_clock(defaults(), clock_at(millis.clone()));
        breaker.record_failure("t").await;
        breaker.record_failure("t").await;

        millis.store(2_000, Ordering::SeqCst);
        assert!(breaker.allows("t").await.is_admitted());
        breaker.record_success("t").await;
        assert_eq!(
            breaker.stats("t").await.unwrap().state,
            CircuitState::HalfOpen
        );

        assert!(breaker.allows("t").await.is_admitted());
        breaker.record_success("t").await;
        assert_eq!(breaker.stats("t").await.unwrap().state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_probe_reopens_circuit() {
        let millis = Arc::new(AtomicU64::new(0));
        let breaker = CircuitBreakerService::with_clock(defaults(), clock_at(millis.clone()));
        breaker.record_failure("t").await;
        breaker.record_failure("t").await;

        millis.store(2_000, Ordering::SeqCst);
        assert!(breaker.allows("t").await.is_admitted());
        breaker.record_failure("t").await;
        assert_eq!(breaker.stats("t").await.unwrap().state, CircuitState::Open);
    }
}
