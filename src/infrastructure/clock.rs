//! Concrete `Clock` implementations.

use crate::domain::ports::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A controllable clock for deterministic tests, paired with
/// `tokio::time::pause`/`advance` where the code under test also waits
/// on tokio timers.
#[derive(Debug)]
pub struct FakeClock {
    millis_since_epoch: AtomicU64,
}

impl FakeClock {
    #[must_use]
    pub fn new(start: SystemTime) -> Self {
        let millis = start
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            millis_since_epoch: AtomicU64::new(millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis_since_epoch
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.millis_since_epoch.load(Ordering::SeqCst))
    }
}
