//! C8: a passive event consumer that aggregates rates, durations, and
//! utilisation. Subscribes to the event bus, maintains counters and
//! gauges, and keeps a ring-buffered sample per metric name (cap
//! ~10,000) so long-running processes don't accumulate unbounded
//! history.

use std::collections::{HashMap, VecDeque};
use std::time::SystemTime;
use tokio::sync::RwLock;

const MAX_SAMPLES_PER_METRIC: usize = 10_000;

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub value: f64,
    pub at: SystemTime,
}

#[derive(Debug, Default)]
struct MetricSeries {
    samples: VecDeque<Sample>,
}

impl MetricSeries {
    fn push(&mut self, sample: Sample) {
        if self.samples.len() >= MAX_SAMPLES_PER_METRIC {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: RwLock<HashMap<String, u64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, MetricSeries>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, name: &str) {
        *self.counters.write().await.entry(name.to_string()).or_insert(0) += 1;
    }

    pub async fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().await.insert(name.to_string(), value);
    }

    pub async fn record(&self, name: &str, value: f64, at: SystemTime) {
        self.histograms
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .push(Sample { value, at });
    }

    pub async fn counter(&self, name: &str) -> u64 {
        self.counters.read().await.get(name).copied().unwrap_or(0)
    }

    pub async fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.read().await.get(name).copied()
    }

    /// Samples for `name` within `[since, until]`, oldest first.
    pub async fn query(&self, name: &str, since: SystemTime, until: SystemTime) -> Vec<Sample> {
        self.histograms
            .read()
            .await
            .get(name)
            .map(|series| {
                series
                    .samples
                    .iter()
                    .filter(|s| s.at >= since && s.at <= until)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A point-in-time view suitable for periodic publication.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().await.clone(),
            gauges: self.gauges.read().await.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
}
