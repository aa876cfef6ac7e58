//! In-memory metrics collector
//!
//! Keeps the most recent samples in a ring buffer (default 10 000) and
//! answers simple queries over them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use keyline_common::observability::MetricsCollector;

const DEFAULT_CAPACITY: usize = 10_000;

/// Type of a recorded sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// One recorded metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

impl MetricSample {
    /// Value of `key`, if the sample carries that label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    fn matches(&self, kind: MetricKind, name: &str, labels: &[(&str, &str)]) -> bool {
        self.kind == kind
            && self.name == name
            && labels.iter().all(|(key, value)| self.label(key) == Some(*value))
    }
}

/// Thread-safe collector that records samples in memory
#[derive(Debug)]
pub struct InMemoryMetrics {
    samples: Mutex<VecDeque<MetricSample>>,
    capacity: usize,
}

impl Default for InMemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Keep at most `capacity` samples, evicting the oldest
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))), capacity }
    }

    /// Snapshot of every retained sample, oldest first
    pub fn samples(&self) -> Vec<MetricSample> {
        self.lock().iter().cloned().collect()
    }

    /// Sum of counter increments for `name` whose labels include `labels`
    pub fn counter_total(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.lock().iter().filter(|s| s.matches(MetricKind::Counter, name, labels)).count() as u64
    }

    /// Histogram observations for `name` whose labels include `labels`
    pub fn histogram_values(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        self.lock()
            .iter()
            .filter(|s| s.matches(MetricKind::Histogram, name, labels))
            .map(|s| s.value)
            .collect()
    }

    /// Most recent value of gauge `name`
    pub fn last_gauge(&self, name: &str) -> Option<f64> {
        self.lock()
            .iter()
            .rev()
            .find(|s| s.matches(MetricKind::Gauge, name, &[]))
            .map(|s| s.value)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MetricSample>> {
        match self.samples.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                tracing::warn!(
                    metric = "InMemoryMetrics::samples",
                    "Mutex poisoned, recovering data"
                );
                poison_err.into_inner()
            }
        }
    }

    fn push(&self, kind: MetricKind, name: &str, value: f64, labels: &[(&str, &str)]) {
        let sample = MetricSample {
            kind,
            name: name.to_string(),
            value,
            labels: labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect(),
        };

        let mut samples = self.lock();
        samples.push_back(sample);
        if samples.len() > self.capacity {
            samples.pop_front();
        }
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.push(MetricKind::Counter, name, 1.0, labels);
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(MetricKind::Gauge, name, value, labels);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(MetricKind::Histogram, name, value, labels);
    }
}
