//! Trait abstractions for observability components
//!
//! Metrics are emitted through an injected collector rather than a global
//! registry, so each `TokenProvider` or `ApiClient` reports to whatever sink
//! its owner supplies.

use std::fmt::Debug;

/// Trait for metrics collection implementations
///
/// Allows components to emit metrics without depending on a specific
/// metrics collection system. Implementations must not block: they are
/// called inline on every request.
pub trait MetricsCollector: Send + Sync + Debug {
    /// Record a counter metric
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a gauge metric
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record a histogram metric
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record timing metric (in milliseconds)
    fn record_timing(&self, name: &str, duration_ms: u64, labels: &[(&str, &str)]) {
        self.record_histogram(name, duration_ms as f64, labels);
    }
}

/// No-op metrics collector for testing or when metrics are disabled
#[derive(Debug, Clone, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {
        // No-op
    }

    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {
        // No-op
    }

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {
        // No-op
    }
}
