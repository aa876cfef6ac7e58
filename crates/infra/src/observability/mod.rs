//! Observability infrastructure for metrics
//!
//! The API client and token provider report through the
//! [`MetricsCollector`](keyline_common::observability::MetricsCollector)
//! trait. [`InMemoryMetrics`] keeps recent samples in memory so tests and
//! diagnostics can inspect what was emitted.
//!
//! Mutex locks recover from poisoning instead of panicking.

pub mod memory;

pub use memory::{InMemoryMetrics, MetricKind, MetricSample};
