//! Observability seams for the access core
//!
//! Components emit duration and outcome metrics through the
//! [`MetricsCollector`] trait, which callers inject at construction. Logging
//! goes through `tracing` directly and needs no seam.

pub mod traits;

pub use traits::{MetricsCollector, NoOpMetricsCollector};
