//! Shared building blocks for authenticated, resilient API access.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: configuration validation errors
//! - `runtime`: async resilience primitives (circuit breaker, concurrency
//!   gate, retry classification) and the metrics seam
//! - `platform`: OAuth2 client-credentials token lifecycle over HTTP

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod observability;
#[cfg(feature = "runtime")]
pub mod resilience;

// Platform tier
// -------------------------------------------------------------------
#[cfg(feature = "platform")]
pub mod auth;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "platform")]
pub use auth::{AuthError, ProviderConfig, TokenInfo, TokenProvider, TokenState};
#[cfg(feature = "foundation")]
pub use error::{ConfigError, ConfigResult};
#[cfg(feature = "runtime")]
pub use observability::{MetricsCollector, NoOpMetricsCollector};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerMetrics,
    CircuitState, Clock, ConcurrencyGate, GateConfig, GateError, GateMetrics, MockClock,
    RetryClassifier, RetryConfig, RetryContext, RetryDecision, RetryError, RetryExecutor,
    SystemClock,
};
