//! Resilience patterns for calls to a remote backend
//!
//! - **Circuit Breaker**: fails fast while the backend is unhealthy and lets a
//!   single probe through after a cooldown
//! - **Concurrency Gate**: bounds in-flight calls, queueing the rest in FIFO
//!   order
//! - **Retry**: classifies failures and retries transient ones with
//!   exponential backoff
//!
//! All three are generic over the wrapped operation and its error type. Time
//! is read through the [`Clock`] trait so tests can drive cooldowns with
//! [`MockClock`].

pub mod circuit_breaker;
pub mod gate;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError,
    CircuitBreakerMetrics, CircuitState, Clock, MockClock, SystemClock,
};
// Re-export gate types
pub use gate::{ConcurrencyGate, GateConfig, GateConfigBuilder, GateError, GateMetrics};
// Re-export retry types
pub use retry::{
    RetryClassifier, RetryConfig, RetryConfigBuilder, RetryContext, RetryDecision, RetryError,
    RetryExecutor, RetryResult,
};
