//! Concurrency gate for bounding in-flight calls
//!
//! Callers beyond the configured limit wait in FIFO order and resume in the
//! order they arrived as slots free up. The slot is held for the full
//! duration of the wrapped operation and released when it completes or is
//! dropped.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument};

use crate::error::{ConfigError, ConfigResult};

/// Errors raised while waiting for a gate slot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// No slot freed up within the configured acquire timeout
    #[error("Timed out after {timeout:?} waiting for a concurrency slot")]
    Timeout { timeout: Duration },

    /// The gate was closed while the caller was waiting
    #[error("Concurrency gate is closed")]
    Closed,
}

/// Configuration for gate behavior
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum number of concurrently executing operations
    pub max_concurrent: usize,
    /// Optional bound on how long a caller waits for a slot; `None` waits
    /// indefinitely
    pub acquire_timeout: Option<Duration>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_concurrent: 10, acquire_timeout: None }
    }
}

impl GateConfig {
    /// Create a new configuration builder
    pub fn builder() -> GateConfigBuilder {
        GateConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent", "must be greater than 0"));
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("acquire_timeout", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for GateConfig
#[derive(Debug)]
pub struct GateConfigBuilder {
    config: GateConfig,
}

impl Default for GateConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GateConfigBuilder {
    pub fn new() -> Self {
        Self { config: GateConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.config.acquire_timeout = None;
        self
    }

    pub fn build(self) -> ConfigResult<GateConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics for gate monitoring
#[derive(Debug, Clone)]
pub struct GateMetrics {
    /// Number of operations currently holding a slot
    pub running: usize,
    /// Number of callers waiting for a slot
    pub queued: usize,
    /// Configured slot count
    pub max_concurrent: usize,
    /// Total number of operations admitted
    pub total_admitted: u64,
    /// Total number of callers that gave up waiting
    pub timeout_count: u64,
}

impl GateMetrics {
    /// Fraction of slots in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.running as f64 / self.max_concurrent as f64
    }

    /// Check if every slot is taken
    pub fn is_saturated(&self) -> bool {
        self.running >= self.max_concurrent
    }
}

/// Bounded-concurrency gate
///
/// Backed by a fair `tokio` semaphore, so waiters are granted slots strictly
/// in the order they started waiting.
///
/// # Examples
///
/// ```rust
/// use keyline_common::resilience::{ConcurrencyGate, GateConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let gate = ConcurrencyGate::new(GateConfig::builder().max_concurrent(2).build()?)?;
///
/// let value = gate.run(|| async { 42 }).await?;
/// assert_eq!(value, 42);
/// # Ok(())
/// # }
/// ```
pub struct ConcurrencyGate {
    config: GateConfig,
    semaphore: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    total_admitted: Arc<AtomicU64>,
    timeout_count: Arc<AtomicU64>,
}

impl ConcurrencyGate {
    /// Create a new gate with the given configuration
    pub fn new(config: GateConfig) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(AtomicUsize::new(0)),
            total_admitted: Arc::new(AtomicU64::new(0)),
            timeout_count: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Create a gate with `max_concurrent` slots and no acquire timeout
    pub fn with_max(max_concurrent: usize) -> ConfigResult<Self> {
        Self::new(GateConfig { max_concurrent, acquire_timeout: None })
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, GateError> {
        let _waiting = QueuedGuard::enter(&self.queued);

        match self.config.acquire_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.semaphore.acquire()).await {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(GateError::Closed),
                Err(_) => {
                    self.timeout_count.fetch_add(1, Ordering::Relaxed);
                    Err(GateError::Timeout { timeout })
                }
            },
            None => self.semaphore.acquire().await.map_err(|_| GateError::Closed),
        }
    }

    /// Run an operation once a slot is available
    ///
    /// The operation's output is returned unchanged; the only errors this
    /// method adds are those of waiting for a slot.
    #[instrument(skip(self, operation), fields(running = self.running()))]
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = self.acquire().await?;
        self.total_admitted.fetch_add(1, Ordering::Relaxed);
        debug!(running = self.running(), "Concurrency gate admitted operation");

        let output = operation().await;
        drop(permit);
        Ok(output)
    }

    /// Number of operations currently holding a slot
    pub fn running(&self) -> usize {
        self.config.max_concurrent.saturating_sub(self.semaphore.available_permits())
    }

    /// Number of callers waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Get gate metrics
    pub fn metrics(&self) -> GateMetrics {
        GateMetrics {
            running: self.running(),
            queued: self.queued(),
            max_concurrent: self.config.max_concurrent,
            total_admitted: self.total_admitted.load(Ordering::Acquire),
            timeout_count: self.timeout_count.load(Ordering::Acquire),
        }
    }

    /// Close the gate; current and future waiters fail with [`GateError::Closed`]
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Clone for ConcurrencyGate {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            semaphore: Arc::clone(&self.semaphore),
            queued: Arc::clone(&self.queued),
            total_admitted: Arc::clone(&self.total_admitted),
            timeout_count: Arc::clone(&self.timeout_count),
        }
    }
}

impl fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("running", &self.running())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Counts a caller as queued until it is admitted or gives up.
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::future::join_all;

    use super::*;

    #[tokio::test]
    async fn test_gate_basic() {
        let gate = ConcurrencyGate::with_max(2).unwrap();
        assert_eq!(gate.run(|| async { 42 }).await.unwrap(), 42);

        let metrics = gate.metrics();
        assert_eq!(metrics.total_admitted, 1);
        assert_eq!(metrics.running, 0);
        assert_eq!(metrics.queued, 0);
    }

    #[tokio::test]
    async fn test_gate_passes_operation_errors_through() {
        let gate = ConcurrencyGate::with_max(1).unwrap();
        let result: Result<Result<(), &str>, GateError> = gate.run(|| async { Err("nope") }).await;
        assert_eq!(result.unwrap(), Err("nope"));
    }

    #[tokio::test]
    async fn test_gate_bounds_concurrency_and_preserves_fifo_order() {
        let gate = ConcurrencyGate::with_max(2).unwrap();
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let started = Mutex::new(Vec::new());

        let calls = (0..5).map(|i| {
            let gate = &gate;
            let in_flight = &in_flight;
            let peak = &peak;
            let started = &started;
            async move {
                gate.run(|| async move {
                    started.lock().unwrap().push(i);
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }
        });

        let results = join_all(calls).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(*started.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_gate_acquire_timeout() {
        let config = GateConfig::builder()
            .max_concurrent(1)
            .acquire_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let gate = ConcurrencyGate::new(config).unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = gate.run(|| async move {
            let _ = release_rx.await;
        });
        let waiter = async {
            tokio::task::yield_now().await;
            let result = gate.run(|| async {}).await;
            let _ = release_tx.send(());
            result
        };

        let (held, waited) = tokio::join!(holder, waiter);
        assert!(held.is_ok());
        assert_eq!(waited, Err(GateError::Timeout { timeout: Duration::from_millis(20) }));
        assert_eq!(gate.metrics().timeout_count, 1);
        assert_eq!(gate.queued(), 0);
    }

    #[tokio::test]
    async fn test_closed_gate_rejects() {
        let gate = ConcurrencyGate::with_max(1).unwrap();
        gate.close();
        assert_eq!(gate.run(|| async {}).await, Err(GateError::Closed));
    }

    #[test]
    fn test_gate_config_validation() {
        assert_eq!(GateConfig::default().max_concurrent, 10);
        assert!(GateConfig::builder().max_concurrent(0).build().is_err());
        assert!(GateConfig::builder().acquire_timeout(Duration::ZERO).build().is_err());
        assert!(GateConfig::builder().max_concurrent(1).build().is_ok());
    }

    #[test]
    fn test_gate_metrics_methods() {
        let metrics = GateMetrics {
            running: 5,
            queued: 3,
            max_concurrent: 10,
            total_admitted: 80,
            timeout_count: 0,
        };

        assert_eq!(metrics.utilization(), 0.5);
        assert!(!metrics.is_saturated());
    }
}
