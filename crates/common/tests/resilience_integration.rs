//! Integration tests for resilience module
//!
//! Tests the circuit breaker, concurrency gate and retry executor composed
//! the way the API client stacks them.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use keyline_common::error::ErrorClassification;
use keyline_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState, ConcurrencyGate,
    MockClock, RetryConfig, RetryError, RetryExecutor,
};

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    message: String,
    retryable: bool,
}

impl TestError {
    fn transient() -> Self {
        Self { message: "Transient failure".to_string(), retryable: true }
    }

    fn permanent() -> Self {
        Self { message: "Not found".to_string(), retryable: false }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

impl ErrorClassification for TestError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

fn breaker(threshold: u32, clock: &MockClock) -> CircuitBreaker<MockClock> {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .reset_timeout(Duration::from_secs(60))
        .build()
        .expect("Failed to build config");
    CircuitBreaker::with_clock(config, clock.clone()).expect("Failed to create circuit breaker")
}

/// Validates that five failures open the circuit and the sixth call never
/// reaches the operation.
///
/// # Test Steps
/// 1. Configure threshold 5
/// 2. Fail five calls
/// 3. Verify the sixth is rejected with `Open` and the operation is not run
#[tokio::test]
async fn test_circuit_opens_after_threshold() {
    let clock = MockClock::new();
    let breaker = breaker(5, &clock);
    let invocations = AtomicU32::new(0);

    for _ in 0..5 {
        let result = breaker
            .execute(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError::transient())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::OperationFailed { .. })));
    }

    let result = breaker
        .execute(|| async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(())
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open)));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
    assert_eq!(breaker.state(), CircuitState::Open);
}

/// Validates the half-open probe cycle in both directions.
///
/// # Test Steps
/// 1. Open the circuit
/// 2. Advance past the reset timeout and fail the probe; circuit reopens
/// 3. Advance again and succeed the probe; circuit closes with zero failures
#[tokio::test]
async fn test_half_open_probe_cycle() {
    let clock = MockClock::new();
    let breaker = breaker(2, &clock);

    for _ in 0..2 {
        let _ = breaker.execute(|| async { Err::<(), _>(TestError::transient()) }).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(60));
    let probe = breaker.execute(|| async { Err::<(), _>(TestError::transient()) }).await;
    assert!(matches!(probe, Err(CircuitBreakerError::OperationFailed { .. })));
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(60));
    let probe = breaker.execute(|| async { Ok::<_, TestError>("healthy") }).await;
    assert_eq!(probe.expect("probe should pass"), "healthy");

    let metrics = breaker.metrics();
    assert_eq!(metrics.state, CircuitState::Closed);
    assert_eq!(metrics.failure_count, 0);
}

/// Validates gate bound and FIFO resumption with five slow calls and two
/// slots.
#[tokio::test]
async fn test_gate_bound_and_fifo_order() {
    let gate = ConcurrencyGate::with_max(2).expect("valid gate");
    let running = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let order = Mutex::new(Vec::new());

    let calls = (0..5).map(|i| {
        let (gate, running, peak, order) = (&gate, &running, &peak, &order);
        async move {
            gate.run(|| async move {
                order.lock().unwrap().push(i);
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await
        }
    });

    for result in join_all(calls).await {
        result.expect("gate should admit every call");
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(gate.metrics().total_admitted, 5);
}

/// Validates that retries happen inside one breaker call, so a call that
/// eventually succeeds does not count toward the failure streak.
#[tokio::test]
async fn test_retry_inside_circuit_breaker() {
    let clock = MockClock::new();
    let breaker = breaker(1, &clock);
    let retry = RetryExecutor::new(
        RetryConfig::builder().base_delay(Duration::from_millis(2)).build().expect("valid"),
    );
    let attempts = Arc::new(AtomicU32::new(0));

    let result = breaker
        .execute(|| {
            retry.execute(|| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::transient())
                    } else {
                        Ok("Success")
                    }
                }
            })
        })
        .await;

    assert_eq!(result.expect("should succeed"), "Success");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates exponential spacing of retries and that permanent errors are
/// not retried.
#[tokio::test]
async fn test_retry_backoff_and_classification() {
    let retry = RetryExecutor::new(
        RetryConfig::builder().base_delay(Duration::from_millis(20)).build().expect("valid"),
    );

    let started = Instant::now();
    let transient = retry.execute(|| async { Err::<(), _>(TestError::transient()) }).await;
    let elapsed = started.elapsed();

    assert!(matches!(transient, Err(RetryError::Exhausted { attempts: 4, .. })));
    // 20ms + 40ms + 80ms
    assert!(elapsed >= Duration::from_millis(140), "elapsed {elapsed:?}");

    let calls = AtomicU32::new(0);
    let permanent = retry
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::permanent()) }
        })
        .await;

    assert!(matches!(permanent, Err(RetryError::NonRetryable { attempts: 1, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_circuit_breaker_access() {
    let clock = MockClock::new();
    let breaker = Arc::new(breaker(100, &clock));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(|| async move {
                        if i % 2 == 0 {
                            Ok(i)
                        } else {
                            Err(TestError::transient())
                        }
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        let _ = handle.await.expect("task should not panic");
    }

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_calls, 20);
    assert_eq!(metrics.rejected_calls, 0);
    assert_eq!(metrics.state, CircuitState::Closed);
}
