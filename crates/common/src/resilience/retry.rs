//! Retry classification with exponential backoff
//!
//! The [`RetryClassifier`] decides whether a failed attempt is worth
//! repeating, asking the error itself through
//! [`ErrorClassification`](crate::error::ErrorClassification) and checking
//! the remaining budget. [`RetryExecutor`] drives an async operation through
//! that decision loop, sleeping between attempts.
//!
//! Delays grow as `base * 2^(attempt - 1)`: with the default one-second base
//! the three retries wait 1s, 2s and 4s.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult, ErrorClassification};

/// Errors returned by [`RetryExecutor`]
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The error stayed retryable but the budget ran out
    #[error("All retry attempts exhausted after {attempts} tries: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { attempts: u32, source: E },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of attempts made, including the first
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::NonRetryable { attempts, .. } => *attempts,
        }
    }

    /// Consume the error and return the last failure of the operation
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::NonRetryable { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Decision for whether to retry an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay
    Retry(Duration),
    /// Surface the error
    Stop,
}

/// Per-call retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Total attempts allowed, including the first
    pub max_attempts: u32,
}

impl RetryContext {
    /// Context for the first attempt of a call
    pub fn first(max_attempts: u32) -> Self {
        Self { attempt: 1, max_attempts }
    }

    /// Whether another attempt fits in the budget
    pub fn has_budget(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each subsequent retry
    pub base_delay: Duration,
    /// Optional upper bound on a single delay
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1), max_delay: None }
    }
}

impl RetryConfig {
    /// Create a new configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(max_delay) = self.max_delay {
            if max_delay < self.base_delay {
                return Err(ConfigError::invalid(
                    "max_delay",
                    "must be greater than or equal to base_delay",
                ));
            }
        }
        Ok(())
    }
}

/// Builder for RetryConfig
#[derive(Debug)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl Default for RetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = Some(delay);
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Decides whether and when a failed attempt is retried
#[derive(Debug, Clone, Default)]
pub struct RetryClassifier {
    config: RetryConfig,
}

impl RetryClassifier {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before the retry that follows `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.config.base_delay.saturating_mul(1u32 << exponent);
        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Classify a failure given the current attempt
    pub fn decide<E>(&self, error: &E, context: &RetryContext) -> RetryDecision
    where
        E: ErrorClassification + ?Sized,
    {
        if error.is_retryable() && context.has_budget() {
            RetryDecision::Retry(self.delay_for(context.attempt))
        } else {
            RetryDecision::Stop
        }
    }
}

/// Drives an operation through the classifier's decisions
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    classifier: RetryClassifier,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { classifier: RetryClassifier::new(config) }
    }

    pub fn classifier(&self) -> &RetryClassifier {
        &self.classifier
    }

    /// Execute an operation, retrying retryable failures
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + 'static,
    {
        self.execute_with(operation, |_, _, _| true).await
    }

    /// Execute an operation, consulting `before_retry` ahead of every retry
    ///
    /// `before_retry` sees the failure, the context of the attempt that
    /// failed and the planned delay. Returning `false` vetoes the retry and
    /// surfaces the error as non-retryable.
    pub async fn execute_with<F, Fut, T, E, H>(
        &self,
        mut operation: F,
        mut before_retry: H,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + ErrorClassification + 'static,
        H: FnMut(&E, &RetryContext, Duration) -> bool,
    {
        let mut context = RetryContext::first(self.classifier.config.max_attempts());

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if context.attempt > 1 {
                        debug!(attempts = context.attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match self.classifier.decide(&error, &context) {
                RetryDecision::Retry(delay) if before_retry(&error, &context, delay) => {
                    warn!(
                        attempt = context.attempt,
                        max_attempts = context.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    context.attempt += 1;
                }
                RetryDecision::Retry(_) => {
                    return Err(RetryError::NonRetryable { attempts: context.attempt, source: error });
                }
                RetryDecision::Stop if error.is_retryable() => {
                    warn!(attempts = context.attempt, error = %error, "All retry attempts exhausted");
                    return Err(RetryError::Exhausted { attempts: context.attempt, source: error });
                }
                RetryDecision::Stop => {
                    debug!(error = %error, "Not retrying non-retryable error");
                    return Err(RetryError::NonRetryable { attempts: context.attempt, source: error });
                }
            }
        }
    }
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(delay) => write!(f, "retry in {delay:?}"),
            Self::Stop => write!(f, "stop"),
        }
    }
}
