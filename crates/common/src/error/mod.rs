//! Common error types shared across keyline crates
//!
//! Two pieces live here:
//!
//! 1. **`ConfigError`**: raised when a component is constructed with settings
//!    that can never work (zero thresholds, empty credentials, bad URLs).
//!
//! 2. **`ErrorClassification`**: the standard interface the retry machinery
//!    uses to ask an error whether repeating the operation may help.
//!
//! Module-specific errors implement `ErrorClassification` and keep their own
//! variants; they do not funnel everything through a shared enum.

use thiserror::Error;

/// Invalid configuration detected at construction or load time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required field is absent or empty
    #[error("Missing required configuration: {field}")]
    Missing { field: &'static str },

    /// A field is present but its value is unusable
    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Result alias for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Classification of an error by its characteristics
///
/// Implemented by every error that flows through a retry loop. The retry
/// classifier never inspects error variants directly.
pub trait ErrorClassification {
    /// Whether repeating the same operation could plausibly succeed
    fn is_retryable(&self) -> bool;
}

/// Returns `true` for HTTP statuses that indicate a transient server-side
/// condition: `429` or any `5xx`.
#[must_use]
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
