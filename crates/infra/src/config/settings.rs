//! Core configuration
//!
//! One credential identity and one resource API. Everything beyond the
//! token endpoint and client credentials has a default.

use std::fmt;
use std::time::Duration;

use keyline_common::auth::ProviderConfig;
use keyline_common::error::{ConfigError, ConfigResult};
use keyline_common::resilience::{CircuitBreakerConfig, GateConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::{ApiClientConfig, DEFAULT_API_URL};
use crate::http::RetryScope;

/// Settings for a token provider and API client pair
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// OAuth2 token endpoint
    #[serde(alias = "token_endpoint")]
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,

    /// Resource API base URL
    #[serde(default = "default_api_url", alias = "base_url")]
    pub api_url: String,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Consecutive failures that open the circuit
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    #[serde(default = "default_circuit_reset_secs")]
    pub circuit_reset_secs: u64,

    /// Per-attempt timeout for resource calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Per-attempt timeout for token exchanges
    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub retry_scope: RetryScope,

    /// Longest wait for a concurrency slot; unbounded when absent
    #[serde(default)]
    pub gate_acquire_timeout_ms: Option<u64>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_max_concurrency() -> usize {
    10
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_reset_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_token_timeout_secs() -> u64 {
    10
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

impl CoreConfig {
    /// Configuration with the given credentials and defaults elsewhere
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_url: default_api_url(),
            max_concurrency: default_max_concurrency(),
            circuit_threshold: default_circuit_threshold(),
            circuit_reset_secs: default_circuit_reset_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            token_timeout_secs: default_token_timeout_secs(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retries: default_max_retries(),
            retry_scope: RetryScope::default(),
            gate_acquire_timeout_ms: None,
        }
    }

    /// Check required fields and value ranges
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        require("token_url", &self.token_url)?;
        require("client_id", &self.client_id)?;
        require("client_secret", &self.client_secret)?;
        require("api_url", &self.api_url)?;

        Url::parse(&self.token_url).map_err(|e| ConfigError::invalid("token_url", e.to_string()))?;
        Url::parse(&self.api_url).map_err(|e| ConfigError::invalid("api_url", e.to_string()))?;

        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid("max_concurrency", "must be greater than 0"));
        }
        if self.circuit_threshold == 0 {
            return Err(ConfigError::invalid("circuit_threshold", "must be greater than 0"));
        }
        if self.request_timeout_secs == 0 || self.token_timeout_secs == 0 {
            return Err(ConfigError::invalid("timeout", "must be greater than 0"));
        }
        if self.gate_acquire_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("gate_acquire_timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: None,
        }
    }

    /// Token provider settings
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig::new(&self.token_url, &self.client_id, &self.client_secret)
            .with_request_timeout(Duration::from_secs(self.token_timeout_secs))
            .with_retry(self.retry_config())
    }

    /// API client settings
    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig {
            base_url: self.api_url.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs),
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_threshold,
                reset_timeout: Duration::from_secs(self.circuit_reset_secs),
                ..CircuitBreakerConfig::default()
            },
            gate: GateConfig {
                max_concurrent: self.max_concurrency,
                acquire_timeout: self.gate_acquire_timeout_ms.map(Duration::from_millis),
            },
            retry: self.retry_config(),
            retry_scope: self.retry_scope,
        }
    }
}

fn require(field: &'static str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing { field })
    } else {
        Ok(())
    }
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("max_concurrency", &self.max_concurrency)
            .field("circuit_threshold", &self.circuit_threshold)
            .field("circuit_reset_secs", &self.circuit_reset_secs)
            .field("retry_scope", &self.retry_scope)
            .finish_non_exhaustive()
    }
}
