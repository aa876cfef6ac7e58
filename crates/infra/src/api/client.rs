//! API client with concurrency gate, circuit breaker and retry logic
//!
//! Every call resolves a bearer token, waits for a gate slot, then runs the
//! retrying transport inside the circuit breaker:
//!
//! ```text
//! token -> gate.run -> breaker.execute -> http.send (retries)
//! ```
//!
//! Failures leave as [`ApiError`]. Each call records
//! `api_request_duration_ms` and, on failure, `api_errors_total`, tagged with
//! the method and the templated path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use keyline_common::auth::TokenProvider;
use keyline_common::observability::{MetricsCollector, NoOpMetricsCollector};
use keyline_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock,
    ConcurrencyGate, GateConfig, GateMetrics, RetryConfig, SystemClock,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::auth::AccessTokenProvider;
use super::errors::ApiError;
use super::path::logical_path;
use crate::config::CoreConfig;
use crate::http::{HttpClient, HttpResponse, RetryScope};

/// Histogram of call durations, labelled `method`, `path` and `status`
pub const REQUEST_DURATION_METRIC: &str = "api_request_duration_ms";

/// Counter of failed calls, labelled `method` and `path`
pub const REQUEST_ERRORS_METRIC: &str = "api_errors_total";

/// Base URL used when none is configured
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Configuration for API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL for API (e.g., "https://api.example.com")
    pub base_url: String,
    /// Per-attempt timeout for API requests
    pub timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
    pub gate: GateConfig,
    pub retry: RetryConfig,
    pub retry_scope: RetryScope,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            circuit_breaker: CircuitBreakerConfig::default(),
            gate: GateConfig::default(),
            retry: RetryConfig::default(),
            retry_scope: RetryScope::default(),
        }
    }
}

/// API client with resilience patterns
///
/// Breaker state belongs to this instance. Build one client per credential
/// and share it (for example behind an `Arc`) so failures aggregate.
pub struct ApiClient<C: Clock = SystemClock> {
    http: HttpClient,
    auth: Arc<dyn AccessTokenProvider>,
    base_url: String,
    gate: ConcurrencyGate,
    circuit_breaker: CircuitBreaker<C>,
    metrics: Arc<dyn MetricsCollector>,
}

impl<C: Clock> std::fmt::Debug for ApiClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("gate", &self.gate)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish_non_exhaustive()
    }
}

impl ApiClient<SystemClock> {
    /// Create a new API client
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the base URL or any resilience setting
    /// is invalid.
    pub fn new(
        config: ApiClientConfig,
        auth: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, ApiError> {
        Self::builder(auth).config(config).build()
    }

    /// Create a builder for fluent configuration
    pub fn builder(auth: Arc<dyn AccessTokenProvider>) -> ApiClientBuilder<SystemClock> {
        ApiClientBuilder {
            config: ApiClientConfig::default(),
            auth,
            metrics: Arc::new(NoOpMetricsCollector),
            clock: SystemClock,
        }
    }

    /// Wire a token provider and client from loaded configuration
    ///
    /// Both components report to `metrics`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if the credentials or API settings are
    /// invalid.
    pub fn from_core_config(
        config: &CoreConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Result<Self, ApiError> {
        let provider = TokenProvider::builder(config.provider_config())
            .metrics(Arc::clone(&metrics))
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Self::builder(Arc::new(provider))
            .config(config.api_client_config())
            .metrics(metrics)
            .build()
    }
}

impl<C: Clock> ApiClient<C> {
    /// Execute a GET request
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    #[instrument(skip(self), fields(path = %path))]
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let request = self.request(Method::GET, path);
        self.dispatch(Method::GET, path, Ok(request)).await
    }

    /// Execute a GET request with query parameters
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    #[instrument(skip(self, query), fields(path = %path))]
    pub async fn get_with_query<Q, R>(&self, path: &str, query: &Q) -> Result<R, ApiError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.request(Method::GET, path).query(query);
        self.dispatch(Method::GET, path, Ok(request)).await
    }

    /// Execute a POST request
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be serialized, the request fails or
    /// the response cannot be deserialized
    #[instrument(skip(self, body), fields(path = %path))]
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.request_with_body(Method::POST, path, body);
        self.dispatch(Method::POST, path, request).await
    }

    /// Execute a PUT request
    ///
    /// # Errors
    ///
    /// Returns error if the body cannot be serialized, the request fails or
    /// the response cannot be deserialized
    #[instrument(skip(self, body), fields(path = %path))]
    pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.request_with_body(Method::PUT, path, body);
        self.dispatch(Method::PUT, path, request).await
    }

    /// Execute a DELETE request
    ///
    /// # Errors
    ///
    /// Returns error if request fails or response cannot be deserialized
    #[instrument(skip(self), fields(path = %path))]
    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, ApiError> {
        let request = self.request(Method::DELETE, path);
        self.dispatch(Method::DELETE, path, Ok(request)).await
    }

    /// Normalised base URL, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_metrics(&self) -> CircuitBreakerMetrics {
        self.circuit_breaker.metrics()
    }

    pub fn gate_metrics(&self) -> GateMetrics {
        self.gate.metrics()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path)).header(CONTENT_TYPE, "application/json")
    }

    fn request_with_body<B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<RequestBuilder, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(body).map_err(|e| ApiError::InvalidPayload {
            detail: format!("Failed to serialize body: {e}"),
        })?;
        Ok(self.request(method, path).body(bytes))
    }

    async fn dispatch<R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        request: Result<RequestBuilder, ApiError>,
    ) -> Result<R, ApiError> {
        let logical = logical_path(path);
        let started = Instant::now();

        let result = match request {
            Ok(request) => self.execute(request).await.and_then(|response| decode(&response)),
            Err(err) => Err(err),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.record(&method, &logical, duration_ms, &result);
        result
    }

    /// Send with a bearer token, re-acquiring the token once on `401`
    async fn execute(&self, request: RequestBuilder) -> Result<HttpResponse, ApiError> {
        let token = self.auth.access_token().await?;

        match self.send_with_token(&request, &token).await {
            Err(ApiError::Http { status: 401, .. }) => {
                warn!("API rejected access token, re-acquiring");
                self.auth.invalidate(&token);
                let token = self.auth.access_token().await?;
                self.send_with_token(&request, &token).await
            }
            other => other,
        }
    }

    async fn send_with_token(
        &self,
        request: &RequestBuilder,
        token: &str,
    ) -> Result<HttpResponse, ApiError> {
        let request = request
            .try_clone()
            .ok_or_else(|| ApiError::Config("request body cannot be cloned".to_string()))?
            .bearer_auth(token);
        let http = &self.http;

        let response = self
            .gate
            .run(move || self.circuit_breaker.execute(move || http.send(request)))
            .await??;
        Ok(response)
    }

    fn record<R>(&self, method: &Method, path: &str, duration_ms: u64, result: &Result<R, ApiError>) {
        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics.record_timing(
            REQUEST_DURATION_METRIC,
            duration_ms,
            &[("method", method.as_str()), ("path", path), ("status", outcome)],
        );

        match result {
            Ok(_) => debug!(%method, path, duration_ms, "API request completed"),
            Err(err) => {
                self.metrics
                    .increment_counter(REQUEST_ERRORS_METRIC, &[("method", method.as_str()), ("path", path)]);
                error!(
                    %method,
                    path,
                    duration_ms,
                    kind = ?err.kind(),
                    error = %err,
                    "API request failed"
                );
            }
        }
    }
}

fn decode<R: DeserializeOwned>(response: &HttpResponse) -> Result<R, ApiError> {
    response.json().map_err(|e| ApiError::InvalidPayload {
        detail: format!("Failed to parse response: {e}"),
    })
}

/// Strip trailing slashes and check the URL is absolute http(s)
fn normalize_base_url(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ApiError::Config("Base URL is required".to_string()));
    }

    let parsed = Url::parse(trimmed)
        .map_err(|e| ApiError::Config(format!("Invalid base URL {trimmed:?}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::Config(format!(
            "Base URL must use http or https, got {:?}",
            parsed.scheme()
        )));
    }

    Ok(trimmed.to_string())
}

/// Builder for [`ApiClient`]
pub struct ApiClientBuilder<C: Clock> {
    config: ApiClientConfig,
    auth: Arc<dyn AccessTokenProvider>,
    metrics: Arc<dyn MetricsCollector>,
    clock: C,
}

impl<C: Clock> ApiClientBuilder<C> {
    /// Replace the whole configuration
    #[must_use]
    pub fn config(mut self, config: ApiClientConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    #[must_use]
    pub fn gate(mut self, config: GateConfig) -> Self {
        self.config.gate = config;
        self
    }

    #[must_use]
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    #[must_use]
    pub fn retry_scope(mut self, scope: RetryScope) -> Self {
        self.config.retry_scope = scope;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the breaker clock (useful for testing)
    pub fn clock<C2: Clock>(self, clock: C2) -> ApiClientBuilder<C2> {
        ApiClientBuilder { config: self.config, auth: self.auth, metrics: self.metrics, clock }
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Config`] if HttpClient, CircuitBreaker or
    /// ConcurrencyGate cannot be created
    pub fn build(self) -> Result<ApiClient<C>, ApiError> {
        let base_url = normalize_base_url(&self.config.base_url)?;

        self.config
            .retry
            .validate()
            .map_err(|e| ApiError::Config(format!("Invalid retry policy: {e}")))?;

        let http = HttpClient::builder()
            .timeout(self.config.timeout)
            .retry(self.config.retry)
            .retry_scope(self.config.retry_scope)
            .build()
            .map_err(|e| ApiError::Config(format!("Failed to build HttpClient: {e}")))?;

        let circuit_breaker = CircuitBreaker::with_clock(self.config.circuit_breaker, self.clock)
            .map_err(|e| ApiError::Config(format!("Failed to create circuit breaker: {e}")))?;

        let gate = ConcurrencyGate::new(self.config.gate)
            .map_err(|e| ApiError::Config(format!("Failed to create concurrency gate: {e}")))?;

        Ok(ApiClient { http, auth: self.auth, base_url, gate, circuit_breaker, metrics: self.metrics })
    }
}
