use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keyline_common::error::{is_transient_status, ErrorClassification};
use keyline_common::resilience::{RetryConfig, RetryContext, RetryExecutor};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure of a single HTTP exchange, after any retries
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No response was received (connect failure, timeout, reset)
    #[error("HTTP request failed: {message}")]
    Network { message: String },

    /// The server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request could not be built or replayed
    #[error("Invalid HTTP request: {message}")]
    Build { message: String },
}

impl TransportError {
    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ErrorClassification for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => is_transient_status(*status),
            Self::Build { .. } => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::Build { message: err.to_string() }
        } else {
            Self::Network { message: err.to_string() }
        }
    }
}

/// A successful (2xx) response with its body read to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    body: String,
}

impl HttpResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Deserialize the body as JSON
    ///
    /// `204`, `205` and empty bodies decode as JSON `null`, so callers can
    /// ask for `()` or `Option<T>`.
    ///
    /// # Errors
    /// Returns the parse error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        if matches!(self.status, 204 | 205) || self.body.trim().is_empty() {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_str(&self.body)
        }
    }
}

/// Which requests the client retries automatically
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Retry transient failures for every method, writes included
    #[default]
    AllMethods,
    /// Retry only methods that are idempotent per RFC 9110
    IdempotentOnly,
}

/// HTTP client with built-in retry and timeout support.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    retry: RetryExecutor,
    scope: RetryScope,
    warned_non_idempotent: Arc<AtomicBool>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", self.retry.classifier().config())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    ///
    /// # Errors
    /// Returns [`TransportError::Build`] if the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    pub fn retry_scope(&self) -> RetryScope {
        self.scope
    }

    /// Execute the provided request builder with retry semantics.
    ///
    /// Network failures, `429` and `5xx` responses are retried with
    /// exponential backoff until the budget runs out. Any other non-2xx
    /// status fails immediately.
    ///
    /// # Errors
    /// Returns the last [`TransportError`] once retries stop.
    pub async fn send(&self, builder: RequestBuilder) -> Result<HttpResponse, TransportError> {
        let method = match builder.try_clone().map(RequestBuilder::build) {
            Some(Ok(request)) => request.method().clone(),
            Some(Err(err)) => return Err(err.into()),
            None => return Err(unclonable()),
        };

        self.retry
            .execute_with(
                || self.attempt(&builder),
                |error, context, delay| self.permit_retry(&method, error, context, delay),
            )
            .await
            .map_err(|err| {
                debug!(%method, attempts = err.attempts(), "HTTP request gave up");
                err.into_inner()
            })
    }

    async fn attempt(&self, builder: &RequestBuilder) -> Result<HttpResponse, TransportError> {
        let request = builder.try_clone().ok_or_else(unclonable)?.build()?;

        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        let response = self.client.execute(request).await.map_err(|err| {
            debug!(%method, %url, error = %err, "HTTP request failed");
            TransportError::from(err)
        })?;

        let status = response.status();
        let body = response.text().await?;
        debug!(%method, %url, %status, "received HTTP response");

        if status.is_success() {
            Ok(HttpResponse { status: status.as_u16(), body })
        } else {
            Err(TransportError::Status { status: status.as_u16(), body })
        }
    }

    fn permit_retry(
        &self,
        method: &Method,
        error: &TransportError,
        context: &RetryContext,
        delay: Duration,
    ) -> bool {
        if method.is_idempotent() {
            return true;
        }

        match self.scope {
            RetryScope::IdempotentOnly => {
                debug!(%method, error = %error, "Not retrying non-idempotent request");
                false
            }
            RetryScope::AllMethods => {
                if !self.warned_non_idempotent.swap(true, Ordering::Relaxed) {
                    warn!(
                        %method,
                        attempt = context.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying non-idempotent request; the server may apply it more than once"
                    );
                }
                true
            }
        }
    }
}

fn unclonable() -> TransportError {
    TransportError::Build {
        message: "request body cannot be cloned; buffer the body to enable retries".into(),
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    retry: RetryConfig,
    scope: RetryScope,
    user_agent: Option<String>,
    default_headers: Option<reqwest::header::HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            scope: RetryScope::default(),
            user_agent: None,
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    /// Per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_scope(mut self, scope: RetryScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: reqwest::header::HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// # Errors
    /// Returns [`TransportError::Build`] if the reqwest client cannot be
    /// constructed.
    pub fn build(self) -> Result<HttpClient, TransportError> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client =
            builder.build().map_err(|err| TransportError::Build { message: err.to_string() })?;

        Ok(HttpClient {
            client,
            retry: RetryExecutor::new(self.retry),
            scope: self.scope,
            warned_non_idempotent: Arc::new(AtomicBool::new(false)),
        })
    }
}
