//! Token provider with single-flight refresh
//!
//! Manages the client-credentials token lifecycle:
//! - Acquisition on first use, retried with backoff on transient failures
//! - Proactive refresh inside the configured buffer before expiry
//! - Refresh-token exchange with fallback to a full acquisition
//! - At most one exchange in flight; concurrent callers await the same one

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::client::{GrantError, TokenEndpointClient};
use super::traits::TokenGrantClient;
use super::types::{Freshness, Grant, ProviderConfig, TokenInfo, TokenResponse, TokenState};
use super::AuthError;
use crate::observability::{MetricsCollector, NoOpMetricsCollector};
use crate::resilience::{Clock, RetryExecutor, SystemClock};

type SharedExchange = Shared<BoxFuture<'static, Result<Arc<TokenState>, AuthError>>>;

/// OAuth2 client-credentials token provider
///
/// Cheap to clone; clones share the token state and the in-flight exchange.
pub struct TokenProvider<C: Clock = SystemClock> {
    inner: Arc<ProviderInner<C>>,
}

struct ProviderInner<C: Clock> {
    config: ProviderConfig,
    client: Arc<dyn TokenGrantClient>,
    retry: RetryExecutor,
    metrics: Arc<dyn MetricsCollector>,
    clock: C,
    state: RwLock<Option<Arc<TokenState>>>,
    in_flight: Mutex<Option<SharedExchange>>,
}

impl<C: Clock> Clone for TokenProvider<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> std::fmt::Debug for TokenProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("config", &self.inner.config)
            .field("has_token", &self.inner.state.read().is_some())
            .finish_non_exhaustive()
    }
}

impl TokenProvider<SystemClock> {
    /// Create a provider that talks to the configured endpoint over HTTP
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidConfig`] if the endpoint or credentials
    /// are missing or malformed.
    pub fn new(config: ProviderConfig) -> Result<Self, AuthError> {
        Self::builder(config).build()
    }

    /// Start building a provider with custom collaborators
    pub fn builder(config: ProviderConfig) -> TokenProviderBuilder<SystemClock> {
        TokenProviderBuilder {
            config,
            client: None,
            metrics: Arc::new(NoOpMetricsCollector),
            clock: SystemClock,
        }
    }
}

/// Builder for [`TokenProvider`]
pub struct TokenProviderBuilder<C: Clock> {
    config: ProviderConfig,
    client: Option<Arc<dyn TokenGrantClient>>,
    metrics: Arc<dyn MetricsCollector>,
    clock: C,
}

impl<C: Clock> TokenProviderBuilder<C> {
    /// Use a custom grant client instead of the HTTP endpoint client
    #[must_use]
    pub fn client(mut self, client: Arc<dyn TokenGrantClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the clock (useful for testing)
    pub fn clock<C2: Clock>(self, clock: C2) -> TokenProviderBuilder<C2> {
        TokenProviderBuilder {
            config: self.config,
            client: self.client,
            metrics: self.metrics,
            clock,
        }
    }

    /// Validate the configuration and build the provider
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidConfig`] if the configuration is invalid.
    pub fn build(self) -> Result<TokenProvider<C>, AuthError> {
        self.config.validate()?;
        let client: Arc<dyn TokenGrantClient> = match self.client {
            Some(client) => client,
            None => Arc::new(TokenEndpointClient::new(&self.config)?),
        };

        Ok(TokenProvider {
            inner: Arc::new(ProviderInner {
                retry: RetryExecutor::new(self.config.retry.clone()),
                config: self.config,
                client,
                metrics: self.metrics,
                clock: self.clock,
                state: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        })
    }
}

impl<C: Clock> TokenProvider<C> {
    /// Return a valid access token, acquiring or refreshing first if needed
    ///
    /// Returns immediately while the stored token is outside the refresh
    /// buffer. Inside the buffer the token is refreshed before returning; if
    /// that refresh fails but the token has not yet expired, the current
    /// token is returned. Once expired, a failed refresh is an error.
    ///
    /// # Errors
    /// Returns [`AuthError`] when no token can be obtained.
    #[instrument(skip(self))]
    pub async fn get_token(&self) -> Result<String, AuthError> {
        let current = self.current_state();
        if let Some(state) = &current {
            match state.freshness(self.inner.clock.now(), self.inner.config.refresh_buffer) {
                Freshness::Fresh => return Ok(state.access_token.clone()),
                Freshness::ExpiringSoon => debug!("Token expiring soon, refreshing proactively"),
                Freshness::Expired => debug!("Token expired, refreshing"),
            }
        }

        match Arc::clone(&self.inner).shared_exchange().await {
            Ok(state) => Ok(state.access_token.clone()),
            Err(error) => match self.current_state() {
                Some(state) if !state.is_expired(self.inner.clock.now()) => {
                    warn!(error = %error, "Token refresh failed, using current token until expiry");
                    Ok(state.access_token.clone())
                }
                _ => Err(error),
            },
        }
    }

    /// Drop the stored token if it is still `rejected`
    ///
    /// Used after the resource API rejects a token: the next
    /// [`get_token`](Self::get_token) call acquires a fresh one. A token
    /// that has already been replaced is left alone.
    pub fn invalidate(&self, rejected: &str) {
        let mut state = self.inner.state.write();
        if state.as_ref().is_some_and(|current| current.access_token == rejected) {
            *state = None;
            info!("Access token invalidated");
        }
    }

    /// Drop the stored token unconditionally
    pub fn clear_token(&self) {
        *self.inner.state.write() = None;
        debug!("Token cleared");
    }

    /// Snapshot of the stored token, or `None` before the first acquisition
    pub fn token_info(&self) -> Option<TokenInfo> {
        let state = self.current_state()?;
        let now = self.inner.clock.now();
        Some(TokenInfo {
            expires_at: state.expires_at_utc,
            expires_in: state.remaining(now),
            expiring_soon: state.freshness(now, self.inner.config.refresh_buffer)
                != Freshness::Fresh,
            has_refresh_token: state.refresh_token.is_some(),
        })
    }

    /// Provider configuration
    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    fn current_state(&self) -> Option<Arc<TokenState>> {
        self.inner.state.read().clone()
    }
}

impl<C: Clock> ProviderInner<C> {
    /// Join the in-flight exchange, or start one
    fn shared_exchange(self: Arc<Self>) -> SharedExchange {
        let mut slot = self.in_flight.lock();
        if let Some(existing) = slot.as_ref() {
            debug!("Joining in-flight token exchange");
            return existing.clone();
        }

        // Another caller may have finished an exchange since we last looked
        if let Some(state) = self.state.read().clone() {
            if state.freshness(self.clock.now(), self.config.refresh_buffer) == Freshness::Fresh {
                return futures::future::ready(Ok(state)).boxed().shared();
            }
        }

        let inner = Arc::clone(&self);
        let exchange = async move {
            let _reset = InFlightReset(&inner);
            let result = match AssertUnwindSafe(inner.refresh_or_acquire()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!("Token exchange panicked");
                    Err(AuthError::AcquisitionFailed {
                        attempts: 1,
                        source: GrantError::InvalidResponse {
                            message: "token exchange aborted".to_string(),
                        },
                    })
                }
            };
            if let Ok(state) = &result {
                *inner.state.write() = Some(Arc::clone(state));
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(exchange.clone());
        exchange
    }

    async fn refresh_or_acquire(&self) -> Result<Arc<TokenState>, AuthError> {
        let previous_refresh = self.state.read().as_ref().and_then(|s| s.refresh_token.clone());

        match previous_refresh {
            Some(refresh_token) => match self.refresh(refresh_token).await {
                Ok(state) => return Ok(state),
                Err(error) => {
                    warn!(error = %error, "Token refresh failed, requesting new token");
                }
            },
            None => debug!("No refresh token available, requesting new token"),
        }

        self.acquire().await
    }

    async fn refresh(&self, refresh_token: String) -> Result<Arc<TokenState>, GrantError> {
        let grant = Grant::RefreshToken(refresh_token.clone());
        let outcome = self
            .client
            .exchange(&grant)
            .await
            .and_then(|response| self.issue(response, Some(refresh_token)));

        match &outcome {
            Ok(state) => {
                self.metrics.increment_counter("token_refresh_success_total", &[]);
                info!(expires_at = ?state.expires_at_utc, "Token refreshed successfully");
            }
            Err(error) => {
                let error_type = error.error_type();
                self.metrics
                    .increment_counter("token_refresh_error_total", &[("error_type", error_type.as_str())]);
            }
        }
        outcome
    }

    async fn acquire(&self) -> Result<Arc<TokenState>, AuthError> {
        let result = self
            .retry
            .execute(|| async move {
                let outcome = self
                    .client
                    .exchange(&Grant::ClientCredentials)
                    .await
                    .and_then(|response| self.issue(response, None));

                match &outcome {
                    Ok(_) => self.metrics.increment_counter("token_request_success_total", &[]),
                    Err(error) => {
                        let error_type = error.error_type();
                        warn!(error = %error, "Failed to obtain token");
                        self.metrics.increment_counter(
                            "token_request_error_total",
                            &[("error_type", error_type.as_str())],
                        );
                    }
                }
                outcome
            })
            .await;

        match result {
            Ok(state) => {
                info!(expires_at = ?state.expires_at_utc, "Token obtained successfully");
                Ok(state)
            }
            Err(error) => {
                let attempts = error.attempts();
                Err(AuthError::AcquisitionFailed { attempts, source: error.into_inner() })
            }
        }
    }

    fn issue(
        &self,
        response: TokenResponse,
        previous_refresh: Option<String>,
    ) -> Result<Arc<TokenState>, GrantError> {
        let state = TokenState::from_response(
            response,
            self.clock.now(),
            self.clock.system_time(),
            self.config.default_lifetime,
            previous_refresh,
        )
        .ok_or(GrantError::MissingAccessToken)?;

        if let Some(lifetime) = state.lifetime {
            self.metrics.record_gauge("token_expiry_seconds", lifetime.as_secs_f64(), &[]);
        }
        Ok(Arc::new(state))
    }
}

/// Empties the in-flight slot when an exchange finishes or is dropped
struct InFlightReset<'a, C: Clock>(&'a ProviderInner<C>);

impl<C: Clock> Drop for InFlightReset<'_, C> {
    fn drop(&mut self) {
        *self.0.in_flight.lock() = None;
    }
}
