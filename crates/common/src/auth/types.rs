//! Client-credentials token types
//!
//! Defines the provider configuration, the raw token endpoint response, the
//! stored token state and the introspection snapshot handed to callers.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::AuthError;
use crate::resilience::RetryConfig;

/// Window before expiry in which a token is refreshed proactively
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the issuer omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Per-attempt timeout for token endpoint requests
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Token endpoint and credential settings for a [`TokenProvider`]
///
/// Immutable once the provider is built.
///
/// [`TokenProvider`]: super::TokenProvider
#[derive(Clone)]
pub struct ProviderConfig {
    /// OAuth2 token endpoint URL
    pub token_endpoint: String,
    /// Client identifier sent with every grant
    pub client_id: String,
    /// Client secret sent with every grant
    pub client_secret: String,
    /// Refresh this long before the token expires
    pub refresh_buffer: Duration,
    /// Lifetime assumed when the response has no `expires_in`; `None` treats
    /// such tokens as never expiring
    pub default_lifetime: Option<Duration>,
    /// Timeout applied to each token endpoint request
    pub request_timeout: Duration,
    /// Retry budget and backoff for client-credentials acquisition
    pub retry: RetryConfig,
}

impl ProviderConfig {
    /// Create a configuration with default timing
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            default_lifetime: Some(DEFAULT_TOKEN_LIFETIME),
            request_timeout: DEFAULT_TOKEN_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_default_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check that the endpoint and credentials are usable
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidConfig`] when the endpoint, client id or
    /// client secret is empty, or the endpoint is not an absolute URL.
    pub fn validate(&self) -> Result<Url, AuthError> {
        if self.token_endpoint.trim().is_empty()
            || self.client_id.trim().is_empty()
            || self.client_secret.is_empty()
        {
            return Err(AuthError::InvalidConfig {
                message: "token endpoint, client id and client secret are required".to_string(),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(AuthError::InvalidConfig {
                message: "request timeout must be greater than 0".to_string(),
            });
        }
        self.retry.validate().map_err(|e| AuthError::InvalidConfig { message: e.to_string() })?;

        Url::parse(&self.token_endpoint).map_err(|e| AuthError::InvalidConfig {
            message: format!("invalid token endpoint '{}': {e}", self.token_endpoint),
        })
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_buffer", &self.refresh_buffer)
            .field("default_lifetime", &self.default_lifetime)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Token endpoint response (RFC 6749 §5.1)
///
/// Every field is optional on the wire; a response without `access_token` is
/// rejected by the endpoint client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Grant sent to the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// `grant_type=client_credentials`
    ClientCredentials,
    /// `grant_type=refresh_token` with the previously issued refresh token
    RefreshToken(String),
}

impl Grant {
    /// Wire value of `grant_type`
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken(_) => "refresh_token",
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.grant_type())
    }
}

/// How close a stored token is to expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Outside the refresh buffer, or no known expiry
    Fresh,
    /// Inside the refresh buffer but still valid
    ExpiringSoon,
    /// Past its expiry instant
    Expired,
}

/// Issued credential held by the provider
///
/// Replaced wholesale on every acquisition or refresh; never mutated.
#[derive(Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Monotonic expiry; `None` when the lifetime is unknown
    pub expires_at: Option<Instant>,
    /// Wall-clock rendering of `expires_at`
    pub expires_at_utc: Option<DateTime<Utc>>,
    /// Lifetime the state was issued with
    pub lifetime: Option<Duration>,
}

impl TokenState {
    /// Build a state from a response received at `now`
    ///
    /// A missing `refresh_token` keeps `previous_refresh`. An absent or zero
    /// `expires_in` falls back to `default_lifetime`; a lifetime too large to
    /// represent as an expiry instant is treated as no known expiry.
    pub fn from_response(
        response: TokenResponse,
        now: Instant,
        wall_now: SystemTime,
        default_lifetime: Option<Duration>,
        previous_refresh: Option<String>,
    ) -> Option<Self> {
        let access_token = response.access_token.filter(|token| !token.is_empty())?;
        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .or(default_lifetime);

        let expiry = lifetime.and_then(|lifetime| {
            let expires_at = now.checked_add(lifetime)?;
            let expires_at_utc = chrono::Duration::from_std(lifetime)
                .ok()
                .and_then(|delta| DateTime::<Utc>::from(wall_now).checked_add_signed(delta))?;
            Some((lifetime, expires_at, expires_at_utc))
        });

        Some(Self {
            access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: expiry.map(|(_, at, _)| at),
            expires_at_utc: expiry.map(|(_, _, at_utc)| at_utc),
            lifetime: expiry.map(|(lifetime, _, _)| lifetime),
        })
    }

    /// Classify the token relative to `now` and the refresh buffer
    pub fn freshness(&self, now: Instant, buffer: Duration) -> Freshness {
        match self.expires_at {
            None => Freshness::Fresh,
            Some(expires_at) if now >= expires_at => Freshness::Expired,
            Some(expires_at) if now + buffer >= expires_at => Freshness::ExpiringSoon,
            Some(_) => Freshness::Fresh,
        }
    }

    /// Whether the token is past its expiry
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Time left before expiry, saturating at zero
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|expires_at| expires_at.saturating_duration_since(now))
    }
}

impl fmt::Debug for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenState")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at_utc", &self.expires_at_utc)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the current token for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// Wall-clock expiry, if known
    pub expires_at: Option<DateTime<Utc>>,
    /// Time left before expiry, if known
    pub expires_in: Option<Duration>,
    /// Whether the next `get_token` call would refresh first
    pub expiring_soon: bool,
    /// Whether a refresh token is held
    pub has_refresh_token: bool,
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::types.
    use super::*;

    fn response(expires_in: Option<u64>) -> TokenResponse {
        TokenResponse {
            access_token: Some("access".to_string()),
            refresh_token: None,
            expires_in,
            ..TokenResponse::default()
        }
    }

    /// Validates that the provider config rejects empty credentials.
    ///
    /// Assertions:
    /// - Ensures an empty client secret fails validation.
    /// - Ensures a relative endpoint fails validation.
    /// - Ensures a complete config passes.
    #[test]
    fn test_provider_config_validation() {
        let config = ProviderConfig::new("https://auth.example.com/token", "c1", "");
        assert!(matches!(config.validate(), Err(AuthError::InvalidConfig { .. })));

        let config = ProviderConfig::new("/token", "c1", "s1");
        assert!(matches!(config.validate(), Err(AuthError::InvalidConfig { .. })));

        let config = ProviderConfig::new("https://auth.example.com/token", "c1", "s1");
        assert!(config.validate().is_ok());
        assert_eq!(config.default_lifetime, Some(Duration::from_secs(300)));
        assert_eq!(config.refresh_buffer, Duration::from_secs(300));
    }

    #[test]
    fn test_provider_config_debug_redacts_secret() {
        let config = ProviderConfig::new("https://auth.example.com/token", "c1", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_token_response_deserializes_partial_body() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":60}"#).unwrap();
        assert_eq!(parsed.access_token.as_deref(), Some("abc"));
        assert_eq!(parsed.expires_in, Some(60));
        assert!(parsed.refresh_token.is_none());
    }

    /// Validates lifetime defaults and refresh-token carry-over.
    ///
    /// Assertions:
    /// - Confirms an absent `expires_in` falls back to the default lifetime.
    /// - Confirms the previous refresh token is kept when none is returned.
    /// - Ensures an empty access token yields `None`.
    #[test]
    fn test_token_state_from_response() {
        let now = Instant::now();
        let wall = SystemTime::now();

        let state = TokenState::from_response(
            response(None),
            now,
            wall,
            Some(DEFAULT_TOKEN_LIFETIME),
            Some("old-refresh".to_string()),
        )
        .unwrap();
        assert_eq!(state.expires_at, Some(now + Duration::from_secs(300)));
        assert_eq!(state.refresh_token.as_deref(), Some("old-refresh"));

        let state = TokenState::from_response(response(None), now, wall, None, None).unwrap();
        assert!(state.expires_at.is_none());

        let empty = TokenResponse { access_token: Some(String::new()), ..TokenResponse::default() };
        assert!(TokenState::from_response(empty, now, wall, None, None).is_none());
    }

    #[test]
    fn test_token_state_freshness() {
        let now = Instant::now();
        let state = TokenState::from_response(
            response(Some(480)),
            now,
            SystemTime::now(),
            Some(DEFAULT_TOKEN_LIFETIME),
            None,
        )
        .unwrap();

        assert_eq!(state.freshness(now, DEFAULT_REFRESH_BUFFER), Freshness::Fresh);
        assert_eq!(
            state.freshness(now + Duration::from_secs(180), DEFAULT_REFRESH_BUFFER),
            Freshness::ExpiringSoon
        );
        assert_eq!(
            state.freshness(now + Duration::from_secs(480), DEFAULT_REFRESH_BUFFER),
            Freshness::Expired
        );
        assert!(!state.is_expired(now + Duration::from_secs(479)));
    }

    #[test]
    fn test_zero_expires_in_uses_default_lifetime() {
        let now = Instant::now();
        let state = TokenState::from_response(
            response(Some(0)),
            now,
            SystemTime::now(),
            Some(DEFAULT_TOKEN_LIFETIME),
            None,
        )
        .unwrap();

        assert_eq!(state.lifetime, Some(DEFAULT_TOKEN_LIFETIME));
        assert_eq!(state.freshness(now, Duration::from_secs(60)), Freshness::Fresh);
    }

    /// Validates that an unrepresentable lifetime does not overflow.
    ///
    /// Assertions:
    /// - Ensures `u64::MAX` and `1e13` seconds yield a state without expiry.
    /// - Confirms such a state stays fresh.
    #[test]
    fn test_oversized_expires_in_means_no_known_expiry() {
        let now = Instant::now();
        for expires_in in [u64::MAX, 10_000_000_000_000] {
            let state = TokenState::from_response(
                response(Some(expires_in)),
                now,
                SystemTime::now(),
                Some(DEFAULT_TOKEN_LIFETIME),
                None,
            )
            .unwrap();

            assert!(state.expires_at.is_none(), "expires_in={expires_in}");
            assert!(state.expires_at_utc.is_none());
            assert!(state.lifetime.is_none());
            assert_eq!(state.freshness(now, DEFAULT_REFRESH_BUFFER), Freshness::Fresh);
        }
    }

    #[test]
    fn test_token_state_without_expiry_is_always_fresh() {
        let now = Instant::now();
        let state =
            TokenState::from_response(response(None), now, SystemTime::now(), None, None).unwrap();
        assert_eq!(
            state.freshness(now + Duration::from_secs(86_400), DEFAULT_REFRESH_BUFFER),
            Freshness::Fresh
        );
        assert!(state.remaining(now).is_none());
    }
}
