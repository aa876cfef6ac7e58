//! Token endpoint client
//!
//! Performs a single grant exchange against the OAuth2 token endpoint with a
//! form-encoded POST. Retrying and refresh fallback are the provider's job;
//! this client only reports what happened, classified for the retry loop.

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::traits::TokenGrantClient;
use super::types::{Grant, ProviderConfig, TokenResponse};
use super::AuthError;
use crate::error::{is_transient_status, ErrorClassification};

/// Failure of a single token endpoint exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    /// No response was received (connect failure, timeout, reset)
    #[error("Token endpoint unreachable: {message}")]
    Network { message: String },

    /// The endpoint answered with a non-2xx status
    #[error("Token endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A 2xx response without a usable `access_token`
    #[error("No access_token in token endpoint response")]
    MissingAccessToken,

    /// A 2xx response whose body could not be parsed
    #[error("Invalid token endpoint response: {message}")]
    InvalidResponse { message: String },
}

impl GrantError {
    /// Label for the `error_type` metric dimension
    pub fn error_type(&self) -> String {
        match self {
            Self::Network { .. } => "network".to_string(),
            Self::Status { status, .. } => status.to_string(),
            Self::MissingAccessToken | Self::InvalidResponse { .. } => "invalid_response".to_string(),
        }
    }

    /// HTTP status, when a response was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ErrorClassification for GrantError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => is_transient_status(*status),
            Self::MissingAccessToken | Self::InvalidResponse { .. } => false,
        }
    }
}

/// reqwest-backed token endpoint client
#[derive(Clone)]
pub struct TokenEndpointClient {
    http: Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: String,
}

impl TokenEndpointClient {
    /// Build a client from a validated provider configuration
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidConfig`] if the configuration is invalid or
    /// the HTTP client cannot be constructed.
    pub fn new(config: &ProviderConfig) -> Result<Self, AuthError> {
        let token_endpoint = config.validate()?;
        let http = Client::builder().timeout(config.request_timeout).build().map_err(|e| {
            AuthError::InvalidConfig { message: format!("failed to build HTTP client: {e}") }
        })?;

        Ok(Self {
            http,
            token_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    fn form<'a>(&'a self, grant: &'a Grant) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![("grant_type", grant.grant_type())];
        if let Grant::RefreshToken(refresh_token) = grant {
            params.push(("refresh_token", refresh_token.as_str()));
        }
        params.push(("client_id", self.client_id.as_str()));
        params.push(("client_secret", self.client_secret.as_str()));
        params
    }
}

impl fmt::Debug for TokenEndpointClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEndpointClient")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenGrantClient for TokenEndpointClient {
    #[instrument(skip(self), fields(endpoint = %self.token_endpoint, client_id = %self.client_id))]
    async fn exchange(&self, grant: &Grant) -> Result<TokenResponse, GrantError> {
        let response = self
            .http
            .post(self.token_endpoint.clone())
            .form(&self.form(grant))
            .send()
            .await
            .map_err(|e| GrantError::Network { message: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "Token endpoint rejected grant");
            return Err(GrantError::Status { status: status.as_u16(), body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| GrantError::InvalidResponse { message: e.to_string() })?;

        if token.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(GrantError::MissingAccessToken);
        }

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for auth::client.
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer) -> TokenEndpointClient {
        let config = ProviderConfig::new(format!("{}/token", server.uri()), "c1", "s1");
        TokenEndpointClient::new(&config).unwrap()
    }

    #[test]
    fn test_grant_error_classification() {
        assert!(GrantError::Network { message: "reset".into() }.is_retryable());
        assert!(GrantError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(GrantError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!GrantError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!GrantError::MissingAccessToken.is_retryable());

        assert_eq!(GrantError::Status { status: 503, body: String::new() }.error_type(), "503");
        assert_eq!(GrantError::Network { message: String::new() }.error_type(), "network");
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ProviderConfig::new("", "c1", "s1");
        assert!(matches!(TokenEndpointClient::new(&config), Err(AuthError::InvalidConfig { .. })));
    }

    /// Validates the client-credentials form body and response parsing.
    ///
    /// Assertions:
    /// - Confirms the POST carries the grant type and credentials form-encoded.
    /// - Confirms the access token and lifetime are parsed.
    #[tokio::test]
    async fn test_client_credentials_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=c1"))
            .and(body_string_contains("client_secret=s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok-1",
                "expires_in": 600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server).exchange(&Grant::ClientCredentials).await.unwrap();
        assert_eq!(token.access_token.as_deref(), Some("tok-1"));
        assert_eq!(token.expires_in, Some(600));
    }

    #[tokio::test]
    async fn test_refresh_grant_sends_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "tok-2" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let token = client_for(&server)
            .exchange(&Grant::RefreshToken("r-1".to_string()))
            .await
            .unwrap();
        assert_eq!(token.access_token.as_deref(), Some("tok-2"));
    }

    #[tokio::test]
    async fn test_status_and_missing_token_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.exchange(&Grant::RefreshToken("r".into())).await.unwrap_err();
        assert_eq!(err, GrantError::Status { status: 400, body: "invalid_grant".to_string() });

        let err = client.exchange(&Grant::ClientCredentials).await.unwrap_err();
        assert_eq!(err, GrantError::MissingAccessToken);
    }

    #[tokio::test]
    async fn test_network_failure_is_classified() {
        // Nothing listens on port 9 in the test environment
        let config = ProviderConfig::new("http://127.0.0.1:9/token", "c1", "s1");
        let client = TokenEndpointClient::new(&config).unwrap();

        let err = client.exchange(&Grant::ClientCredentials).await.unwrap_err();
        assert!(matches!(err, GrantError::Network { .. }));
        assert!(err.is_retryable());
    }
}
