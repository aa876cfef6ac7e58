//! Access token seam for the API client
//!
//! The client asks an [`AccessTokenProvider`] for a bearer token on every
//! call and reports tokens the API rejected with `401`.

use std::fmt::Debug;

use async_trait::async_trait;
use keyline_common::auth::TokenProvider;
use keyline_common::resilience::Clock;

use super::errors::ApiError;

/// Trait for providing access tokens
///
/// This trait allows dependency injection and testing with mock providers.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync + Debug {
    /// Get a valid access token
    ///
    /// This method should handle token refresh if needed.
    async fn access_token(&self) -> Result<String, ApiError>;

    /// Forget `token` after the API rejected it
    fn invalidate(&self, token: &str);
}

#[async_trait]
impl<C: Clock> AccessTokenProvider for TokenProvider<C> {
    async fn access_token(&self) -> Result<String, ApiError> {
        self.get_token().await.map_err(ApiError::from)
    }

    fn invalidate(&self, token: &str) {
        TokenProvider::invalidate(self, token);
    }
}
