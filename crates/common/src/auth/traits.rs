//! Traits for token endpoint access
//!
//! The provider talks to the token endpoint only through
//! [`TokenGrantClient`], so tests can substitute a scripted client and
//! deployments can swap the transport.

use std::fmt::Debug;

use async_trait::async_trait;

use super::client::GrantError;
use super::types::{Grant, TokenResponse};

/// A single grant exchange against a token endpoint
#[async_trait]
pub trait TokenGrantClient: Send + Sync + Debug {
    /// Exchange `grant` for a token
    ///
    /// # Errors
    /// Returns [`GrantError`] when no response arrives, the endpoint answers
    /// with a non-2xx status, or the body carries no access token.
    async fn exchange(&self, grant: &Grant) -> Result<TokenResponse, GrantError>;
}
