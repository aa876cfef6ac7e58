//! OAuth 2.0 client-credentials token lifecycle
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  TokenProvider  │  Token state, proactive refresh, single-flight
//! └────────┬────────┘
//!          │
//!          ├──► RetryExecutor        (backoff on transient acquisition failures)
//!          │
//!          └──► TokenGrantClient     (one grant exchange)
//!                    │
//!                    └──► TokenEndpointClient  (form POST over reqwest)
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use keyline_common::auth::{ProviderConfig, TokenProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProviderConfig::new(
//!     "https://auth.example.com/realms/main/protocol/openid-connect/token",
//!     "my-service",
//!     "client-secret",
//! );
//! let provider = TokenProvider::new(config)?;
//!
//! // Acquires on first use, refreshes within five minutes of expiry
//! let access_token = provider.get_token().await?;
//! # let _ = access_token;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - **[`types`]**: `ProviderConfig`, `TokenResponse`, `TokenState`,
//!   `TokenInfo`
//! - **[`client`]**: HTTP token endpoint client and `GrantError`
//! - **[`traits`]**: `TokenGrantClient` seam
//! - **[`token_provider`]**: `TokenProvider` lifecycle management

pub mod client;
pub mod token_provider;
pub mod traits;
pub mod types;

use thiserror::Error;

pub use client::{GrantError, TokenEndpointClient};
pub use token_provider::{TokenProvider, TokenProviderBuilder};
pub use traits::TokenGrantClient;
pub use types::{Grant, ProviderConfig, TokenInfo, TokenResponse, TokenState};

/// Errors surfaced by [`TokenProvider`]
///
/// `Clone` so one exchange result can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Endpoint or credentials are missing or malformed
    #[error("Invalid token provider configuration: {message}")]
    InvalidConfig { message: String },

    /// No token could be obtained from the endpoint
    #[error("Token request failed after {attempts} attempt(s): {source}")]
    AcquisitionFailed {
        attempts: u32,
        #[source]
        source: GrantError,
    },
}

impl AuthError {
    /// HTTP status returned by the token endpoint on the last attempt
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AcquisitionFailed { source, .. } => source.status(),
            Self::InvalidConfig { .. } => None,
        }
    }
}
