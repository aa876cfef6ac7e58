//! API-specific error types
//!
//! [`ApiError`] is the only error shape the API client returns. Transport,
//! gate and breaker failures are normalised here so callers never see
//! reqwest types.

use keyline_common::auth::AuthError;
use keyline_common::resilience::{CircuitBreakerError, GateError};
use thiserror::Error;

use crate::http::TransportError;

/// Detail used when an error response carries nothing readable
pub const UNKNOWN_ERROR_DETAIL: &str = "Unknown error";

/// Detail used when no response was received
pub const UNREACHABLE_DETAIL: &str = "Unable to reach API";

/// Kind of an [`ApiError`], for callers that branch on the failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// No credential could be obtained
    Auth,
    /// No response was received, or no gate slot became free in time
    Network,
    /// The API answered with a non-2xx status
    Http,
    /// The circuit breaker rejected the call without sending it
    CircuitOpen,
    /// A request or response body did not match the expected JSON
    InvalidPayload,
    /// The client was built with unusable settings
    Config,
}

/// API operation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Authentication failed: {detail}")]
    Auth { status: Option<u16>, detail: String },

    #[error("Network error: {detail}")]
    Network { detail: String },

    #[error("API Error {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Invalid payload: {detail}")]
    InvalidPayload { detail: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Auth { .. } => ApiErrorKind::Auth,
            Self::Network { .. } => ApiErrorKind::Network,
            Self::Http { .. } => ApiErrorKind::Http,
            Self::CircuitOpen => ApiErrorKind::CircuitOpen,
            Self::InvalidPayload { .. } => ApiErrorKind::InvalidPayload,
            Self::Config(_) => ApiErrorKind::Config,
        }
    }

    /// HTTP status of the response that caused the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Auth { status, .. } => *status,
            _ => None,
        }
    }

    /// Human-readable detail without the kind prefix
    pub fn detail(&self) -> String {
        match self {
            Self::Auth { detail, .. }
            | Self::Network { detail }
            | Self::Http { detail, .. }
            | Self::InvalidPayload { detail } => detail.clone(),
            Self::CircuitOpen => "circuit breaker rejected the call".to_string(),
            Self::Config(message) => message.clone(),
        }
    }

    /// Build an [`ApiError::Http`] from a raw response body
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::Http { status, detail: extract_detail(body) }
    }

    pub(crate) fn unreachable() -> Self {
        Self::Network { detail: UNREACHABLE_DETAIL.to_string() }
    }
}

/// Pull a readable detail out of an error body
///
/// Prefers the JSON `detail` field, then `message`, then the raw text.
pub fn extract_detail(body: &str) -> String {
    let text = body.trim();
    if text.is_empty() {
        return UNKNOWN_ERROR_DETAIL.to_string();
    }

    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(text) {
        for key in ["detail", "message"] {
            match fields.get(key) {
                Some(serde_json::Value::String(value)) if !value.is_empty() => {
                    return value.clone();
                }
                Some(value) if !value.is_null() && !value.is_string() => return value.to_string(),
                _ => {}
            }
        }
    }

    text.to_string()
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network { .. } => Self::unreachable(),
            TransportError::Status { status, body } => Self::from_response(status, &body),
            TransportError::Build { message } => Self::Config(message),
        }
    }
}

impl From<CircuitBreakerError<TransportError>> for ApiError {
    fn from(err: CircuitBreakerError<TransportError>) -> Self {
        match err {
            CircuitBreakerError::Open => Self::CircuitOpen,
            CircuitBreakerError::OperationFailed { source } => source.into(),
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Timeout { timeout } => Self::Network {
                detail: format!("No request slot became free within {timeout:?}"),
            },
            GateError::Closed => Self::Network { detail: "Request gate is closed".to_string() },
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth { status: err.status(), detail: err.to_string() }
    }
}
