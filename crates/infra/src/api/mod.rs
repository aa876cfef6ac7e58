//! Authenticated resource API client
//!
//! # Architecture
//!
//! - Bearer token from an [`AccessTokenProvider`] (normally the shared
//!   `TokenProvider`), re-acquired once when the API answers `401`
//! - Concurrency gate, then circuit breaker, around a retrying
//!   [`HttpClient`](crate::http::HttpClient)
//! - Every failure normalised to [`ApiError`]
//! - Duration and error metrics tagged by method and templated path

pub mod auth;
pub mod client;
pub mod errors;
pub mod path;

pub use auth::AccessTokenProvider;
pub use client::{
    ApiClient, ApiClientBuilder, ApiClientConfig, DEFAULT_API_URL, REQUEST_DURATION_METRIC,
    REQUEST_ERRORS_METRIC,
};
pub use errors::{extract_detail, ApiError, ApiErrorKind};
pub use path::logical_path;
