//! # Keyline Infrastructure
//!
//! I/O-facing pieces built on `keyline-common`.
//!
//! This crate contains:
//! - The retrying HTTP transport
//! - The authenticated API client facade
//! - Configuration loading from environment and files
//! - An in-memory metrics collector
//!
//! ## Architecture
//! - Resilience primitives and the token provider live in `keyline-common`
//! - Contains all network and filesystem code

pub mod api;
pub mod config;
pub mod http;
pub mod observability;

// Re-export commonly used items
pub use api::{AccessTokenProvider, ApiClient, ApiClientConfig, ApiError, ApiErrorKind};
pub use config::{CoreConfig, LoadError};
pub use http::{HttpClient, HttpResponse, RetryScope, TransportError};
pub use observability::InMemoryMetrics;
