//! HTTP transport
//!
//! [`HttpClient`] sends one logical request, retrying transient failures
//! through the shared retry classifier.

pub mod client;

pub use client::{HttpClient, HttpClientBuilder, HttpResponse, RetryScope, TransportError};
