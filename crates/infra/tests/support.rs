#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use keyline_common::auth::{ProviderConfig, TokenProvider};
use keyline_common::resilience::{RetryConfig, SystemClock};
use keyline_infra::api::{ApiClient, ApiClientBuilder};
use keyline_infra::observability::InMemoryMetrics;
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth/token";

static TRACING: Once = Once::new();

/// Install a test tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

/// Retry policy with millisecond delays so retry tests stay fast.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::builder().base_delay(Duration::from_millis(10)).build().expect("retry config")
}

pub fn token_body(access_token: &str, expires_in: u64) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": expires_in,
        "token_type": "Bearer",
    })
}

/// Mount a client-credentials token endpoint that must be hit `expected` times.
pub async fn mount_token(server: &MockServer, access_token: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token, 3600)))
        .expect(expected)
        .mount(server)
        .await;
}

pub fn provider_for(server: &MockServer, metrics: Arc<InMemoryMetrics>) -> TokenProvider {
    let config = ProviderConfig::new(format!("{}{TOKEN_PATH}", server.uri()), "c1", "s1")
        .with_retry(fast_retry());
    TokenProvider::builder(config).metrics(metrics).build().expect("token provider")
}

/// API client builder pointed at `server` for both tokens and resources.
pub fn client_builder(
    server: &MockServer,
    metrics: Arc<InMemoryMetrics>,
) -> ApiClientBuilder<SystemClock> {
    let provider = provider_for(server, Arc::clone(&metrics));
    ApiClient::builder(Arc::new(provider))
        .base_url(server.uri())
        .retry(fast_retry())
        .metrics(metrics)
}
