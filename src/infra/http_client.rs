//! HTTP client factory with consistent timeout configuration.
//!
//! Provider and email clients are built here rather than constructing `reqwest::Client`
//! directly, so every outbound call carries a connect and a total timeout.

use reqwest::Client;
use std::time::Duration;

/// Default connect timeout (TCP handshake + TLS).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default request timeout (total request/response time).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an HTTP client with the default timeouts.
///
/// Panics if the client cannot be built (e.g., TLS misconfiguration). Only called from
/// startup constructors; the app cannot function without HTTP clients.
pub fn build_client() -> Client {
    build_client_with_timeout(DEFAULT_REQUEST_TIMEOUT)
}

/// Build an HTTP client whose total request time is capped at `request_timeout`.
pub fn build_client_with_timeout(request_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(request_timeout))
        .timeout(request_timeout)
        .build()
        .expect("Failed to build HTTP client")
}
