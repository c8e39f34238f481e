//! Internal API integration.
//!
//! Decrypted device requests are replayed against the internal API through
//! the [`Upstream`] trait; [`ApiClient`] is the HTTP implementation.

mod client;
mod request;


use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use client::ApiClient;
pub use request::{ApiCall, ApiRequest, relay_authorization};

/// Internal API call errors.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The connection dropped before a response arrived.
    #[error("Socket hang up: {0}")]
    SocketHangUp(String),

    /// The session token was rejected (HTTP 403 or a CSRF mismatch).
    #[error("Authentication rejected: {0}")]
    Forbidden(String),

    /// The API answered with a structured `{status: "error"}` body.
    #[error("Application error")]
    Application(Value),

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("API returned {status}")]
    Status { status: u16, body: Value },

    #[error("API request failed: {0}")]
    Request(String),

    #[error("Failed to obtain session token: {0}")]
    Token(String),
}

/// Operations the relay performs against the internal API.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Fetch a fresh session (CSRF) token.
    async fn fetch_session_token(&self) -> Result<String, UpstreamError>;

    /// Perform one relayed call and return the decoded response body.
    async fn call(&self, call: &ApiCall<'_>) -> Result<Value, UpstreamError>;
}
