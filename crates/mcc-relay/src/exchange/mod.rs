//! Mobile Comm Center (message exchange) integration.
//!
//! The relay only ever talks to the exchange through the [`Exchange`] trait;
//! [`MccClient`] is the HTTP implementation.

mod client;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{KeyResolutionEntry, RawPacket, ResponsePacket, UserRegistration};

pub use client::MccClient;

/// Exchange call errors.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("Exchange unreachable: {0}")]
    ConnectionRefused(String),

    #[error("Exchange request timed out")]
    Timeout,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Exchange returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Exchange request failed: {0}")]
    Request(String),

    #[error("Unexpected exchange response: {0}")]
    Decode(String),
}

impl ExchangeError {
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        if status == 413 {
            Self::PayloadTooLarge
        } else {
            Self::Status { status, body }
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::ConnectionRefused(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Operations the relay performs against the exchange.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Onboarding requests waiting for a device key to be unwrapped.
    async fn pending_key_resolutions(&self) -> Result<Vec<KeyResolutionEntry>, ExchangeError>;

    /// Request fragments waiting to be relayed.
    async fn pending_packets(&self) -> Result<Vec<RawPacket>, ExchangeError>;

    /// Post one response fragment and wait for the acknowledgement.
    async fn post_packet(&self, packet: &ResponsePacket<'_>) -> Result<(), ExchangeError>;

    /// Announce a relay user and its public key.
    async fn register_user(&self, registration: &UserRegistration<'_>)
    -> Result<(), ExchangeError>;
}
