//! Relay engine errors.

use thiserror::Error;

use mcc_relay_crypto::CryptoError;

use crate::exchange::ExchangeError;
use crate::storage::DatabaseError;
use crate::upstream::UpstreamError;

/// Why a relay job (or a dispatch lane) stopped.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("No device session for {app_uuid} in tenant {tenant}")]
    UnknownDevice { tenant: String, app_uuid: String },

    #[error("Failed to decrypt job payload: {0}")]
    Decryption(CryptoError),

    #[error("Invalid relay request: {0}")]
    InvalidRequest(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Session token unavailable: {0}")]
    SessionToken(String),

    #[error("Upstream call failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Response delivery failed after {attempts} attempts: {source}")]
    Delivery {
        attempts: u32,
        #[source]
        source: ExchangeError,
    },

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl RelayError {
    /// Whether a dispatch lane should stop after this error.
    ///
    /// Job-level failures only end the job. A storage failure means every
    /// following job in the lane would fail the same way.
    pub const fn is_lane_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
