//! Wire and job types shared by the exchange client and the engine.

use serde::{Deserialize, Serialize};

/// One fragment of a device request, as listed by the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPacket {
    #[serde(rename = "appUUID")]
    pub app_uuid: String,
    pub job_token: String,
    /// Zero-based fragment index; absent means 0.
    #[serde(default)]
    pub packet: Option<usize>,
    /// Declared fragment count; absent means 1.
    #[serde(default)]
    pub total_packets: Option<usize>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "tenantUUID")]
    pub tenant: String,
}

impl RawPacket {
    pub fn index(&self) -> usize {
        self.packet.unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.total_packets.unwrap_or(1)
    }
}

/// A reassembled device request, ready to dispatch.
///
/// This is also the shape persisted in the retry queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayJob {
    #[serde(rename = "appUUID")]
    pub app_uuid: String,
    pub job_token: String,
    /// Encrypted request token.
    pub data: String,
    #[serde(rename = "tenantUUID")]
    pub tenant: String,
    /// Set on queue replays: failures are logged quietly.
    #[serde(default)]
    pub suppress_errors: bool,
}

/// A pending device onboarding: the device's AES key wrapped with the relay
/// user's RSA public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyResolutionEntry {
    #[serde(rename = "tenantUUID")]
    pub tenant: String,
    #[serde(rename = "appUUID")]
    pub app_uuid: String,
    #[serde(rename = "appID", default)]
    pub app_id: Option<String>,
    pub rsa_aes: String,
    /// Exchange-side relay user id.
    pub user: String,
}

/// One fragment of an encrypted response, posted back to the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePacket<'a> {
    #[serde(rename = "appUUID")]
    pub app_uuid: &'a str,
    pub data: &'a str,
    pub job_token: &'a str,
    pub packet: usize,
    pub total_packets: usize,
}

/// Relay user announcement sent to the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistration<'a> {
    pub user: &'a str,
    pub token_hash: &'a str,
    pub rsa: &'a str,
}
