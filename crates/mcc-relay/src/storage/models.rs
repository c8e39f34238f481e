//! Data models for relay storage.

use serde::{Deserialize, Serialize};

/// The relay-side identity of one site account.
///
/// `mcc_user` is the identifier the exchange knows this user by; it is
/// generated independently of `site_user` and the two are never equal.
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RelayUser {
    pub id: i64,
    pub tenant: String,
    pub mcc_user: String,
    pub site_user: String,
    pub rsa_private_key: Option<String>,
    pub rsa_public_key: Option<String>,
    pub registration_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl std::fmt::Debug for RelayUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayUser")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("mcc_user", &self.mcc_user)
            .field("site_user", &self.site_user)
            .field("has_keys", &self.rsa_private_key.is_some())
            .finish_non_exhaustive()
    }
}

/// One mobile app installation bound to a relay user and its AES key.
#[derive(Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceSession {
    pub id: i64,
    pub tenant: String,
    pub app_uuid: String,
    pub relay_user_id: i64,
    pub aes_key: String,
    pub app_id: Option<String>,
    pub created_at: i64,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("app_uuid", &self.app_uuid)
            .field("relay_user_id", &self.relay_user_id)
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// What the relay needs to serve a request from a device.
#[derive(Clone, sqlx::FromRow)]
pub struct RequestUserInfo {
    pub aes_key: String,
    pub mcc_user: String,
    pub site_user: String,
}

impl std::fmt::Debug for RequestUserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestUserInfo")
            .field("mcc_user", &self.mcc_user)
            .field("site_user", &self.site_user)
            .finish_non_exhaustive()
    }
}

/// A retry-queue row. `request` holds the serialized job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueuedJob {
    pub tenant: String,
    pub job_token: String,
    pub request: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}
