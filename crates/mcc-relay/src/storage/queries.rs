//! Relay user and device session queries.

use super::db::{DatabaseError, now_secs};

use super::db::RelayDatabase;
use super::models::{DeviceSession, RelayUser, RequestUserInfo};

/// Parameters for persisting a device session.
pub struct NewDeviceSession<'a> {
    pub tenant: &'a str,
    pub app_uuid: &'a str,
    pub relay_user_id: i64,
    pub aes_key: &'a str,
    pub app_id: Option<&'a str>,
}

impl RelayDatabase {
    // =========================================================================
    // Relay user queries
    // =========================================================================

    /// Create a relay user with no keys and no registration token.
    pub async fn create_relay_user(
        &self,
        tenant: &str,
        mcc_user: &str,
        site_user: &str,
    ) -> Result<RelayUser, DatabaseError> {
        let now = now_secs();

        sqlx::query(
            "INSERT INTO relay_users (tenant, mcc_user, site_user, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(tenant)
        .bind(mcc_user)
        .bind(site_user)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.find_relay_user_by_site_user(tenant, site_user)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Relay user {site_user}")))
    }

    /// Look up a relay user by the identifier the exchange knows it by.
    pub async fn find_relay_user_by_mcc_user(
        &self,
        tenant: &str,
        mcc_user: &str,
    ) -> Result<Option<RelayUser>, DatabaseError> {
        let user = sqlx::query_as::<_, RelayUser>(
            "SELECT * FROM relay_users WHERE tenant = ? AND mcc_user = ?",
        )
        .bind(tenant)
        .bind(mcc_user)
        .fetch_optional(self.pool())
        .await?;

        Ok(user)
    }

    /// Look up a relay user by site account.
    pub async fn find_relay_user_by_site_user(
        &self,
        tenant: &str,
        site_user: &str,
    ) -> Result<Option<RelayUser>, DatabaseError> {
        let user = sqlx::query_as::<_, RelayUser>(
            "SELECT * FROM relay_users WHERE tenant = ? AND site_user = ?",
        )
        .bind(tenant)
        .bind(site_user)
        .fetch_optional(self.pool())
        .await?;

        Ok(user)
    }

    /// Replace a relay user's registration token. Returns false if the user
    /// does not exist.
    pub async fn refresh_registration_token(
        &self,
        tenant: &str,
        site_user: &str,
        token: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE relay_users SET registration_token = ?, updated_at = ? WHERE tenant = ? AND site_user = ?",
        )
        .bind(token)
        .bind(now_secs())
        .bind(tenant)
        .bind(site_user)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store a new RSA key pair for a relay user.
    pub async fn update_relay_user_keys(
        &self,
        tenant: &str,
        site_user: &str,
        private_pem: &str,
        public_pem: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE relay_users SET rsa_private_key = ?, rsa_public_key = ?, updated_at = ? WHERE tenant = ? AND site_user = ?",
        )
        .bind(private_pem)
        .bind(public_pem)
        .bind(now_secs())
        .bind(tenant)
        .bind(site_user)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Device session queries
    // =========================================================================

    /// Persist a device session. Fails if one already exists for the device.
    pub async fn create_device_session(
        &self,
        params: &NewDeviceSession<'_>,
    ) -> Result<DeviceSession, DatabaseError> {
        sqlx::query(
            "INSERT INTO app_users (tenant, app_uuid, relay_user_id, aes_key, app_id, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(params.tenant)
        .bind(params.app_uuid)
        .bind(params.relay_user_id)
        .bind(params.aes_key)
        .bind(params.app_id)
        .bind(now_secs())
        .execute(self.pool())
        .await?;

        self.find_device_session(params.tenant, params.app_uuid)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Device session {}", params.app_uuid)))
    }

    pub async fn find_device_session(
        &self,
        tenant: &str,
        app_uuid: &str,
    ) -> Result<Option<DeviceSession>, DatabaseError> {
        let session = sqlx::query_as::<_, DeviceSession>(
            "SELECT * FROM app_users WHERE tenant = ? AND app_uuid = ?",
        )
        .bind(tenant)
        .bind(app_uuid)
        .fetch_optional(self.pool())
        .await?;

        Ok(session)
    }

    /// Resolve the key and identities needed to serve a device's request.
    pub async fn find_request_user_info(
        &self,
        tenant: &str,
        app_uuid: &str,
    ) -> Result<Option<RequestUserInfo>, DatabaseError> {
        let info = sqlx::query_as::<_, RequestUserInfo>(
            "SELECT au.aes_key, ru.mcc_user, ru.site_user \
             FROM app_users au JOIN relay_users ru ON ru.id = au.relay_user_id \
             WHERE au.tenant = ? AND au.app_uuid = ?",
        )
        .bind(tenant)
        .bind(app_uuid)
        .fetch_optional(self.pool())
        .await?;

        Ok(info)
    }
}
