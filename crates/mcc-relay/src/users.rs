//! Relay user onboarding.
//!
//! Before a device can be paired, the site user it belongs to needs a relay
//! identity: an RSA key pair and an exchange-side user id, announced to the
//! exchange together with a hash of a single-use registration token.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use mcc_relay_crypto::{
    CryptoError, RSA_KEY_BITS, RelayKeyPair, generate_registration_token, hash_registration_token,
};

use crate::error::RelayError;
use crate::exchange::Exchange;
use crate::job::UserRegistration;
use crate::storage::{DatabaseError, RelayDatabase, RelayUser};

/// A relay user ready for device pairing.
#[derive(Clone)]
pub struct InitializedUser {
    pub user: RelayUser,
    /// Fresh single-use token to hand to the device.
    pub registration_token: String,
}

impl std::fmt::Debug for InitializedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializedUser")
            .field("user", &self.user)
            .field("registration_token", &"[REDACTED]")
            .finish()
    }
}

pub struct RelayUsers {
    db: RelayDatabase,
    exchange: Arc<dyn Exchange>,
    key_bits: usize,
}

impl RelayUsers {
    pub fn new(db: RelayDatabase, exchange: Arc<dyn Exchange>) -> Self {
        Self::with_key_bits(db, exchange, RSA_KEY_BITS)
    }

    /// Use a different RSA modulus size for generated keys.
    pub fn with_key_bits(db: RelayDatabase, exchange: Arc<dyn Exchange>, key_bits: usize) -> Self {
        Self {
            db,
            exchange,
            key_bits,
        }
    }

    /// Create or refresh the relay identity of a site user.
    ///
    /// New users get a key pair and a fresh exchange-side id. Existing users
    /// keep their keys unless `overwrite_keys` is set. The registration
    /// token is regenerated every time.
    pub async fn initialize(
        &self,
        tenant: &str,
        site_user: &str,
        overwrite_keys: bool,
    ) -> Result<InitializedUser, RelayError> {
        let existing = self.db.find_relay_user_by_site_user(tenant, site_user).await?;
        let needs_keys = overwrite_keys
            || existing
                .as_ref()
                .is_none_or(|user| user.rsa_private_key.is_none());

        let keys = if needs_keys {
            let bits = self.key_bits;
            let keys = tokio::task::spawn_blocking(move || RelayKeyPair::generate(bits))
                .await
                .map_err(|e| CryptoError::KeyGeneration(e.to_string()))??;
            Some(keys)
        } else {
            None
        };

        if existing.is_none() {
            let mcc_user = Uuid::new_v4().to_string();
            self.db.create_relay_user(tenant, &mcc_user, site_user).await?;
            info!(tenant, site_user, mcc_user = %mcc_user, "Relay user created");
        }

        let registration_token = generate_registration_token();
        self.db
            .refresh_registration_token(tenant, site_user, &registration_token)
            .await?;

        if let Some(keys) = &keys {
            self.db
                .update_relay_user_keys(tenant, site_user, &keys.private_pem, &keys.public_pem)
                .await?;
            info!(tenant, site_user, "Relay user keys generated");
        }

        let user = self
            .db
            .find_relay_user_by_site_user(tenant, site_user)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Relay user {site_user}")))?;

        Ok(InitializedUser {
            user,
            registration_token,
        })
    }

    /// Initialise a relay user and announce it to the exchange.
    ///
    /// A failed announcement is logged; the user is still returned so the
    /// caller can hand out the registration token.
    pub async fn register(
        &self,
        tenant: &str,
        site_user: &str,
        overwrite_keys: bool,
    ) -> Result<InitializedUser, RelayError> {
        let initialized = self.initialize(tenant, site_user, overwrite_keys).await?;
        let token_hash = hash_registration_token(&initialized.registration_token);
        let registration = UserRegistration {
            user: &initialized.user.mcc_user,
            token_hash: &token_hash,
            rsa: initialized.user.rsa_public_key.as_deref().unwrap_or_default(),
        };

        match self.exchange.register_user(&registration).await {
            Ok(()) => info!(tenant, site_user, "Relay user registered with exchange"),
            Err(e) => error!(
                tenant,
                site_user,
                error = %e,
                "Failed to register relay user with exchange"
            ),
        }
        Ok(initialized)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeError;
    use crate::test_support::FakeExchange;

    async fn users() -> (RelayUsers, RelayDatabase, Arc<FakeExchange>) {
        let db = RelayDatabase::open_in_memory().await.unwrap();
        let exchange = Arc::new(FakeExchange::default());
        let users = RelayUsers::with_key_bits(db.clone(), exchange.clone(), 1024);
        (users, db, exchange)
    }

    #[tokio::test]
    async fn initialize_creates_user_with_keys() {
        let (users, _db, _) = users().await;
        let init = users.initialize("admin", "site-1", false).await.unwrap();

        assert_eq!(init.user.site_user, "site-1");
        assert_ne!(init.user.mcc_user, "site-1");
        assert!(Uuid::parse_str(&init.user.mcc_user).is_ok());
        assert!(init.user.rsa_public_key.as_deref().unwrap().contains("PUBLIC KEY"));
        assert!(init.user.rsa_private_key.is_some());
        assert_eq!(init.registration_token.len(), 56);
        assert_eq!(
            init.user.registration_token.as_deref(),
            Some(init.registration_token.as_str())
        );
    }

    #[tokio::test]
    async fn debug_output_hides_registration_token() {
        let (users, _db, _) = users().await;
        let init = users.initialize("admin", "site-1", false).await.unwrap();

        let printed = format!("{init:?}");
        assert!(!printed.contains(&init.registration_token));
        assert!(printed.contains(&init.user.mcc_user));
    }

    #[tokio::test]
    async fn reinitialize_keeps_keys_and_rotates_token() {
        let (users, _db, _) = users().await;
        let first = users.initialize("admin", "site-1", false).await.unwrap();
        let second = users.initialize("admin", "site-1", false).await.unwrap();

        assert_eq!(first.user.id, second.user.id);
        assert_eq!(first.user.mcc_user, second.user.mcc_user);
        assert_eq!(first.user.rsa_public_key, second.user.rsa_public_key);
        assert_ne!(first.registration_token, second.registration_token);
    }

    #[tokio::test]
    async fn overwrite_keys_regenerates_pair() {
        let (users, _db, _) = users().await;
        let first = users.initialize("admin", "site-1", false).await.unwrap();
        let second = users.initialize("admin", "site-1", true).await.unwrap();

        assert_eq!(first.user.mcc_user, second.user.mcc_user);
        assert_ne!(first.user.rsa_public_key, second.user.rsa_public_key);
    }

    #[tokio::test]
    async fn register_announces_user_to_exchange() {
        let (users, _db, exchange) = users().await;
        let init = users.register("admin", "site-1", false).await.unwrap();

        let registrations = exchange.registrations.lock().unwrap().clone();
        assert_eq!(registrations.len(), 1);
        let (user, token_hash, rsa) = &registrations[0];
        assert_eq!(user, &init.user.mcc_user);
        assert_eq!(token_hash, &hash_registration_token(&init.registration_token));
        assert_eq!(Some(rsa.as_str()), init.user.rsa_public_key.as_deref());
    }

    #[tokio::test]
    async fn failed_announcement_still_returns_user() {
        use async_trait::async_trait;

        use crate::job::{KeyResolutionEntry, RawPacket, ResponsePacket};

        struct DownExchange;

        #[async_trait]
        impl Exchange for DownExchange {
            async fn pending_key_resolutions(
                &self,
            ) -> Result<Vec<KeyResolutionEntry>, ExchangeError> {
                Err(ExchangeError::Timeout)
            }
            async fn pending_packets(&self) -> Result<Vec<RawPacket>, ExchangeError> {
                Err(ExchangeError::Timeout)
            }
            async fn post_packet(&self, _: &ResponsePacket<'_>) -> Result<(), ExchangeError> {
                Err(ExchangeError::Timeout)
            }
            async fn register_user(&self, _: &UserRegistration<'_>) -> Result<(), ExchangeError> {
                Err(ExchangeError::Timeout)
            }
        }

        let db = RelayDatabase::open_in_memory().await.unwrap();
        let users = RelayUsers::with_key_bits(db, Arc::new(DownExchange), 1024);
        let init = users.register("admin", "site-1", false).await.unwrap();
        assert!(!init.registration_token.is_empty());
    }
}
