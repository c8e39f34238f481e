//! Device key resolution.
//!
//! During onboarding a device wraps its freshly generated AES key with the
//! relay user's RSA public key. The exchange queues these blobs; the resolver
//! unwraps each one and persists the resulting device session.

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use mcc_relay_crypto::unwrap_key;

use crate::job::KeyResolutionEntry;
use crate::storage::{NewDeviceSession, RelayDatabase};

/// Result of resolving one onboarding entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Created,
    /// The device already has a session; nothing was changed.
    AlreadyKnown,
    UnknownRelayUser,
    UnwrapFailed,
    StorageFailed,
}

pub struct KeyResolver {
    db: RelayDatabase,
}

impl KeyResolver {
    pub const fn new(db: RelayDatabase) -> Self {
        Self { db }
    }

    /// Resolve a batch concurrently. Outcomes are returned in input order;
    /// a failing entry never affects the others.
    pub async fn resolve_all(&self, entries: &[KeyResolutionEntry]) -> Vec<ResolveOutcome> {
        if entries.is_empty() {
            return Vec::new();
        }
        let outcomes = join_all(entries.iter().map(|entry| self.resolve(entry))).await;
        let created = outcomes
            .iter()
            .filter(|o| **o == ResolveOutcome::Created)
            .count();
        info!(total = entries.len(), created, "Key resolution batch complete");
        outcomes
    }

    pub async fn resolve(&self, entry: &KeyResolutionEntry) -> ResolveOutcome {
        match self.db.find_device_session(&entry.tenant, &entry.app_uuid).await {
            Ok(Some(_)) => {
                debug!(
                    tenant = %entry.tenant,
                    app_uuid = %entry.app_uuid,
                    "Device already resolved"
                );
                return ResolveOutcome::AlreadyKnown;
            }
            Ok(None) => {}
            Err(e) => {
                error!(
                    tenant = %entry.tenant,
                    app_uuid = %entry.app_uuid,
                    error = %e,
                    "Device session lookup failed"
                );
                return ResolveOutcome::StorageFailed;
            }
        }

        let user = match self
            .db
            .find_relay_user_by_mcc_user(&entry.tenant, &entry.user)
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(
                    tenant = %entry.tenant,
                    user = %entry.user,
                    "Key resolution for unknown relay user"
                );
                return ResolveOutcome::UnknownRelayUser;
            }
            Err(e) => {
                error!(tenant = %entry.tenant, error = %e, "Relay user lookup failed");
                return ResolveOutcome::StorageFailed;
            }
        };

        let Some(private_key) = user.rsa_private_key.as_deref() else {
            error!(tenant = %entry.tenant, user = %entry.user, "Relay user has no private key");
            return ResolveOutcome::UnwrapFailed;
        };
        let aes_key = match unwrap_key(&entry.rsa_aes, private_key) {
            Ok(key) => key,
            Err(e) => {
                error!(
                    tenant = %entry.tenant,
                    app_uuid = %entry.app_uuid,
                    error = %e,
                    "Failed to unwrap device key"
                );
                return ResolveOutcome::UnwrapFailed;
            }
        };

        let params = NewDeviceSession {
            tenant: &entry.tenant,
            app_uuid: &entry.app_uuid,
            relay_user_id: user.id,
            aes_key: &aes_key,
            app_id: entry.app_id.as_deref(),
        };
        match self.db.create_device_session(&params).await {
            Ok(_) => {
                info!(tenant = %entry.tenant, app_uuid = %entry.app_uuid, "Device session created");
                ResolveOutcome::Created
            }
            Err(e) => {
                error!(
                    tenant = %entry.tenant,
                    app_uuid = %entry.app_uuid,
                    error = %e,
                    "Failed to store device session"
                );
                ResolveOutcome::StorageFailed
            }
        }
    }
}
