//! In-process fakes for the exchange and the internal API, plus fixtures.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde_json::{Value, json};

use mcc_relay_crypto::{RelayKeyPair, decrypt, encrypt};

use crate::exchange::{Exchange, ExchangeError};
use crate::job::{KeyResolutionEntry, RawPacket, RelayJob, ResponsePacket, UserRegistration};
use crate::storage::{NewDeviceSession, RelayDatabase};
use crate::upstream::{ApiCall, Upstream, UpstreamError};

pub const TENANT: &str = "admin";
pub const APP_UUID: &str = "app-1";
pub const MCC_USER: &str = "mcc-1";
pub const SITE_USER: &str = "site-1";

pub struct TestKeys {
    pub private_pem: String,
    pub public_pem: String,
}

impl TestKeys {
    /// Wrap an AES key the way a device does during onboarding.
    pub fn wrap(&self, aes_hex: &str) -> String {
        let public = RsaPublicKey::from_public_key_pem(&self.public_pem).unwrap();
        let plaintext = json!({ "aesKey": aes_hex }).to_string();
        let ct = public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext.as_bytes())
            .unwrap();
        BASE64.encode(ct)
    }
}

/// RSA generation is slow in debug builds, so tests share one pair.
pub fn test_keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let pair = RelayKeyPair::generate(1024).unwrap();
        TestKeys {
            private_pem: pair.private_pem.to_string(),
            public_pem: pair.public_pem,
        }
    })
}

pub fn random_aes_key() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    hex::encode(key)
}

/// An in-memory database with one relay user and one device session.
pub async fn seeded_db(aes_key: &str) -> RelayDatabase {
    let db = RelayDatabase::open_in_memory().await.unwrap();
    let user = db
        .create_relay_user(TENANT, MCC_USER, SITE_USER)
        .await
        .unwrap();
    db.create_device_session(&NewDeviceSession {
        tenant: TENANT,
        app_uuid: APP_UUID,
        relay_user_id: user.id,
        aes_key,
        app_id: None,
    })
    .await
    .unwrap();
    db
}

/// A job carrying `request` encrypted for the seeded device.
pub fn encrypted_job(job_token: &str, aes_key: &str, request: &Value) -> RelayJob {
    RelayJob {
        app_uuid: APP_UUID.into(),
        job_token: job_token.into(),
        data: encrypt(request, aes_key).unwrap(),
        tenant: TENANT.into(),
        suppress_errors: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedPacket {
    pub app_uuid: String,
    pub data: String,
    pub job_token: String,
    pub packet: usize,
    pub total_packets: usize,
}

#[derive(Default)]
pub struct FakeExchange {
    pub key_resolutions: Mutex<Vec<KeyResolutionEntry>>,
    pub packets: Mutex<Vec<RawPacket>>,
    pub posted: Mutex<Vec<PostedPacket>>,
    /// `(user, token_hash, rsa)` per registration.
    pub registrations: Mutex<Vec<(String, String, String)>>,
    /// Errors handed out by the next `post_packet` calls, in order.
    pub post_failures: Mutex<VecDeque<ExchangeError>>,
    /// Error returned by both listing calls while set.
    pub list_failure: Mutex<Option<ExchangeError>>,
    pub list_calls: AtomicUsize,
}

impl FakeExchange {
    pub fn posted_for(&self, job_token: &str) -> Vec<PostedPacket> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.job_token == job_token)
            .cloned()
            .collect()
    }

    /// Reassemble and decrypt everything posted for a job.
    pub fn response_for(&self, job_token: &str, aes_key: &str) -> Value {
        let token: String = self
            .posted_for(job_token)
            .iter()
            .map(|p| p.data.as_str())
            .collect();
        decrypt(&token, aes_key).unwrap().into_json().unwrap()
    }

    fn list_result(&self) -> Result<(), ExchangeError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        match self.list_failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Exchange for FakeExchange {
    async fn pending_key_resolutions(&self) -> Result<Vec<KeyResolutionEntry>, ExchangeError> {
        self.list_result()?;
        Ok(std::mem::take(&mut *self.key_resolutions.lock().unwrap()))
    }

    async fn pending_packets(&self) -> Result<Vec<RawPacket>, ExchangeError> {
        self.list_result()?;
        Ok(std::mem::take(&mut *self.packets.lock().unwrap()))
    }

    async fn post_packet(&self, packet: &ResponsePacket<'_>) -> Result<(), ExchangeError> {
        if let Some(e) = self.post_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.posted.lock().unwrap().push(PostedPacket {
            app_uuid: packet.app_uuid.to_string(),
            data: packet.data.to_string(),
            job_token: packet.job_token.to_string(),
            packet: packet.packet,
            total_packets: packet.total_packets,
        });
        Ok(())
    }

    async fn register_user(
        &self,
        registration: &UserRegistration<'_>,
    ) -> Result<(), ExchangeError> {
        self.registrations.lock().unwrap().push((
            registration.user.to_string(),
            registration.token_hash.to_string(),
            registration.rsa.to_string(),
        ));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub url: String,
    pub authorization: String,
    pub csrf_token: Option<String>,
    pub data: Option<Value>,
}

/// Answers calls from a script, then with `{"ok": true}`.
/// Session tokens are handed out as `csrf-1`, `csrf-2`, ...
#[derive(Default)]
pub struct FakeUpstream {
    pub responses: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub token_fetches: AtomicUsize,
    pub fail_token: AtomicBool,
}

impl FakeUpstream {
    pub fn scripted(responses: impl IntoIterator<Item = Result<Value, UpstreamError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch_session_token(&self) -> Result<String, UpstreamError> {
        let n = self.token_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_token.load(Ordering::SeqCst) {
            return Err(UpstreamError::Token("connection refused".into()));
        }
        Ok(format!("csrf-{n}"))
    }

    async fn call(&self, call: &ApiCall<'_>) -> Result<Value, UpstreamError> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: call.request.method.clone(),
            url: call.request.url.clone(),
            authorization: call.authorization.to_string(),
            csrf_token: call.csrf_token.map(ToString::to_string),
            data: call.request.data.clone(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"ok": true})))
    }
}
