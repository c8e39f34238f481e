//! HTTP client for the exchange.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use mcc_relay_core::config::MccConfig;

use super::{Exchange, ExchangeError};
use crate::job::{KeyResolutionEntry, RawPacket, ResponsePacket, UserRegistration};

/// `{ "data": [...] }` listing envelope. Rows are decoded one by one.
#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<Value>,
}

/// Decode listing rows, skipping any that do not match `T`.
pub(crate) fn decode_rows<T: DeserializeOwned>(path: &str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value(row) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(path, index, error = %e, "Skipping malformed listing row");
                None
            }
        })
        .collect()
}

/// reqwest-based [`Exchange`] implementation.
#[derive(Debug, Clone)]
pub struct MccClient {
    http: reqwest::Client,
    base_url: String,
    registration_timeout: Duration,
}

impl MccClient {
    /// Build a client that authenticates every call with the shared secret.
    pub fn new(config: &MccConfig) -> Result<Self, ExchangeError> {
        let mut headers = HeaderMap::new();
        let secret = HeaderValue::from_str(&config.access_token)
            .map_err(|_| ExchangeError::Request("Invalid access token format".into()))?;
        headers.insert(AUTHORIZATION, secret);

        // reqwest uses rustls-no-provider; Err means a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            registration_timeout: Duration::from_secs(config.registration_timeout_secs),
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ExchangeError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ExchangeError::from_status(status.as_u16(), body))
    }

    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, ExchangeError> {
        let resp = self.http.get(self.url(path)).send().await?;
        let resp = Self::check_status(resp).await?;
        let listing: Listing = resp.json().await?;
        Ok(decode_rows(path, listing.data))
    }
}

#[async_trait]
impl Exchange for MccClient {
    async fn pending_key_resolutions(&self) -> Result<Vec<KeyResolutionEntry>, ExchangeError> {
        self.list("/mcc/initresolve").await
    }

    async fn pending_packets(&self) -> Result<Vec<RawPacket>, ExchangeError> {
        self.list("/mcc/relayrequest").await
    }

    async fn post_packet(&self, packet: &ResponsePacket<'_>) -> Result<(), ExchangeError> {
        debug!(
            job_token = %packet.job_token,
            packet = packet.packet,
            total = packet.total_packets,
            "Posting response packet"
        );
        let resp = self
            .http
            .post(self.url("/mcc/relayrequest"))
            .json(packet)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn register_user(
        &self,
        registration: &UserRegistration<'_>,
    ) -> Result<(), ExchangeError> {
        let resp = self
            .http
            .post(self.url("/mcc/user"))
            .timeout(self.registration_timeout)
            .json(registration)
            .send()
            .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}
