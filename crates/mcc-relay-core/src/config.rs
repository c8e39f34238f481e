//! Configuration resolution for the MCC relay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. JSON config file (optional, `--config`)
//! 3. Environment variables (`RELAY_*`)
//! 4. CLI arguments (applied by the binary, highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Master switch for the whole relay subsystem.
    pub enabled: bool,
    pub mcc: MccConfig,
    pub api: ApiConfig,
    /// Tenants whose retry queues are scanned for stale jobs.
    pub replay_tenants: Vec<String>,
    /// What to do with a job whose packet set has a gap.
    pub missing_packets: MissingPacketPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mcc: MccConfig::default(),
            api: ApiConfig::default(),
            replay_tenants: vec!["admin".to_string()],
            missing_packets: MissingPacketPolicy::Deliver,
        }
    }
}

impl RelayConfig {
    /// Interval between two exchange polls.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.mcc.poll_frequency_ms)
    }

    /// Age after which a retry-queue entry is considered abandoned.
    pub const fn replay_window(&self) -> Duration {
        Duration::from_millis(self.mcc.poll_frequency_ms.saturating_mul(2))
    }
}

/// Connection settings for the Mobile Comm Center (the message exchange).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MccConfig {
    /// Base URL of the exchange, including port.
    pub url: String,
    /// Shared secret sent as the `authorization` header.
    pub access_token: String,
    /// Poll period in milliseconds.
    pub poll_frequency_ms: u64,
    /// Largest encrypted fragment posted back to the exchange, in bytes.
    pub max_packet_size: usize,
    /// Number of dispatch lanes.
    pub num_parallel_requests: usize,
    pub request_timeout_secs: u64,
    pub registration_timeout_secs: u64,
}

impl Default for MccConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:1337".to_string(),
            access_token: "There is no spoon.".to_string(),
            poll_frequency_ms: 5_000,
            max_packet_size: 1024 * 1024, // 1 MiB
            num_parallel_requests: 15,
            request_timeout_secs: 30,
            registration_timeout_secs: 8,
        }
    }
}

/// Connection settings for the internal API the relay forwards to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub url: String,
    /// Skip TLS certificate verification for the internal API.
    pub accept_invalid_certs: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: "http://api_sails:1337".to_string(),
            accept_invalid_certs: false,
        }
    }
}

/// Policy applied when a job arrives with a missing packet index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingPacketPolicy {
    /// Report the gap and forward whatever bytes were received.
    #[default]
    Deliver,
    /// Report the gap and discard the job.
    Drop,
}

impl std::str::FromStr for MissingPacketPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deliver" => Ok(Self::Deliver),
            "drop" => Ok(Self::Drop),
            other => Err(Error::Config(format!(
                "Unknown missing packet policy: {other}"
            ))),
        }
    }
}

/// Load configuration: defaults, then the optional file, then environment.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let mut config = match path {
        Some(path) => load_config_file(path)?,
        None => RelayConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {e}", path.display()))
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn apply_env_overrides(config: &mut RelayConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(enabled) = var("RELAY_ENABLE").as_deref().and_then(parse_bool) {
        config.enabled = enabled;
    }
    if let Some(url) = var("RELAY_SERVER_URL") {
        config.mcc.url = url;
    }
    if let Some(token) = var("RELAY_SERVER_TOKEN") {
        config.mcc.access_token = token;
    }
    if let Some(n) = var("RELAY_POLL_FREQUENCY").and_then(|v| v.parse().ok()) {
        config.mcc.poll_frequency_ms = n;
    }
    if let Some(n) = var("RELAY_MAX_PACKET_SIZE").and_then(|v| v.parse().ok()) {
        config.mcc.max_packet_size = n;
    }
    if let Some(n) = var("RELAY_NUM_PARALLEL").and_then(|v| v.parse().ok()) {
        config.mcc.num_parallel_requests = n;
    }
    if let Some(url) = var("RELAY_API_URL") {
        config.api.url = url;
    }
}
