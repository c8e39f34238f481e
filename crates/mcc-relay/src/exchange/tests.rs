//! Tests for the exchange client.
#![allow(clippy::unwrap_used)]

use serde_json::json;

use mcc_relay_core::config::MccConfig;

use super::client::decode_rows;
use super::{ExchangeError, MccClient};
use crate::job::{KeyResolutionEntry, RawPacket};

#[test]
fn trailing_slash_stripped_from_base_url() {
    let config = MccConfig {
        url: "http://mcc:1337/".into(),
        ..MccConfig::default()
    };
    let client = MccClient::new(&config).unwrap();
    assert_eq!(client.url("/mcc/relayrequest"), "http://mcc:1337/mcc/relayrequest");
}

#[test]
fn default_config_creates_client() {
    assert!(MccClient::new(&MccConfig::default()).is_ok());
}

#[test]
fn invalid_access_token_is_rejected() {
    let config = MccConfig {
        access_token: "line\nbreak".into(),
        ..MccConfig::default()
    };
    assert!(matches!(
        MccClient::new(&config),
        Err(ExchangeError::Request(_))
    ));
}

#[test]
fn status_413_maps_to_payload_too_large() {
    assert!(matches!(
        ExchangeError::from_status(413, String::new()),
        ExchangeError::PayloadTooLarge
    ));
    assert!(matches!(
        ExchangeError::from_status(500, "boom".into()),
        ExchangeError::Status { status: 500, .. }
    ));
}

#[test]
fn malformed_packet_rows_are_skipped() {
    let rows = vec![
        json!({"appUUID": "app-1", "jobToken": "j1", "data": "AA", "tenantUUID": "admin"}),
        json!({"appUUID": null, "jobToken": "j2", "data": "BB", "tenantUUID": "admin"}),
        json!({"appUUID": "app-3", "jobToken": "j3", "data": "CC"}),
        json!("not a row"),
        json!({"appUUID": "app-4", "jobToken": "j4", "packet": 1, "totalPackets": 2,
               "data": "DD", "tenantUUID": "t2"}),
    ];

    let packets: Vec<RawPacket> = decode_rows("/mcc/relayrequest", rows);

    let tokens: Vec<&str> = packets.iter().map(|p| p.job_token.as_str()).collect();
    assert_eq!(tokens, ["j1", "j4"]);
    assert_eq!(packets[1].index(), 1);
    assert_eq!(packets[1].tenant, "t2");
}

#[test]
fn malformed_resolution_rows_are_skipped() {
    let rows = vec![
        json!({"tenantUUID": "admin", "appUUID": "app-1", "rsa_aes": "blob", "user": "mcc-1"}),
        json!({"tenantUUID": "admin", "appUUID": "app-2", "user": "mcc-1"}),
    ];

    let entries: Vec<KeyResolutionEntry> = decode_rows("/mcc/initresolve", rows);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].app_uuid, "app-1");
    assert!(entries[0].app_id.is_none());
}
