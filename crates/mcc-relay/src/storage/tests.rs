//! Storage layer tests for the MCC relay.
#![allow(clippy::unwrap_used)]

use super::db::{RelayDatabase, now_millis, now_secs};
use super::queries::NewDeviceSession;

async fn test_db() -> RelayDatabase {
    RelayDatabase::open_in_memory().await.unwrap()
}

async fn backdate_job(db: &RelayDatabase, tenant: &str, job_token: &str, created_at: i64) {
    sqlx::query("UPDATE request_queue SET created_at = ? WHERE tenant = ? AND job_token = ?")
        .bind(created_at)
        .bind(tenant)
        .bind(job_token)
        .execute(db.pool())
        .await
        .unwrap();
}

// === Relay user tests ===

#[tokio::test]
async fn file_database_creates_directories_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("relay.db");

    let db = RelayDatabase::open(&path).await.unwrap();
    db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();
    db.pool().close().await;
    assert!(path.exists());

    let reopened = RelayDatabase::open(&path).await.unwrap();
    let user = reopened
        .find_relay_user_by_site_user("admin", "site-1")
        .await
        .unwrap();
    assert_eq!(user.unwrap().mcc_user, "mcc-1");
}

#[test]
fn clock_helpers_agree() {
    let secs = now_secs();
    // After 2024-01-01.
    assert!(secs > 1_704_067_200);
    assert!((now_millis() / 1000 - secs).abs() <= 1);
}

#[tokio::test]
async fn create_and_find_relay_user() {
    let db = test_db().await;
    let user = db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();

    assert_eq!(user.tenant, "admin");
    assert_eq!(user.mcc_user, "mcc-1");
    assert_eq!(user.site_user, "site-1");
    assert!(user.rsa_private_key.is_none());
    assert!(user.registration_token.is_none());

    let by_mcc = db
        .find_relay_user_by_mcc_user("admin", "mcc-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_mcc.id, user.id);

    let by_site = db
        .find_relay_user_by_site_user("admin", "site-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_site.id, user.id);
}

#[tokio::test]
async fn relay_users_are_isolated_by_tenant() {
    let db = test_db().await;
    db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();

    assert!(
        db.find_relay_user_by_mcc_user("other", "mcc-1")
            .await
            .unwrap()
            .is_none()
    );
    // The same site user may exist once per tenant.
    db.create_relay_user("other", "mcc-2", "site-1").await.unwrap();
}

#[tokio::test]
async fn duplicate_site_user_is_rejected() {
    let db = test_db().await;
    db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();
    assert!(db.create_relay_user("admin", "mcc-2", "site-1").await.is_err());
}

#[tokio::test]
async fn update_keys_and_registration_token() {
    let db = test_db().await;
    db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();

    assert!(
        db.update_relay_user_keys("admin", "site-1", "PRIVATE", "PUBLIC")
            .await
            .unwrap()
    );
    assert!(
        db.refresh_registration_token("admin", "site-1", "tok")
            .await
            .unwrap()
    );
    assert!(
        !db.refresh_registration_token("admin", "nobody", "tok")
            .await
            .unwrap()
    );

    let user = db
        .find_relay_user_by_site_user("admin", "site-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.rsa_private_key.as_deref(), Some("PRIVATE"));
    assert_eq!(user.rsa_public_key.as_deref(), Some("PUBLIC"));
    assert_eq!(user.registration_token.as_deref(), Some("tok"));
    assert!(!format!("{user:?}").contains("PRIVATE"));
}

// === Device session tests ===

#[tokio::test]
async fn create_device_session_and_resolve_request_info() {
    let db = test_db().await;
    let user = db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();

    let session = db
        .create_device_session(&NewDeviceSession {
            tenant: "admin",
            app_uuid: "app-1",
            relay_user_id: user.id,
            aes_key: "aabb",
            app_id: Some("com.example"),
        })
        .await
        .unwrap();
    assert_eq!(session.app_uuid, "app-1");
    assert_eq!(session.app_id.as_deref(), Some("com.example"));

    let info = db
        .find_request_user_info("admin", "app-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.aes_key, "aabb");
    assert_eq!(info.mcc_user, "mcc-1");
    assert_eq!(info.site_user, "site-1");

    assert!(
        db.find_request_user_info("other", "app-1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn device_session_is_unique_per_device() {
    let db = test_db().await;
    let user = db.create_relay_user("admin", "mcc-1", "site-1").await.unwrap();
    let params = NewDeviceSession {
        tenant: "admin",
        app_uuid: "app-1",
        relay_user_id: user.id,
        aes_key: "aabb",
        app_id: None,
    };

    db.create_device_session(&params).await.unwrap();
    assert!(db.create_device_session(&params).await.is_err());
}

#[tokio::test]
async fn device_session_requires_relay_user() {
    let db = test_db().await;
    let result = db
        .create_device_session(&NewDeviceSession {
            tenant: "admin",
            app_uuid: "app-1",
            relay_user_id: 999,
            aes_key: "aabb",
            app_id: None,
        })
        .await;
    assert!(result.is_err());
}

// === Retry queue tests ===

#[tokio::test]
async fn enqueue_is_idempotent() {
    let db = test_db().await;

    assert!(db.enqueue_job("admin", "job-1", "{\"v\":1}").await.unwrap());
    backdate_job(&db, "admin", "job-1", 1_000).await;
    assert!(!db.enqueue_job("admin", "job-1", "{\"v\":2}").await.unwrap());

    assert_eq!(db.count_queued_jobs("admin").await.unwrap(), 1);
    let jobs = db.find_stale_jobs("admin", 1_000).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].request, "{\"v\":1}");
    assert_eq!(jobs[0].created_at, 1_000);
}

#[tokio::test]
async fn dequeue_removes_entry() {
    let db = test_db().await;
    db.enqueue_job("admin", "job-1", "{}").await.unwrap();

    assert!(db.dequeue_job("admin", "job-1").await.unwrap());
    assert!(!db.dequeue_job("admin", "job-1").await.unwrap());
    assert_eq!(db.count_queued_jobs("admin").await.unwrap(), 0);
}

#[tokio::test]
async fn stale_scan_respects_window_and_tenant() {
    let db = test_db().await;
    let now = now_millis();
    let window = 10_000;

    db.enqueue_job("admin", "old", "{}").await.unwrap();
    db.enqueue_job("admin", "older", "{}").await.unwrap();
    db.enqueue_job("admin", "fresh", "{}").await.unwrap();
    db.enqueue_job("other", "foreign", "{}").await.unwrap();
    backdate_job(&db, "admin", "old", now - window - 1).await;
    backdate_job(&db, "admin", "older", now - window * 3).await;
    backdate_job(&db, "other", "foreign", now - window * 3).await;

    let stale = db.find_stale_jobs("admin", now - window).await.unwrap();
    let tokens: Vec<&str> = stale.iter().map(|j| j.job_token.as_str()).collect();
    assert_eq!(tokens, vec!["older", "old"]);
}
