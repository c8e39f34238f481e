//! Retry queue queries.
//!
//! A job is enqueued before dispatch and removed once its response has been
//! delivered, so anything left behind for longer than the replay window was
//! abandoned and can be resubmitted.

use super::db::{DatabaseError, now_millis};

use super::db::RelayDatabase;
use super::models::QueuedJob;

impl RelayDatabase {
    /// Record a job as pending. Returns false if the job was already queued;
    /// the existing entry and its timestamp are left untouched.
    pub async fn enqueue_job(
        &self,
        tenant: &str,
        job_token: &str,
        request: &str,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO request_queue (tenant, job_token, request, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tenant)
        .bind(job_token)
        .bind(request)
        .bind(now_millis())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove a delivered job. Returns false if it was not queued.
    pub async fn dequeue_job(&self, tenant: &str, job_token: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM request_queue WHERE tenant = ? AND job_token = ?")
            .bind(tenant)
            .bind(job_token)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Jobs queued at or before `older_than_ms` (milliseconds since epoch),
    /// oldest first.
    pub async fn find_stale_jobs(
        &self,
        tenant: &str,
        older_than_ms: i64,
    ) -> Result<Vec<QueuedJob>, DatabaseError> {
        let jobs = sqlx::query_as::<_, QueuedJob>(
            "SELECT * FROM request_queue WHERE tenant = ? AND created_at <= ? ORDER BY created_at ASC",
        )
        .bind(tenant)
        .bind(older_than_ms)
        .fetch_all(self.pool())
        .await?;

        Ok(jobs)
    }

    /// Number of jobs pending for a tenant.
    pub async fn count_queued_jobs(&self, tenant: &str) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM request_queue WHERE tenant = ?")
            .bind(tenant)
            .fetch_one(self.pool())
            .await?;

        Ok(count.0)
    }
}
