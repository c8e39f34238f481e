//! Per-job relay pipeline.
//!
//! A job is queued, decrypted, replayed against the internal API, and the
//! encrypted response is posted back to the exchange fragment by fragment.
//! The queue entry is removed only once every fragment is acknowledged.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use mcc_relay_core::config::MccConfig;
use mcc_relay_crypto::{chunk, decrypt, encrypt};

use crate::error::RelayError;
use crate::exchange::{Exchange, ExchangeError};
use crate::job::{RelayJob, ResponsePacket};
use crate::retry::retry;
use crate::session::SessionManager;
use crate::storage::RelayDatabase;
use crate::upstream::{ApiCall, ApiRequest, Upstream, UpstreamError, relay_authorization};

/// Attempts per upstream call.
pub const UPSTREAM_ATTEMPTS: u32 = 5;
/// Attempts per response fragment.
pub const POST_ATTEMPTS: u32 = 3;

/// How a job ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered { packets: usize },
    /// Rejected as oversized and removed from the queue.
    Dropped,
}

pub struct JobProcessor {
    db: RelayDatabase,
    exchange: Arc<dyn Exchange>,
    upstream: Arc<dyn Upstream>,
    session: Arc<SessionManager>,
    shared_secret: String,
    max_packet_size: usize,
}

impl JobProcessor {
    pub fn new(
        db: RelayDatabase,
        exchange: Arc<dyn Exchange>,
        upstream: Arc<dyn Upstream>,
        session: Arc<SessionManager>,
        config: &MccConfig,
    ) -> Self {
        Self {
            db,
            exchange,
            upstream,
            session,
            shared_secret: config.access_token.clone(),
            max_packet_size: config.max_packet_size,
        }
    }

    /// Run a job and report any failure.
    ///
    /// Replayed jobs are reported at `warn` level. Only lane-fatal errors
    /// are returned.
    pub async fn handle(&self, job: RelayJob) -> Result<(), RelayError> {
        match self.run(&job).await {
            Ok(outcome) => {
                debug!(job_token = %job.job_token, ?outcome, "Job finished");
                Ok(())
            }
            Err(e) => {
                if job.suppress_errors {
                    warn!(job_token = %job.job_token, error = %e, "Replayed job failed");
                } else {
                    error!(
                        job_token = %job.job_token,
                        tenant = %job.tenant,
                        app_uuid = %job.app_uuid,
                        error = %e,
                        "Relay job failed"
                    );
                }
                if e.is_lane_fatal() { Err(e) } else { Ok(()) }
            }
        }
    }

    /// Run a job through the whole pipeline.
    pub async fn run(&self, job: &RelayJob) -> Result<JobOutcome, RelayError> {
        self.enqueue(job).await;

        let info = self
            .db
            .find_request_user_info(&job.tenant, &job.app_uuid)
            .await?
            .ok_or_else(|| RelayError::UnknownDevice {
                tenant: job.tenant.clone(),
                app_uuid: job.app_uuid.clone(),
            })?;

        let payload = decrypt(&job.data, &info.aes_key)
            .map_err(RelayError::Decryption)?
            .into_json()
            .ok_or_else(|| RelayError::InvalidRequest("payload is not JSON".into()))?;
        let request = ApiRequest::from_payload(payload).map_err(RelayError::InvalidRequest)?;

        let response = match self.call_upstream(&request, &info.site_user).await {
            Ok(body) => body,
            Err(RelayError::PayloadTooLarge) => return self.drop_oversized(job).await,
            Err(e) => return Err(e),
        };

        let packets = match self.deliver(job, &info.aes_key, &response).await {
            Ok(packets) => packets,
            Err(RelayError::PayloadTooLarge) => return self.drop_oversized(job).await,
            Err(e) => return Err(e),
        };

        self.db.dequeue_job(&job.tenant, &job.job_token).await?;
        info!(
            job_token = %job.job_token,
            method = %request.method,
            url = %request.url,
            packets,
            "Job delivered"
        );
        Ok(JobOutcome::Delivered { packets })
    }

    async fn enqueue(&self, job: &RelayJob) {
        let request = match serde_json::to_string(job) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    job_token = %job.job_token,
                    error = %e,
                    "Failed to serialize job for retry queue"
                );
                return;
            }
        };
        match self.db.enqueue_job(&job.tenant, &job.job_token, &request).await {
            Ok(true) => debug!(job_token = %job.job_token, "Job queued"),
            Ok(false) => debug!(job_token = %job.job_token, "Job already queued"),
            Err(e) => warn!(job_token = %job.job_token, error = %e, "Failed to queue job"),
        }
    }

    async fn drop_oversized(&self, job: &RelayJob) -> Result<JobOutcome, RelayError> {
        warn!(job_token = %job.job_token, "Payload too large, dropping job");
        self.db.dequeue_job(&job.tenant, &job.job_token).await?;
        Ok(JobOutcome::Dropped)
    }

    /// Call the internal API, retrying dropped connections and one session
    /// token rejection.
    ///
    /// Dropped connections that outlast every attempt and a repeated
    /// rejection fail the job, leaving it queued for replay. Other failures
    /// become an error document for the device.
    async fn call_upstream(
        &self,
        request: &ApiRequest,
        site_user: &str,
    ) -> Result<Value, RelayError> {
        let authorization = relay_authorization(&self.shared_secret, site_user);
        let mut auth_rejections = 0u32;

        let result = retry(
            UPSTREAM_ATTEMPTS,
            |attempt| {
                let authorization = authorization.as_str();
                async move {
                    let csrf_token = if request.is_idempotent() {
                        None
                    } else {
                        Some(self.session.token().await?)
                    };
                    let call = ApiCall {
                        request,
                        authorization,
                        csrf_token: csrf_token.as_deref(),
                    };
                    debug!(
                        attempt,
                        method = %request.method,
                        url = %request.url,
                        "Upstream attempt"
                    );
                    match self.upstream.call(&call).await {
                        Err(UpstreamError::Forbidden(body)) => {
                            self.session.invalidate().await;
                            Err(UpstreamError::Forbidden(body))
                        }
                        other => other,
                    }
                }
            },
            |e| match e {
                UpstreamError::SocketHangUp(_) => true,
                UpstreamError::Forbidden(_) => {
                    auth_rejections += 1;
                    auth_rejections < 2
                }
                _ => false,
            },
        )
        .await;

        match result {
            Ok(body) => Ok(body),
            Err(UpstreamError::Application(mut body)) => {
                if let Value::Object(fields) = &mut body {
                    fields.insert("_request".into(), request.echo());
                }
                Ok(body)
            }
            Err(UpstreamError::Token(message)) => Err(RelayError::SessionToken(message)),
            Err(UpstreamError::PayloadTooLarge) => Err(RelayError::PayloadTooLarge),
            Err(e @ (UpstreamError::Forbidden(_) | UpstreamError::SocketHangUp(_))) => {
                Err(e.into())
            }
            Err(e) => {
                warn!(
                    method = %request.method,
                    url = %request.url,
                    error = %e,
                    "Upstream call failed"
                );
                Ok(error_document(&e))
            }
        }
    }

    /// Encrypt the response and post it fragment by fragment.
    async fn deliver(
        &self,
        job: &RelayJob,
        aes_key: &str,
        response: &Value,
    ) -> Result<usize, RelayError> {
        let token = encrypt(response, aes_key)?;
        let fragments = chunk(&token, self.max_packet_size);
        let total = fragments.len();

        for (index, fragment) in fragments.into_iter().enumerate() {
            let packet = ResponsePacket {
                app_uuid: &job.app_uuid,
                data: fragment,
                job_token: &job.job_token,
                packet: index,
                total_packets: total,
            };
            retry(
                POST_ATTEMPTS,
                |_| self.exchange.post_packet(&packet),
                |e| !matches!(e, ExchangeError::PayloadTooLarge),
            )
            .await
            .map_err(|source| match source {
                ExchangeError::PayloadTooLarge => RelayError::PayloadTooLarge,
                source => RelayError::Delivery {
                    attempts: POST_ATTEMPTS,
                    source,
                },
            })?;
        }

        Ok(total)
    }
}

/// The document delivered to the device when the call failed outright.
fn error_document(e: &UpstreamError) -> Value {
    let data = match e {
        UpstreamError::Status { body, .. } => body.clone(),
        other => Value::String(other.to_string()),
    };
    json!({
        "status": "error",
        "data": data,
        "message": e.to_string(),
    })
}
