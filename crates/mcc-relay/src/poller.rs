//! The relay's fixed-interval poll loop.
//!
//! Every tick resolves pending device keys, then starts two background
//! dispatches: fresh requests from the exchange, and stale retry-queue
//! entries being replayed. Each source runs at most once at a time; a tick
//! that finds a source still busy skips it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use mcc_relay_core::RelayConfig;

use crate::assembler::assemble;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::exchange::{Exchange, ExchangeError};
use crate::job::RelayJob;
use crate::pipeline::JobProcessor;
use crate::resolver::{KeyResolver, ResolveOutcome};
use crate::storage::{RelayDatabase, now_millis};

/// Minimum gap between two "exchange unreachable" reports.
const UNREACHABLE_REPORT_COOLDOWN: Duration = Duration::from_secs(120);

/// Clears an in-flight flag when dropped.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    /// Claim the flag, or `None` if it is already set.
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Rate limit for repeated reports of the same condition.
#[derive(Debug)]
struct ReportThrottle {
    cooldown: Duration,
    last: Option<Instant>,
}

impl ReportThrottle {
    const fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    fn should_report(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.cooldown => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// What one tick started.
#[derive(Debug, Default)]
pub struct PollTick {
    pub resolved: Vec<ResolveOutcome>,
    /// Dispatch of fresh exchange requests, if one was started.
    pub fresh: Option<JoinHandle<DispatchSummary>>,
    /// Dispatch of replayed queue entries, if one was started.
    pub replay: Option<JoinHandle<DispatchSummary>>,
}

pub struct Poller {
    config: RelayConfig,
    db: RelayDatabase,
    exchange: Arc<dyn Exchange>,
    resolver: KeyResolver,
    processor: Arc<JobProcessor>,
    dispatcher: Dispatcher,
    fresh_in_flight: Arc<AtomicBool>,
    replay_in_flight: Arc<AtomicBool>,
    unreachable: Mutex<ReportThrottle>,
}

impl Poller {
    pub fn new(
        config: RelayConfig,
        db: RelayDatabase,
        exchange: Arc<dyn Exchange>,
        processor: Arc<JobProcessor>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.mcc.num_parallel_requests);
        Self {
            resolver: KeyResolver::new(db.clone()),
            config,
            db,
            exchange,
            processor,
            dispatcher,
            fresh_in_flight: Arc::new(AtomicBool::new(false)),
            replay_in_flight: Arc::new(AtomicBool::new(false)),
            unreachable: Mutex::new(ReportThrottle::new(UNREACHABLE_REPORT_COOLDOWN)),
        }
    }

    /// Poll until `shutdown` changes or its sender is dropped.
    ///
    /// Dispatches already running when the loop stops are left to finish on
    /// their own.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.poll_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            period_ms = period.as_millis(),
            enabled = self.config.enabled,
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let _tick = self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    info!("Poller stopping");
                    break;
                }
            }
        }
    }

    /// Run one tick.
    pub async fn poll_once(self: &Arc<Self>) -> PollTick {
        let mut tick = PollTick::default();
        if !self.config.enabled {
            return tick;
        }

        match self.exchange.pending_key_resolutions().await {
            Ok(entries) => tick.resolved = self.resolver.resolve_all(&entries).await,
            Err(e) => self.report_exchange_error("initresolve", &e).await,
        }

        if let Some(guard) = InFlightGuard::acquire(&self.fresh_in_flight) {
            let poller = Arc::clone(self);
            tick.fresh = Some(tokio::spawn(async move {
                let _guard = guard;
                poller.dispatch_fresh().await
            }));
        } else {
            debug!("Fresh requests still in flight, skipping");
        }

        if let Some(guard) = InFlightGuard::acquire(&self.replay_in_flight) {
            let poller = Arc::clone(self);
            tick.replay = Some(tokio::spawn(async move {
                let _guard = guard;
                poller.dispatch_replay().await
            }));
        } else {
            debug!("Queue replay still in flight, skipping");
        }

        tick
    }

    async fn dispatch_fresh(&self) -> DispatchSummary {
        let rows = match self.exchange.pending_packets().await {
            Ok(rows) => rows,
            Err(e) => {
                self.report_exchange_error("relayrequest", &e).await;
                return DispatchSummary::default();
            }
        };
        let jobs = assemble(rows, self.config.missing_packets);
        if !jobs.is_empty() {
            info!(count = jobs.len(), "Dispatching relay requests");
        }
        self.dispatch(jobs).await
    }

    async fn dispatch_replay(&self) -> DispatchSummary {
        let window = i64::try_from(self.config.replay_window().as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(window);

        let tenants = &self.config.replay_tenants;
        let scans = join_all(
            tenants
                .iter()
                .map(|tenant| self.db.find_stale_jobs(tenant, cutoff)),
        )
        .await;

        let mut jobs = Vec::new();
        for (tenant, scan) in tenants.iter().zip(scans) {
            let entries = match scan {
                Ok(entries) => entries,
                Err(e) => {
                    error!(tenant = %tenant, error = %e, "Retry queue scan failed");
                    continue;
                }
            };
            for entry in entries {
                match serde_json::from_str::<RelayJob>(&entry.request) {
                    Ok(mut job) => {
                        job.suppress_errors = true;
                        jobs.push(job);
                    }
                    Err(e) => {
                        warn!(
                            tenant = %tenant,
                            job_token = %entry.job_token,
                            error = %e,
                            "Discarding unreadable queue entry"
                        );
                        if let Err(e) = self.db.dequeue_job(tenant, &entry.job_token).await {
                            warn!(error = %e, "Failed to discard queue entry");
                        }
                    }
                }
            }
        }

        if !jobs.is_empty() {
            info!(count = jobs.len(), "Replaying stale jobs");
        }
        self.dispatch(jobs).await
    }

    async fn dispatch(&self, jobs: Vec<RelayJob>) -> DispatchSummary {
        if jobs.is_empty() {
            return DispatchSummary::default();
        }
        let processor = Arc::clone(&self.processor);
        self.dispatcher
            .run(jobs, move |job| {
                let processor = Arc::clone(&processor);
                async move { processor.handle(job).await }
            })
            .await
    }

    async fn report_exchange_error(&self, source: &str, e: &ExchangeError) {
        if matches!(e, ExchangeError::ConnectionRefused(_)) {
            if self.unreachable.lock().await.should_report(Instant::now()) {
                error!(source, error = %e, "Exchange unreachable");
            } else {
                debug!(source, "Exchange still unreachable");
            }
        } else {
            error!(source, error = %e, "Exchange call failed");
        }
    }
}
