//! Bounded-concurrency job dispatch.
//!
//! A [`Dispatcher`] drains a job list through a fixed number of lanes. Each
//! lane repeatedly claims the next job from a shared queue and runs it to
//! completion, so at most `concurrency` jobs are in flight and jobs start in
//! list order.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::RelayError;

/// Default number of dispatch lanes.
pub const DEFAULT_CONCURRENCY: usize = 15;

/// What a dispatch run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Jobs handed to the handler.
    pub processed: usize,
    /// Lanes that stopped early on a lane-fatal error or a panic.
    pub failed_lanes: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// Create a dispatcher with `concurrency` lanes; zero means the default.
    pub const fn new(concurrency: usize) -> Self {
        let concurrency = if concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            concurrency
        };
        Self { concurrency }
    }

    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every job through `handler` and wait for all lanes to finish.
    ///
    /// A lane whose handler returns an error reports it and stops; its
    /// remaining work is picked up by the other lanes. Jobs left in the
    /// queue once every lane has stopped are not run.
    pub async fn run<T, H, Fut>(&self, jobs: Vec<T>, handler: H) -> DispatchSummary
    where
        T: Send + 'static,
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        if jobs.is_empty() {
            return DispatchSummary::default();
        }

        let lanes = self.concurrency.min(jobs.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let handler = Arc::new(handler);
        debug!(lanes, "Dispatching jobs");

        let mut set = JoinSet::new();
        for lane in 0..lanes {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            set.spawn(async move {
                let mut processed = 0usize;
                loop {
                    let Some(job) = queue.lock().await.pop_front() else {
                        return (processed, false);
                    };
                    processed += 1;
                    if let Err(e) = handler(job).await {
                        error!(lane, error = %e, "Dispatch lane stopped");
                        return (processed, true);
                    }
                }
            });
        }

        let mut summary = DispatchSummary::default();
        while let Some(result) = set.join_next().await {
            match result {
                Ok((processed, failed)) => {
                    summary.processed += processed;
                    if failed {
                        summary.failed_lanes += 1;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Dispatch lane panicked");
                    summary.failed_lanes += 1;
                }
            }
        }

        let left = queue.lock().await.len();
        if left > 0 {
            error!(left, "All dispatch lanes stopped with jobs remaining");
        }
        summary
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}
