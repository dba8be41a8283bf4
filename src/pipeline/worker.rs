//! Worker loop: reload, decay and persist one distribution per job

use super::queue::JobQueue;
use super::Job;
use crate::adapter::{self, PersistOutcome};
use crate::clock::SharedClock;
use crate::decay::Rate;
use crate::distribution::Distribution;
use crate::observability::{job_span, SharedMetrics};
use crate::store::{with_deadline, SharedStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn, Instrument};

/// Everything a worker needs besides its queue
#[derive(Clone)]
pub struct WorkerContext {
    pub store: SharedStore,
    pub clock: SharedClock,
    pub default_rate: Rate,
    pub store_timeout: Duration,
    /// Persist attempts per job, conflicts included
    pub max_attempts: u32,
    pub metrics: SharedMetrics,
}

/// What became of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Persisted { attempts: u32 },
    /// Every attempt hit a concurrent change
    Abandoned,
    /// Store unavailable or timed out; not retried
    Failed,
}

pub(crate) async fn run(id: usize, queue: Arc<JobQueue>, ctx: Arc<WorkerContext>) {
    debug!(worker = id, "worker started");
    while let Some(job) = queue.pop().await {
        let span = job_span(id, job.name());
        process(&ctx, job).instrument(span).await;
    }
    debug!(worker = id, "queue closed and drained, worker exiting");
}

async fn reload(ctx: &WorkerContext, name: &str) -> Option<Distribution> {
    let filled = with_deadline(
        ctx.store_timeout,
        adapter::fill(ctx.store.as_ref(), name, ctx.default_rate),
    )
    .await;
    match filled {
        Ok(mut dist) => {
            dist.decay(ctx.clock.now());
            Some(dist)
        }
        Err(e) => {
            warn!(distribution = %name, error = %e, "refresh fill failed, dropping job");
            None
        }
    }
}

/// Run one job to completion.
///
/// A `Snapshot` is persisted as given on the first attempt; every retry
/// reloads from the store.
pub async fn process(ctx: &WorkerContext, job: Job) -> JobOutcome {
    let name = job.name().to_string();
    let mut pending = match job {
        Job::Snapshot(dist) => Some(dist),
        Job::Refresh(_) => None,
    };

    for attempt in 1..=ctx.max_attempts.max(1) {
        let dist = match pending.take() {
            Some(dist) => dist,
            None => match reload(ctx, &name).await {
                Some(dist) => dist,
                None => {
                    ctx.metrics.record_dropped("store");
                    return JobOutcome::Failed;
                }
            },
        };

        let started = Instant::now();
        let result = with_deadline(ctx.store_timeout, adapter::persist(ctx.store.as_ref(), &dist)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(PersistOutcome::Applied) => {
                ctx.metrics.record_persist("applied", elapsed_ms);
                debug!(distribution = %name, attempt, total = dist.total, "persisted");
                return JobOutcome::Persisted { attempts: attempt };
            }
            Ok(PersistOutcome::Conflict) => {
                ctx.metrics.record_persist("conflict", elapsed_ms);
                debug!(distribution = %name, attempt, "record changed since fill, reloading");
            }
            Err(e) => {
                ctx.metrics.record_persist("error", elapsed_ms);
                ctx.metrics.record_dropped("store");
                warn!(distribution = %name, error = %e, "persist failed, dropping job");
                return JobOutcome::Failed;
            }
        }
    }

    warn!(
        distribution = %name,
        attempts = ctx.max_attempts,
        "giving up after repeated conflicts"
    );
    ctx.metrics.record_dropped("conflict");
    JobOutcome::Abandoned
}
