//! Request-layer operations
//!
//! Each operation answers from the store directly and then hands a job to
//! the Update Pipeline. Nothing here persists decayed state.

use crate::adapter::{self, parse_count, parse_timestamp};
use crate::clock::{SharedClock, Timestamp};
use crate::decay::{self, Rate};
use crate::distribution::{
    probability, validate_label, DistributionSnapshot, FieldSnapshot, LAST_UPDATE_KEY, RATE_KEY,
    TOTAL_KEY,
};
use crate::error::{ServiceError, ValidationError};
use crate::observability::{request_span, store_span, SharedMetrics};
use crate::pipeline::{Job, PipelineHandle, WorkerContext};
use crate::store::{with_deadline, SharedStore, Transaction};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{warn, Instrument};

#[derive(Clone)]
pub struct Service {
    store: SharedStore,
    pipeline: PipelineHandle,
    clock: SharedClock,
    default_rate: Rate,
    store_timeout: Duration,
    metrics: SharedMetrics,
}

fn validate_name(distribution: &str) -> Result<(), ValidationError> {
    if distribution.is_empty() {
        return Err(ValidationError::Missing("distribution"));
    }
    Ok(())
}

fn validate_field(field: &str) -> Result<(), ValidationError> {
    if field.is_empty() {
        return Err(ValidationError::Missing("field"));
    }
    validate_label(field)
}

impl Service {
    /// Shares store, clock, default rate, deadline and metrics with the workers
    pub fn new(ctx: &WorkerContext, pipeline: PipelineHandle) -> Self {
        Service {
            store: ctx.store.clone(),
            pipeline,
            clock: ctx.clock.clone(),
            default_rate: ctx.default_rate,
            store_timeout: ctx.store_timeout,
            metrics: ctx.metrics.clone(),
        }
    }

    pub fn default_rate(&self) -> Rate {
        self.default_rate
    }

    async fn timed<T, F>(
        &self,
        operation: &str,
        distribution: &str,
        fut: F,
    ) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let result = fut.instrument(request_span(operation, distribution)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_request(operation, elapsed_ms, result.is_ok());
        result
    }

    async fn enqueue(&self, job: Job) {
        // Failures are logged and counted by the handle.
        let _ = self.pipeline.submit(job).await;
    }

    /// Add `n` to `field`, then schedule a refresh whether or not the write
    /// succeeded.
    pub async fn increment(
        &self,
        distribution: &str,
        field: &str,
        n: u64,
    ) -> Result<(), ServiceError> {
        validate_name(distribution)?;
        validate_field(field)?;
        let by = i64::try_from(n).map_err(|_| ValidationError::Malformed {
            param: "N",
            reason: format!("{} exceeds {}", n, i64::MAX),
        })?;

        let result = self
            .timed("increment", distribution, async {
                let tx = Transaction::new(distribution)
                    .incr_by(field, by)
                    .incr_by(TOTAL_KEY, by)
                    .set_if_absent(LAST_UPDATE_KEY, self.clock.now().as_secs());
                with_deadline(self.store_timeout, self.store.transact(&tx))
                    .instrument(store_span("transact", distribution))
                    .await?;
                Ok::<_, ServiceError>(())
            })
            .await;

        if let Err(e) = &result {
            warn!(distribution = %distribution, field = %field, error = %e, "increment failed");
        }
        self.enqueue(Job::Refresh(distribution.to_string())).await;
        result
    }

    /// Decayed count and probability of one label, read without a full Fill
    pub async fn query_field(
        &self,
        distribution: &str,
        field: &str,
        rate: Option<Rate>,
    ) -> Result<FieldSnapshot, ServiceError> {
        validate_name(distribution)?;
        validate_field(field)?;

        let snapshot = self
            .timed("query_field", distribution, async {
                let keys = [field, TOTAL_KEY, LAST_UPDATE_KEY, RATE_KEY];
                let values =
                    with_deadline(self.store_timeout, self.store.get_fields(distribution, &keys))
                        .instrument(store_span("get_fields", distribution))
                        .await?;
                let now = self.clock.now();
                Ok::<_, ServiceError>(self.field_snapshot(distribution, field, &values, rate, now))
            })
            .await?;

        self.enqueue(Job::Refresh(distribution.to_string())).await;
        Ok(snapshot)
    }

    fn field_snapshot(
        &self,
        distribution: &str,
        field: &str,
        values: &[Option<String>],
        requested: Option<Rate>,
        now: Timestamp,
    ) -> FieldSnapshot {
        let value = |i: usize| values.get(i).and_then(|v| v.as_deref());

        let count = value(0).map_or(0, |v| {
            parse_count(field, v).unwrap_or_else(|e| {
                warn!(distribution = %distribution, error = %e, "treating field as zero");
                0
            })
        });
        let total = value(1).map_or(0, |v| {
            parse_count(TOTAL_KEY, v).unwrap_or_else(|e| {
                warn!(distribution = %distribution, error = %e, "treating total as zero");
                0
            })
        });
        let last_update = value(2).and_then(|v| {
            parse_timestamp(v).unwrap_or_else(|e| {
                warn!(distribution = %distribution, error = %e, "ignoring last-update field");
                None
            })
        });
        let stored_rate = value(3).and_then(|v| Rate::parse(v).ok());
        let rate = requested.or(stored_rate).unwrap_or(self.default_rate);

        let (count, total) = decay::decay(count, total, last_update, rate, now);
        FieldSnapshot {
            distribution: distribution.to_string(),
            field: field.to_string(),
            count,
            total,
            probability: probability(count, total),
            rate,
        }
    }

    /// Full decayed distribution.
    ///
    /// The decayed state is handed to the pipeline verbatim only when it was
    /// decayed with the distribution's own rate.
    pub async fn query_distribution(
        &self,
        distribution: &str,
        rate: Option<Rate>,
    ) -> Result<DistributionSnapshot, ServiceError> {
        validate_name(distribution)?;

        let (snapshot, job) = self
            .timed("query_distribution", distribution, async {
                let mut dist = with_deadline(
                    self.store_timeout,
                    adapter::fill(self.store.as_ref(), distribution, self.default_rate),
                )
                .instrument(store_span("get_all", distribution))
                .await?;

                let effective = rate.unwrap_or(dist.rate);
                dist.decay_with(effective, self.clock.now());
                let snapshot = dist.snapshot(effective);
                let job = if effective == dist.rate {
                    Job::Snapshot(dist)
                } else {
                    Job::Refresh(distribution.to_string())
                };
                Ok::<_, ServiceError>((snapshot, job))
            })
            .await?;

        self.enqueue(job).await;
        Ok(snapshot)
    }

    /// Store a per-distribution rate override
    pub async fn set_rate(&self, distribution: &str, rate: Rate) -> Result<(), ServiceError> {
        validate_name(distribution)?;

        self.timed("set_rate", distribution, async {
            let tx = Transaction::new(distribution).set(RATE_KEY, rate);
            with_deadline(self.store_timeout, self.store.transact(&tx))
                .instrument(store_span("transact", distribution))
                .await?;
            Ok::<_, ServiceError>(())
        })
        .await
    }
}
