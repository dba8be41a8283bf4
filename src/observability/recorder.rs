//! Metrics recorder seam
//!
//! Production code records through [`SharedMetrics`]. Tests swap in
//! [`SimulatedMetrics`] and assert on what the pipeline did.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait MetricsRecorder: Send + Sync + 'static {
    fn incr(&self, name: &str, tags: &[&str]);

    fn histogram(&self, name: &str, value: f64, tags: &[&str]);

    fn gauge(&self, name: &str, value: f64, tags: &[&str]);

    /// One request-layer operation (`increment`, `query_field`, ...)
    fn record_request(&self, operation: &str, duration_ms: f64, success: bool) {
        let op = format!("operation:{}", operation);
        let status = if success { "status:ok" } else { "status:error" };
        self.histogram("request.duration_ms", duration_ms, &[&op, status]);
        self.incr("request.count", &[&op, status]);
    }

    /// A job landed in `worker`'s queue, which now holds `depth` jobs
    fn record_enqueued(&self, worker: usize, depth: usize) {
        let worker = format!("worker:{}", worker);
        self.incr("pipeline.job.enqueued", &[&worker]);
        self.gauge("pipeline.queue.depth", depth as f64, &[&worker]);
    }

    /// A job was discarded: `overflow`, `closed`, `store` or `conflict`
    fn record_dropped(&self, reason: &str) {
        let reason = format!("reason:{}", reason);
        self.incr("pipeline.job.dropped", &[&reason]);
    }

    /// One guarded persist: `applied`, `conflict` or `error`
    fn record_persist(&self, outcome: &str, duration_ms: f64) {
        let outcome = format!("outcome:{}", outcome);
        self.histogram("persist.duration_ms", duration_ms, &[&outcome]);
        self.incr("persist.count", &[&outcome]);
    }
}

#[derive(Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {
    #[inline]
    fn incr(&self, _name: &str, _tags: &[&str]) {}
    #[inline]
    fn histogram(&self, _name: &str, _value: f64, _tags: &[&str]) {}
    #[inline]
    fn gauge(&self, _name: &str, _value: f64, _tags: &[&str]) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

#[derive(Debug, Clone)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub tags: Vec<String>,
    pub metric_type: MetricType,
}

impl RecordedMetric {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// In-memory recorder with running totals for the pipeline events
#[derive(Default)]
pub struct SimulatedMetrics {
    samples: Mutex<Vec<RecordedMetric>>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    conflicts: AtomicU64,
}

impl SimulatedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<RecordedMetric> {
        self.samples.lock().clone()
    }

    pub fn samples_named(&self, name: &str) -> Vec<RecordedMetric> {
        self.samples
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .cloned()
            .collect()
    }

    /// Samples of `name` that carry `tag`
    pub fn count_tagged(&self, name: &str, tag: &str) -> usize {
        self.samples
            .lock()
            .iter()
            .filter(|m| m.name == name && m.has_tag(tag))
            .count()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Persists that were applied
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Persists that found the record changed since its fill
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn push(&self, metric_type: MetricType, name: &str, value: f64, tags: &[&str]) {
        self.samples.lock().push(RecordedMetric {
            name: name.to_string(),
            value,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            metric_type,
        });
    }
}

impl MetricsRecorder for SimulatedMetrics {
    fn incr(&self, name: &str, tags: &[&str]) {
        match name {
            "pipeline.job.enqueued" => self.enqueued.fetch_add(1, Ordering::SeqCst),
            "pipeline.job.dropped" => self.dropped.fetch_add(1, Ordering::SeqCst),
            "persist.count" if tags.contains(&"outcome:applied") => {
                self.persisted.fetch_add(1, Ordering::SeqCst)
            }
            "persist.count" if tags.contains(&"outcome:conflict") => {
                self.conflicts.fetch_add(1, Ordering::SeqCst)
            }
            _ => 0,
        };
        self.push(MetricType::Counter, name, 1.0, tags);
    }

    fn histogram(&self, name: &str, value: f64, tags: &[&str]) {
        self.push(MetricType::Histogram, name, value, tags);
    }

    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        self.push(MetricType::Gauge, name, value, tags);
    }
}

pub type SharedMetrics = Arc<dyn MetricsRecorder>;

pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}

pub fn simulated_metrics() -> Arc<SimulatedMetrics> {
    Arc::new(SimulatedMetrics::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_totals() {
        let metrics = SimulatedMetrics::new();

        metrics.record_enqueued(0, 1);
        metrics.record_enqueued(1, 3);
        metrics.record_dropped("overflow");
        metrics.record_persist("applied", 1.0);
        metrics.record_persist("conflict", 1.0);
        metrics.record_persist("error", 1.0);

        assert_eq!(metrics.enqueued(), 2);
        assert_eq!(metrics.dropped(), 1);
        assert_eq!(metrics.persisted(), 1);
        assert_eq!(metrics.conflicts(), 1);
        assert_eq!(metrics.count_tagged("pipeline.job.dropped", "reason:overflow"), 1);
        assert_eq!(metrics.samples_named("persist.duration_ms").len(), 3);
    }

    #[test]
    fn test_queue_depth_gauge() {
        let metrics = SimulatedMetrics::new();
        metrics.record_enqueued(2, 7);

        let depth = metrics.samples_named("pipeline.queue.depth");
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].metric_type, MetricType::Gauge);
        assert_eq!(depth[0].value, 7.0);
        assert!(depth[0].has_tag("worker:2"));
    }

    #[test]
    fn test_request_status_tags() {
        let metrics = SimulatedMetrics::new();
        metrics.record_request("increment", 0.3, true);
        metrics.record_request("increment", 0.3, false);
        assert_eq!(metrics.count_tagged("request.count", "status:error"), 1);
        assert_eq!(metrics.count_tagged("request.count", "operation:increment"), 2);
    }

    #[test]
    fn test_noop_accepts_everything() {
        let metrics = noop_metrics();
        metrics.record_request("query_field", 1.0, true);
        metrics.record_enqueued(0, 1);
        metrics.record_dropped("closed");
        metrics.record_persist("applied", 1.0);
    }
}
