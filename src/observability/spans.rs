//! Span helpers for the request and persistence lifecycle

use tracing::{span, Level, Span};

/// Span for one request-layer operation
#[inline]
pub fn request_span(operation: &str, distribution: &str) -> Span {
    span!(
        Level::INFO,
        "decay.request",
        operation = %operation,
        distribution = %distribution,
        otel.kind = "server"
    )
}

/// Span for one pipeline job
#[inline]
pub fn job_span(worker: usize, distribution: &str) -> Span {
    span!(
        Level::DEBUG,
        "decay.job",
        worker.id = worker,
        distribution = %distribution,
        otel.kind = "internal"
    )
}

/// Span for a store round trip
#[inline]
pub fn store_span(operation: &str, key: &str) -> Span {
    span!(
        Level::TRACE,
        "decay.store",
        db.operation = %operation,
        db.redis.key = %key,
        otel.kind = "client"
    )
}
