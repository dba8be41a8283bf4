//! Logging, spans and metrics
//!
//! The default build logs to stdout through `tracing_subscriber` and records
//! no metrics. Building with `datadog` adds DogStatsD metrics and APM span
//! export, configured from the usual `DD_*` variables (`DD_SERVICE`, `DD_ENV`,
//! `DD_DOGSTATSD_URL`, `DD_TRACE_AGENT_URL`, `DD_TRACE_SAMPLE_RATE`, `DD_TAGS`,
//! and `DD_METRIC_PREFIX`, which defaults to `decay_store`).

pub mod recorder;
pub mod spans;

#[cfg(feature = "datadog")]
pub mod config;
#[cfg(feature = "datadog")]
pub mod metrics;
#[cfg(feature = "datadog")]
pub mod tracing_setup;

pub use recorder::{
    noop_metrics, simulated_metrics, MetricType, MetricsRecorder, NoopMetrics, RecordedMetric,
    SharedMetrics, SimulatedMetrics,
};
pub use spans::*;

#[cfg(feature = "datadog")]
pub use config::DatadogConfig;
#[cfg(feature = "datadog")]
pub use metrics::Metrics;

use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer};

type InitError = Box<dyn std::error::Error + Send + Sync>;

/// `RUST_LOG`, or `info` when unset or unparsable
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(json: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().boxed()
    }
}

/// Install the global subscriber
#[cfg(not(feature = "datadog"))]
pub fn init_tracing(json: bool) -> Result<(), InitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(json))
        .try_init()?;
    Ok(())
}

#[cfg(feature = "datadog")]
pub fn init_tracing(json: bool) -> Result<(), InitError> {
    tracing_setup::init(&DatadogConfig::from_env(), json)
}

/// Recorder handed to the pipeline and the service
pub fn process_metrics() -> SharedMetrics {
    #[cfg(feature = "datadog")]
    {
        let metrics = Metrics::new(&DatadogConfig::from_env());
        if !metrics.is_muted() {
            return std::sync::Arc::new(metrics);
        }
    }
    noop_metrics()
}

/// Flush exporters before exit
pub fn shutdown() {
    #[cfg(feature = "datadog")]
    tracing_setup::shutdown();
}
