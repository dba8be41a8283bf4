//! Span export to the Datadog APM agent

use opentelemetry::KeyValue;
use opentelemetry_datadog::DatadogPropagator;
use opentelemetry_sdk::trace::{Config as TraceConfig, Sampler, Tracer};
use opentelemetry_sdk::Resource;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use super::config::DatadogConfig;

type InitError = Box<dyn std::error::Error + Send + Sync>;

fn resource(config: &DatadogConfig) -> Resource {
    Resource::new([
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.version.clone()),
        KeyValue::new("deployment.environment", config.env.clone()),
    ])
}

fn tracer(config: &DatadogConfig) -> Result<Tracer, InitError> {
    let trace_config = TraceConfig::default()
        .with_sampler(Sampler::TraceIdRatioBased(config.trace_sample_rate))
        .with_resource(resource(config));

    let tracer = opentelemetry_datadog::new_pipeline()
        .with_service_name(&config.service_name)
        .with_agent_endpoint(&config.trace_addr)
        .with_trace_config(trace_config)
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    Ok(tracer)
}

/// Log locally and export spans. Must run inside the Tokio runtime.
pub fn init(config: &DatadogConfig, json: bool) -> Result<(), InitError> {
    opentelemetry::global::set_text_map_propagator(DatadogPropagator::default());
    let export = tracing_opentelemetry::layer().with_tracer(tracer(config)?);

    tracing_subscriber::registry()
        .with(super::env_filter())
        .with(super::fmt_layer(json))
        .with(export)
        .try_init()?;

    tracing::info!(
        service = %config.service_name,
        env = %config.env,
        sample_rate = config.trace_sample_rate,
        agent = %config.trace_addr,
        "span export enabled"
    );
    Ok(())
}

/// Flush spans still buffered in the batch exporter
pub fn shutdown() {
    tracing::debug!("flushing span exporter");
    opentelemetry::global::shutdown_tracer_provider();
}
