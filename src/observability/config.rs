//! Datadog settings read from the standard `DD_*` variables

use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct DatadogConfig {
    pub service_name: String,
    pub env: String,
    pub version: String,
    pub statsd_addr: SocketAddr,
    pub trace_addr: String,
    pub trace_sample_rate: f64,
    pub metric_prefix: String,
    pub tags: Vec<(String, String)>,
}

impl DatadogConfig {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| {
            std::env::var(name).unwrap_or_else(|_| default.to_string())
        };

        let statsd_addr = var("DD_DOGSTATSD_URL", "127.0.0.1:8125")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8125)));
        let trace_sample_rate = var("DD_TRACE_SAMPLE_RATE", "1.0")
            .parse::<f64>()
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or(1.0);

        DatadogConfig {
            service_name: var("DD_SERVICE", "decay-store"),
            env: var("DD_ENV", "development"),
            version: var("DD_VERSION", env!("CARGO_PKG_VERSION")),
            statsd_addr,
            trace_addr: var("DD_TRACE_AGENT_URL", "http://127.0.0.1:8126"),
            trace_sample_rate,
            metric_prefix: var("DD_METRIC_PREFIX", "decay_store"),
            tags: parse_tags(&var("DD_TAGS", "")),
        }
    }

    /// Global tags plus `env:` and `service:`
    pub fn formatted_tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("env:{}", self.env),
            format!("service:{}", self.service_name),
        ];
        tags.extend(self.tags.iter().map(|(k, v)| format!("{}:{}", k, v)));
        tags
    }
}

fn parse_tags(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once(':')?;
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}
