//! DogStatsD recorder
//!
//! Sends over UDP without waiting on the agent. A socket that cannot be opened
//! leaves the recorder mute instead of failing startup.

use dogstatsd::{Client, Options};
use std::sync::Arc;

use super::config::DatadogConfig;
use super::recorder::MetricsRecorder;

#[derive(Clone)]
pub struct Metrics {
    client: Option<Arc<Client>>,
    prefix: String,
    base_tags: Vec<String>,
}

impl Metrics {
    pub fn new(config: &DatadogConfig) -> Self {
        let options = Options {
            to_addr: config.statsd_addr.to_string(),
            ..Default::default()
        };
        let client = Client::new(options)
            .map(Arc::new)
            .map_err(|e| tracing::warn!(error = %e, "DogStatsD unavailable, metrics muted"))
            .ok();
        if client.is_some() {
            tracing::info!(addr = %config.statsd_addr, "DogStatsD recorder ready");
        }

        Metrics {
            client,
            prefix: config.metric_prefix.clone(),
            base_tags: config.formatted_tags(),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.client.is_none()
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.prefix, name)
    }

    fn tags(&self, extra: &[&str]) -> Vec<String> {
        let mut tags = self.base_tags.clone();
        tags.extend(extra.iter().map(|t| t.to_string()));
        tags
    }
}

// Send errors are dropped: a lost datagram never fails the caller.
impl MetricsRecorder for Metrics {
    fn incr(&self, name: &str, tags: &[&str]) {
        if let Some(client) = &self.client {
            let _ = client.incr(self.qualified(name), self.tags(tags));
        }
    }

    fn histogram(&self, name: &str, value: f64, tags: &[&str]) {
        if let Some(client) = &self.client {
            let _ = client.histogram(self.qualified(name), value.to_string(), self.tags(tags));
        }
    }

    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        if let Some(client) = &self.client {
            let _ = client.gauge(self.qualified(name), value.to_string(), self.tags(tags));
        }
    }
}
