use crate::decay::Rate;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Store address in the form `host:port:db`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEndpoint {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl FromStr for StoreEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0].is_empty() {
            return Err(ConfigError::Endpoint(format!(
                "{:?} must be in the form host:port:db",
                s
            )));
        }
        let port = parts[1]
            .parse()
            .map_err(|e| ConfigError::Endpoint(format!("bad port {:?}: {}", parts[1], e)))?;
        let db = parts[2]
            .parse()
            .map_err(|e| ConfigError::Endpoint(format!("bad db {:?}: {}", parts[2], e)))?;
        Ok(StoreEndpoint {
            host: parts[0].to_string(),
            port,
            db,
        })
    }
}

impl std::fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.db)
    }
}

/// What a producer does when its worker's queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait for space (request latency absorbs the backpressure)
    #[default]
    Block,
    /// Evict the oldest queued job to make room
    DropOldest,
    /// Drop the new job
    Reject,
}

impl FromStr for OverflowPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(OverflowPolicy::Block),
            "drop-oldest" => Ok(OverflowPolicy::DropOldest),
            "reject" => Ok(OverflowPolicy::Reject),
            other => Err(ConfigError::Invalid(format!(
                "unknown overflow policy {:?} (expected block, drop-oldest or reject)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `host:port:db`
    pub endpoint: String,
    /// Deadline for every store round trip
    pub timeout_ms: u64,
    /// Connection pool size; defaults to one per worker plus one for requests
    pub pool_size: Option<usize>,
    /// Use the in-process store instead of connecting anywhere
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            endpoint: "127.0.0.1:6379:0".to_string(),
            timeout_ms: 2000,
            pool_size: None,
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Rate used when a distribution has no `_R` override
    pub default_rate: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig { default_rate: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Total queued jobs across all workers
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Persist attempts per job when the guarded write detects a concurrent change
    pub max_persist_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            workers: 1,
            queue_capacity: 10,
            overflow: OverflowPolicy::Block,
            max_persist_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            listen: "0.0.0.0:6666".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

/// Process configuration, loaded from TOML and overridden by CLI flags
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub decay: DecayConfig,
    pub pipeline: PipelineConfig,
    pub http: HttpConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::File(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_rate()?;
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_persist_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_persist_attempts must be at least 1".to_string(),
            ));
        }
        if self.store.pool_size == Some(0) {
            return Err(ConfigError::Invalid("pool_size must be at least 1".to_string()));
        }
        if !self.store.in_memory {
            self.endpoint()?;
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Result<StoreEndpoint, ConfigError> {
        self.store.endpoint.parse()
    }

    pub fn default_rate(&self) -> Result<Rate, ConfigError> {
        Rate::new(self.decay.default_rate).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "default_rate {} is outside (0, 1]",
                self.decay.default_rate
            ))
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn pool_size(&self) -> usize {
        self.store
            .pool_size
            .unwrap_or(self.pipeline.workers + 1)
    }
}
