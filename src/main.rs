//! decay-store server
//!
//! Usage:
//!   decay-store [OPTIONS]
//!
//! Command-line values override the config file, which overrides defaults.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use clap::Parser;
use decay_store::config::{Config, OverflowPolicy};
use decay_store::error::ConfigError;
use decay_store::store::{with_deadline, HashStore, MemoryStore, RedisStore, SharedStore};
use decay_store::{http, observability, Service, SystemClock, UpdatePipeline, WorkerContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "decay-store")]
#[command(about = "HTTP service for time-decayed categorical distributions")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store endpoint, host:port:db
    #[arg(long)]
    redis_host: Option<String>,

    /// Decay rate per second for distributions without an override
    #[arg(long)]
    default_rate: Option<f64>,

    /// Number of update workers
    #[arg(long)]
    nworkers: Option<usize>,

    /// Total capacity of the update queues
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// What to do when an update queue is full
    #[arg(long, value_parser = parse_overflow)]
    overflow: Option<OverflowPolicy>,

    /// Deadline for each store round trip
    #[arg(long)]
    store_timeout_ms: Option<u64>,

    /// HTTP listen address
    #[arg(long)]
    listen: Option<String>,

    /// Keep state in process instead of connecting to a store
    #[arg(long)]
    memory: bool,

    /// Log JSON lines
    #[arg(long)]
    log_json: bool,
}

fn parse_overflow(s: &str) -> Result<OverflowPolicy, String> {
    s.parse().map_err(|e: ConfigError| e.to_string())
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(endpoint) = self.redis_host {
            config.store.endpoint = endpoint;
        }
        if let Some(rate) = self.default_rate {
            config.decay.default_rate = rate;
        }
        if let Some(workers) = self.nworkers {
            config.pipeline.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.pipeline.queue_capacity = capacity;
        }
        if let Some(overflow) = self.overflow {
            config.pipeline.overflow = overflow;
        }
        if let Some(ms) = self.store_timeout_ms {
            config.store.timeout_ms = ms;
        }
        if let Some(listen) = self.listen {
            config.http.listen = listen;
        }
        config.store.in_memory |= self.memory;
        config.log.json |= self.log_json;
    }
}

fn load_config(args: Args) -> Result<Config, ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn connect_store(config: &Config) -> Result<SharedStore, ConfigError> {
    if config.store.in_memory {
        info!("Using in-process store (no durability)");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let endpoint = config.endpoint()?;
    let store = RedisStore::new(endpoint.clone(), config.pool_size());
    with_deadline(config.store_timeout(), store.ping())
        .await
        .map_err(|e| ConfigError::Unreachable(format!("{}: {}", endpoint, e)))?;
    info!(%endpoint, pool_size = config.pool_size(), "Connected to store");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let json = args.log_json;
    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            // logging is not up yet
            eprintln!("{}", e);
            return Err(e.into());
        }
    };
    observability::init_tracing(json || config.log.json)?;

    let store = connect_store(&config).await.map_err(|e| {
        error!(error = %e, "Startup failed");
        e
    })?;

    let ctx = WorkerContext {
        store,
        clock: Arc::new(SystemClock),
        default_rate: config.default_rate()?,
        store_timeout: config.store_timeout(),
        max_attempts: config.pipeline.max_persist_attempts,
        metrics: observability::process_metrics(),
    };
    info!(workers = config.pipeline.workers, "Starting update workers");
    let pipeline = UpdatePipeline::start(&config.pipeline, ctx.clone());
    let service = Service::new(&ctx, pipeline.handle());

    let listener = TcpListener::bind(&config.http.listen).await?;
    let served = http::serve(listener, service, shutdown_signal()).await;

    info!(pending = pipeline.handle().pending(), "Draining update queue");
    pipeline.shutdown().await;
    observability::shutdown();

    served?;
    Ok(())
}
