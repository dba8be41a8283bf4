//! Time-decayed categorical distributions stored in a Redis-compatible hash
//! store.
//!
//! Counts are incremented synchronously; every read answers with counts
//! decayed by `rate^elapsed_secs`, and a background [`pipeline`] writes the
//! decayed state back.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod decay;
pub mod distribution;
pub mod error;
pub mod http;
pub mod observability;
pub mod pipeline;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use config::{Config, OverflowPolicy, StoreEndpoint};
pub use decay::Rate;
pub use distribution::{Distribution, DistributionSnapshot, FieldSnapshot};
pub use error::{ConfigError, PipelineError, ServiceError, StoreError, ValidationError};
pub use pipeline::{Job, PipelineHandle, UpdatePipeline, WorkerContext};
pub use service::Service;
pub use store::{HashStore, MemoryStore, RedisStore, SharedStore};
