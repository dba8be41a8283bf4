//! Backing store abstraction
//!
//! The core only needs three primitives from the store: read every field of
//! a hash record, read selected fields, and apply a list of field writes as
//! one atomic transaction (optionally guarded on the current value of some
//! fields). [`MemoryStore`] implements them in process; [`RedisStore`] speaks
//! RESP to a Redis-compatible server.

mod memory;
mod pool;
mod redis;
pub mod resp;

pub use memory::MemoryStore;
pub use pool::{ConnectionPool, PooledConnection};
pub use redis::{RedisStore, RespConnection};

use crate::error::{StoreError, StoreResult};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// One write inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOp {
    /// HINCRBY
    IncrBy { field: String, by: i64 },
    /// HSET
    Set { field: String, value: String },
    /// HSETNX
    SetIfAbsent { field: String, value: String },
}

/// Atomic write against one record.
///
/// When `guard` is non-empty the ops apply only if every listed field still
/// holds the given value (`None` = field absent); otherwise nothing is written
/// and the outcome is [`TxOutcome::Aborted`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub key: String,
    pub guard: Vec<(String, Option<String>)>,
    pub ops: Vec<HashOp>,
}

impl Transaction {
    pub fn new(key: impl Into<String>) -> Self {
        Transaction {
            key: key.into(),
            guard: Vec::new(),
            ops: Vec::new(),
        }
    }

    pub fn expect(mut self, field: impl Into<String>, value: Option<String>) -> Self {
        self.guard.push((field.into(), value));
        self
    }

    pub fn incr_by(mut self, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(HashOp::IncrBy {
            field: field.into(),
            by,
        });
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.ops.push(HashOp::Set {
            field: field.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn set_if_absent(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.ops.push(HashOp::SetIfAbsent {
            field: field.into(),
            value: value.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Committed,
    /// Guard did not match, nothing written
    Aborted,
}

/// Hash-record store shared by request handlers and pipeline workers
pub trait HashStore: Send + Sync + 'static {
    /// Every field/value pair of `key` (empty if the record does not exist)
    fn get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<(String, String)>>>;

    /// Values of `fields` in order, `None` for absent fields
    fn get_fields<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [&'a str],
    ) -> BoxFuture<'a, StoreResult<Vec<Option<String>>>>;

    /// Apply `tx` atomically
    fn transact<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, StoreResult<TxOutcome>>;

    /// Round trip used to verify reachability at startup
    fn ping(&self) -> BoxFuture<'_, StoreResult<()>>;
}

pub type SharedStore = Arc<dyn HashStore>;

/// Run one store round trip under a deadline
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
