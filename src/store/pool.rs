use super::redis::RespConnection;
use crate::config::StoreEndpoint;
use crate::error::{StoreError, StoreResult};
use crossbeam::queue::ArrayQueue;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Bounded pool of store connections.
///
/// A checked-out connection is owned exclusively by one logical operation.
/// It goes back to the pool only through [`PooledConnection::release`]; a
/// connection dropped mid-operation (error, timeout) is closed instead, so
/// half-read replies never leak into the next caller's framing.
pub struct ConnectionPool {
    endpoint: StoreEndpoint,
    idle: ArrayQueue<RespConnection>,
    max_connections: Semaphore,
}

impl ConnectionPool {
    pub fn new(endpoint: StoreEndpoint, max_connections: usize) -> Self {
        let size = max_connections.max(1);
        ConnectionPool {
            endpoint,
            idle: ArrayQueue::new(size),
            max_connections: Semaphore::new(size),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub async fn checkout(&self) -> StoreResult<PooledConnection<'_>> {
        let permit = self
            .max_connections
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable("connection pool closed".to_string()))?;

        let conn = match self.idle.pop() {
            Some(conn) => conn,
            None => {
                debug!(endpoint = %self.endpoint, "opening store connection");
                RespConnection::connect(&self.endpoint).await?
            }
        };

        Ok(PooledConnection {
            conn,
            pool: self,
            permit,
        })
    }
}

pub struct PooledConnection<'a> {
    conn: RespConnection,
    pool: &'a ConnectionPool,
    permit: SemaphorePermit<'a>,
}

impl PooledConnection<'_> {
    pub fn conn(&mut self) -> &mut RespConnection {
        &mut self.conn
    }

    /// Return the connection for reuse after a clean round trip
    pub fn release(self) {
        let PooledConnection { conn, pool, permit } = self;
        let _ = pool.idle.push(conn);
        drop(permit);
    }
}
