use super::pool::ConnectionPool;
use super::resp::{command, RespCodec, RespValue};
use super::{HashOp, HashStore, Transaction, TxOutcome};
use crate::config::StoreEndpoint;
use crate::error::{StoreError, StoreResult};
use futures::future::{BoxFuture, FutureExt};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// One RESP connection with its selected database
pub struct RespConnection {
    framed: Framed<TcpStream, RespCodec>,
}

impl RespConnection {
    pub async fn connect(endpoint: &StoreEndpoint) -> StoreResult<Self> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
        stream.set_nodelay(true)?;
        let mut conn = RespConnection {
            framed: Framed::new(stream, RespCodec),
        };

        let db = endpoint.db.to_string();
        match conn.call(&["SELECT", db.as_str()]).await? {
            RespValue::SimpleString(ref ok) if ok == "OK" => Ok(conn),
            other => Err(StoreError::Protocol(format!(
                "could not change to db {}: {:?}",
                endpoint.db, other
            ))),
        }
    }

    /// Send one command and wait for its reply. Error replies are returned as
    /// values; transport failures as `Err`.
    pub async fn call<S: AsRef<[u8]>>(&mut self, args: &[S]) -> StoreResult<RespValue> {
        self.framed.send(command(args)).await?;
        match self.framed.next().await {
            Some(reply) => reply,
            None => Err(StoreError::Unavailable(
                "connection closed by store".to_string(),
            )),
        }
    }
}

/// `HashStore` backed by a Redis-compatible server
pub struct RedisStore {
    pool: ConnectionPool,
}

impl RedisStore {
    pub fn new(endpoint: StoreEndpoint, pool_size: usize) -> Self {
        RedisStore {
            pool: ConnectionPool::new(endpoint, pool_size),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let mut conn = self.pool.checkout().await?;
        let reply = conn.conn().call(&["HGETALL", key]).await?.check()?;
        conn.release();

        let items = match reply {
            RespValue::Array(Some(items)) => items,
            RespValue::Array(None) => Vec::new(),
            other => {
                return Err(StoreError::Protocol(format!(
                    "HGETALL returned {:?}",
                    other
                )))
            }
        };
        if items.len() % 2 != 0 {
            return Err(StoreError::Protocol(
                "HGETALL returned an odd number of elements".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            match (k.into_text()?, v.into_text()?) {
                (Some(k), Some(v)) => pairs.push((k, v)),
                _ => warn!(key = %key, "HGETALL returned a nil field, skipping"),
            }
        }
        Ok(pairs)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> StoreResult<Vec<Option<String>>> {
        let mut args = Vec::with_capacity(fields.len() + 2);
        args.push("HMGET");
        args.push(key);
        args.extend_from_slice(fields);

        let mut conn = self.pool.checkout().await?;
        let reply = conn.conn().call(&args[..]).await?.check()?;
        conn.release();

        match reply {
            RespValue::Array(Some(items)) if items.len() == fields.len() => {
                items.into_iter().map(RespValue::into_text).collect()
            }
            other => Err(StoreError::Protocol(format!(
                "HMGET of {} fields returned {:?}",
                fields.len(),
                other
            ))),
        }
    }

    async fn exec(&self, tx: &Transaction) -> StoreResult<TxOutcome> {
        let mut pooled = self.pool.checkout().await?;
        let conn = pooled.conn();
        let key = tx.key.as_str();

        if !tx.guard.is_empty() {
            conn.call(&["WATCH", key]).await?.check()?;

            let mut args = vec!["HMGET", key];
            args.extend(tx.guard.iter().map(|(f, _)| f.as_str()));
            let current = match conn.call(&args[..]).await?.check()? {
                RespValue::Array(Some(items)) => items
                    .into_iter()
                    .map(RespValue::into_text)
                    .collect::<StoreResult<Vec<_>>>()?,
                other => {
                    return Err(StoreError::Protocol(format!(
                        "HMGET returned {:?}",
                        other
                    )))
                }
            };
            let matches = current.len() == tx.guard.len()
                && current
                    .iter()
                    .zip(tx.guard.iter())
                    .all(|(actual, (_, expected))| actual == expected);
            if !matches {
                conn.call(&["UNWATCH"]).await?.check()?;
                pooled.release();
                return Ok(TxOutcome::Aborted);
            }
        }

        conn.call(&["MULTI"]).await?.check()?;
        for op in &tx.ops {
            let reply = match op {
                HashOp::IncrBy { field, by } => {
                    let by = by.to_string();
                    conn.call(&["HINCRBY", key, field.as_str(), by.as_str()]).await?
                }
                HashOp::Set { field, value } => {
                    conn.call(&["HSET", key, field.as_str(), value.as_str()]).await?
                }
                HashOp::SetIfAbsent { field, value } => {
                    conn.call(&["HSETNX", key, field.as_str(), value.as_str()]).await?
                }
            };
            // A rejected command inside MULTI makes EXEC fail as a whole.
            if let RespValue::Error(e) = reply {
                conn.call(&["DISCARD"]).await?;
                pooled.release();
                return Err(StoreError::Protocol(e));
            }
        }

        let exec_reply = conn.call(&["EXEC"]).await?.check()?;
        let outcome = match exec_reply {
            RespValue::Array(None) => TxOutcome::Aborted,
            RespValue::Array(Some(results)) => {
                if let Some(RespValue::Error(e)) =
                    results.into_iter().find(|r| matches!(r, RespValue::Error(_)))
                {
                    pooled.release();
                    return Err(StoreError::Protocol(e));
                }
                TxOutcome::Committed
            }
            other => {
                return Err(StoreError::Protocol(format!("EXEC returned {:?}", other)));
            }
        };
        pooled.release();
        debug!(key = %key, ?outcome, "transaction finished");
        Ok(outcome)
    }

    async fn ping_once(&self) -> StoreResult<()> {
        let mut conn = self.pool.checkout().await?;
        let reply = conn.conn().call(&["PING"]).await?;
        conn.release();
        match reply {
            RespValue::SimpleString(ref s) if s == "PONG" => Ok(()),
            other => Err(StoreError::Protocol(format!("PING returned {:?}", other))),
        }
    }
}

impl HashStore for RedisStore {
    fn get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<(String, String)>>> {
        self.hgetall(key).boxed()
    }

    fn get_fields<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [&'a str],
    ) -> BoxFuture<'a, StoreResult<Vec<Option<String>>>> {
        self.hmget(key, fields).boxed()
    }

    fn transact<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, StoreResult<TxOutcome>> {
        self.exec(tx).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        self.ping_once().boxed()
    }
}
