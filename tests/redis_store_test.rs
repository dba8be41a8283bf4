//! RedisStore Wire Tests
//!
//! Drives `RedisStore` against a small RESP server running in the test
//! process. The server keeps hashes in memory and implements the subset of
//! commands the store issues, including WATCH/MULTI/EXEC.

use decay_store::adapter::{self, PersistOutcome};
use decay_store::config::StoreEndpoint;
use decay_store::error::StoreError;
use decay_store::store::resp::{RespCodec, RespValue};
use decay_store::store::{HashStore, RedisStore, Transaction, TxOutcome};
use decay_store::{Rate, Timestamp};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

#[derive(Default)]
struct Db {
    hashes: HashMap<String, HashMap<String, String>>,
    versions: HashMap<String, u64>,
}

impl Db {
    fn touch(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_default() += 1;
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn apply(&mut self, args: &[String]) -> RespValue {
        let cmd = args[0].to_ascii_uppercase();
        match cmd.as_str() {
            "HINCRBY" => {
                let (key, field) = (&args[1], &args[2]);
                let by: i64 = args[3].parse().unwrap();
                let hash = self.hashes.entry(key.clone()).or_default();
                let current = match hash.get(field) {
                    Some(v) => match v.parse::<i64>() {
                        Ok(n) => n,
                        Err(_) => {
                            return RespValue::Error(
                                "ERR hash value is not an integer".to_string(),
                            )
                        }
                    },
                    None => 0,
                };
                hash.insert(field.clone(), (current + by).to_string());
                self.touch(key);
                RespValue::Integer(current + by)
            }
            "HSET" => {
                let hash = self.hashes.entry(args[1].clone()).or_default();
                let fresh = hash.insert(args[2].clone(), args[3].clone()).is_none();
                self.touch(&args[1]);
                RespValue::Integer(fresh as i64)
            }
            "HSETNX" => {
                let hash = self.hashes.entry(args[1].clone()).or_default();
                if hash.contains_key(&args[2]) {
                    return RespValue::Integer(0);
                }
                hash.insert(args[2].clone(), args[3].clone());
                self.touch(&args[1]);
                RespValue::Integer(1)
            }
            other => RespValue::Error(format!("ERR unknown command '{}'", other)),
        }
    }
}

fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Some(s.as_bytes().to_vec()))
}

fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

async fn serve_connection(stream: TcpStream, db: Arc<Mutex<Db>>) {
    let mut framed = Framed::new(stream, RespCodec);
    let mut watched: Vec<(String, u64)> = Vec::new();
    let mut queued: Option<Vec<Vec<String>>> = None;

    while let Some(Ok(frame)) = framed.next().await {
        let args: Vec<String> = match frame {
            RespValue::Array(Some(items)) => items
                .into_iter()
                .filter_map(|v| v.into_text().ok().flatten())
                .collect(),
            _ => break,
        };
        let cmd = args[0].to_ascii_uppercase();

        let reply = match cmd.as_str() {
            "SELECT" => ok(),
            "PING" => RespValue::SimpleString("PONG".to_string()),
            "HGETALL" => {
                let db = db.lock();
                let items = db
                    .hashes
                    .get(&args[1])
                    .map(|h| {
                        h.iter()
                            .flat_map(|(k, v)| [bulk(k), bulk(v)])
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                RespValue::Array(Some(items))
            }
            "HMGET" => {
                let db = db.lock();
                let hash = db.hashes.get(&args[1]);
                let items = args[2..]
                    .iter()
                    .map(|f| match hash.and_then(|h| h.get(f)) {
                        Some(v) => bulk(v),
                        None => RespValue::BulkString(None),
                    })
                    .collect::<Vec<_>>();
                RespValue::Array(Some(items))
            }
            "WATCH" => {
                let version = db.lock().version(&args[1]);
                watched.push((args[1].clone(), version));
                ok()
            }
            "UNWATCH" => {
                watched.clear();
                ok()
            }
            "MULTI" => {
                queued = Some(Vec::new());
                ok()
            }
            "DISCARD" => {
                queued = None;
                watched.clear();
                ok()
            }
            "EXEC" => {
                let commands = queued.take().unwrap_or_default();
                let mut db = db.lock();
                let dirty = watched.iter().any(|(k, v)| db.version(k) != *v);
                watched.clear();
                if dirty {
                    RespValue::Array(None)
                } else {
                    RespValue::Array(Some(commands.iter().map(|c| db.apply(c)).collect()))
                }
            }
            _ => match queued.as_mut() {
                Some(pending) => {
                    pending.push(args);
                    RespValue::SimpleString("QUEUED".to_string())
                }
                None => {
                    let mut db = db.lock();
                    db.apply(&args)
                }
            },
        };

        if framed.send(reply).await.is_err() {
            break;
        }
    }
}

async fn start_server() -> (StoreEndpoint, Arc<Mutex<Db>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let db = Arc::new(Mutex::new(Db::default()));

    let shared = db.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, shared.clone()));
        }
    });

    let endpoint = StoreEndpoint {
        host: "127.0.0.1".to_string(),
        port,
        db: 0,
    };
    (endpoint, db)
}

fn field(db: &Mutex<Db>, key: &str, field: &str) -> Option<String> {
    db.lock().hashes.get(key).and_then(|h| h.get(field).cloned())
}

#[tokio::test]
async fn test_ping_and_connection_reuse() {
    let (endpoint, _db) = start_server().await;
    let store = RedisStore::new(endpoint, 2);

    store.ping().await.unwrap();
    store.ping().await.unwrap();
    assert_eq!(store.pool().idle_count(), 1);
}

#[tokio::test]
async fn test_transaction_and_reads() {
    let (endpoint, db) = start_server().await;
    let store = RedisStore::new(endpoint, 2);

    let tx = Transaction::new("orders")
        .incr_by("shoes", 2)
        .incr_by("_Z", 2)
        .set_if_absent("_T", 100);
    assert_eq!(store.transact(&tx).await.unwrap(), TxOutcome::Committed);
    assert_eq!(store.transact(&tx).await.unwrap(), TxOutcome::Committed);

    assert_eq!(field(&db, "orders", "shoes").as_deref(), Some("4"));
    assert_eq!(field(&db, "orders", "_T").as_deref(), Some("100"));

    let values = store
        .get_fields("orders", &["shoes", "_Z", "missing"])
        .await
        .unwrap();
    assert_eq!(
        values,
        vec![Some("4".to_string()), Some("4".to_string()), None]
    );

    let mut all = store.get_all("orders").await.unwrap();
    all.sort();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0], ("_T".to_string(), "100".to_string()));
}

#[tokio::test]
async fn test_fill_decay_persist_over_the_wire() {
    let (endpoint, db) = start_server().await;
    let store = RedisStore::new(endpoint, 1);
    {
        let mut db = db.lock();
        let hash = db.hashes.entry("d".to_string()).or_default();
        hash.insert("a".to_string(), "8".to_string());
        hash.insert("b".to_string(), "4".to_string());
        hash.insert("_Z".to_string(), "12".to_string());
        hash.insert("_T".to_string(), "100".to_string());
        hash.insert("_R".to_string(), "0.5".to_string());
    }

    let mut dist = adapter::fill(&store, "d", Rate::new(0.9).unwrap())
        .await
        .unwrap();
    assert!(dist.rate_overridden);
    dist.decay(Timestamp::from_secs(101));

    assert_eq!(
        adapter::persist(&store, &dist).await.unwrap(),
        PersistOutcome::Applied
    );
    assert_eq!(field(&db, "d", "a").as_deref(), Some("4"));
    assert_eq!(field(&db, "d", "_Z").as_deref(), Some("6"));
    assert_eq!(field(&db, "d", "_T").as_deref(), Some("101"));
    assert_eq!(field(&db, "d", "_R").as_deref(), Some("0.5"));
}

#[tokio::test]
async fn test_guard_mismatch_aborts_without_writing() {
    let (endpoint, db) = start_server().await;
    let store = RedisStore::new(endpoint, 1);
    store
        .transact(&Transaction::new("d").incr_by("a", 5).incr_by("_Z", 5))
        .await
        .unwrap();

    let mut dist = adapter::fill(&store, "d", Rate::new(0.5).unwrap())
        .await
        .unwrap();
    dist.decay(Timestamp::from_secs(10));

    store
        .transact(&Transaction::new("d").incr_by("a", 1).incr_by("_Z", 1))
        .await
        .unwrap();

    assert_eq!(
        adapter::persist(&store, &dist).await.unwrap(),
        PersistOutcome::Conflict
    );
    assert_eq!(field(&db, "d", "a").as_deref(), Some("6"));
    // the UNWATCH path returns the connection for reuse
    assert_eq!(store.pool().idle_count(), 1);
}

#[tokio::test]
async fn test_error_reply_inside_transaction() {
    let (endpoint, db) = start_server().await;
    db.lock()
        .hashes
        .entry("d".to_string())
        .or_default()
        .insert("a".to_string(), "many".to_string());
    let store = RedisStore::new(endpoint, 1);

    let err = store
        .transact(&Transaction::new("d").incr_by("a", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
}

#[tokio::test]
async fn test_unreachable_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let store = RedisStore::new(
        StoreEndpoint {
            host: "127.0.0.1".to_string(),
            port,
            db: 0,
        },
        1,
    );
    assert!(matches!(
        store.ping().await,
        Err(StoreError::Unavailable(_))
    ));
}
