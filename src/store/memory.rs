use super::{HashOp, HashStore, Transaction, TxOutcome};
use crate::error::{StoreError, StoreResult};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

type Record = HashMap<String, String>;

/// In-process store: reads share the lock, transactions take it exclusively.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Record>>,
    outage: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with `StoreError::Unavailable`
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Direct read of one raw field, bypassing the async interface
    pub fn raw_field(&self, key: &str, field: &str) -> Option<String> {
        self.records
            .read()
            .get(key)
            .and_then(|r| r.get(field).cloned())
    }

    /// Direct write of one raw field, bypassing the async interface
    pub fn put_raw(&self, key: &str, field: &str, value: &str) {
        self.records
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    fn apply(&self, tx: &Transaction) -> StoreResult<TxOutcome> {
        self.check_available()?;
        let mut records = self.records.write();

        let current = records.get(&tx.key);
        for (field, expected) in &tx.guard {
            let actual = current.and_then(|r| r.get(field));
            if actual != expected.as_ref() {
                return Ok(TxOutcome::Aborted);
            }
        }

        // Apply to a copy so a failing op leaves the stored record untouched.
        let mut record = current.cloned().unwrap_or_default();
        for op in &tx.ops {
            match op {
                HashOp::IncrBy { field, by } => {
                    let value = match record.get(field) {
                        Some(v) => v.parse::<i64>().map_err(|_| {
                            StoreError::Protocol(format!("hash value of {} is not an integer", field))
                        })?,
                        None => 0,
                    };
                    let next = value.checked_add(*by).ok_or_else(|| {
                        StoreError::Protocol(format!("increment of {} would overflow", field))
                    })?;
                    record.insert(field.clone(), next.to_string());
                }
                HashOp::Set { field, value } => {
                    record.insert(field.clone(), value.clone());
                }
                HashOp::SetIfAbsent { field, value } => {
                    record.entry(field.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        records.insert(tx.key.clone(), record);
        Ok(TxOutcome::Committed)
    }
}

impl HashStore for MemoryStore {
    fn get_all<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Vec<(String, String)>>> {
        let result: StoreResult<Vec<(String, String)>> = self.check_available().map(|()| {
            self.records
                .read()
                .get(key)
                .map(|r| r.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        });
        future::ready(result).boxed()
    }

    fn get_fields<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [&'a str],
    ) -> BoxFuture<'a, StoreResult<Vec<Option<String>>>> {
        let result: StoreResult<Vec<Option<String>>> = self.check_available().map(|()| {
            let records = self.records.read();
            let record = records.get(key);
            fields
                .iter()
                .map(|f| record.and_then(|r| r.get(*f).cloned()))
                .collect()
        });
        future::ready(result).boxed()
    }

    fn transact<'a>(&'a self, tx: &'a Transaction) -> BoxFuture<'a, StoreResult<TxOutcome>> {
        future::ready(self.apply(tx)).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, StoreResult<()>> {
        future::ready(self.check_available()).boxed()
    }
}
