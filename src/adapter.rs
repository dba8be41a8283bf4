//! Store adapter: load and write back a whole distribution
//!
//! `fill` reconciles the reserved metadata fields from the raw record and
//! recomputes the total from the label counts. `persist` writes the decayed
//! snapshot in one transaction, guarded on the `_Z`/`_T` values seen by the
//! Fill that produced it.

use crate::clock::Timestamp;
use crate::decay::Rate;
use crate::distribution::{Distribution, Observed, LAST_UPDATE_KEY, RATE_KEY, TOTAL_KEY};
use crate::error::{FieldParseError, StoreResult};
use crate::store::{HashStore, Transaction, TxOutcome};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Applied,
    /// The record changed since it was filled; nothing was written
    Conflict,
}

pub fn parse_count(field: &str, value: &str) -> Result<u64, FieldParseError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| FieldParseError::new(field, value, e.to_string()))
}

/// `0` and unparsable values both mean "never decayed"
pub fn parse_timestamp(value: &str) -> Result<Option<Timestamp>, FieldParseError> {
    let secs = value
        .trim()
        .parse::<i64>()
        .map_err(|e| FieldParseError::new(LAST_UPDATE_KEY, value, e.to_string()))?;
    if secs <= 0 {
        return Ok(None);
    }
    Ok(Some(Timestamp::from_secs(secs as u64)))
}

/// Build a distribution from raw field/value pairs. Bad fields are logged and
/// skipped.
pub fn reconcile(name: &str, fields: Vec<(String, String)>, default_rate: Rate) -> Distribution {
    let mut dist = Distribution::new(name, default_rate);
    let mut observed = Observed::default();

    for (field, value) in fields {
        match field.as_str() {
            TOTAL_KEY => observed.total = Some(value),
            LAST_UPDATE_KEY => {
                match parse_timestamp(&value) {
                    Ok(t) => dist.last_update = t,
                    Err(e) => warn!(distribution = %name, error = %e, "ignoring last-update field"),
                }
                observed.last_update = Some(value);
            }
            RATE_KEY => match Rate::parse(&value) {
                Ok(rate) => {
                    dist.rate = rate;
                    dist.rate_overridden = true;
                }
                Err(reason) => {
                    let e = FieldParseError::new(RATE_KEY, &value, reason);
                    warn!(distribution = %name, error = %e, "ignoring rate override");
                }
            },
            "" => warn!(distribution = %name, "skipping empty field name"),
            _ => match parse_count(&field, &value) {
                Ok(count) => {
                    if !dist.insert(field.as_str(), count) {
                        let e = FieldParseError::new(&field, &value, "total exceeds u64");
                        warn!(distribution = %name, error = %e, "skipping field");
                    }
                }
                Err(e) => warn!(distribution = %name, error = %e, "skipping field"),
            },
        }
    }

    dist.observed = Some(observed);
    dist
}

/// Load the full current state of `name`
pub async fn fill(store: &dyn HashStore, name: &str, default_rate: Rate) -> StoreResult<Distribution> {
    let fields = store.get_all(name).await?;
    Ok(reconcile(name, fields, default_rate))
}

/// Transaction writing every label plus `_Z` and `_T`. `_R` is never written.
pub fn persist_transaction(dist: &Distribution) -> Transaction {
    let mut tx = Transaction::new(dist.name.clone());
    if let Some(observed) = &dist.observed {
        tx = tx
            .expect(TOTAL_KEY, observed.total.clone())
            .expect(LAST_UPDATE_KEY, observed.last_update.clone());
    }
    for (label, count) in &dist.data {
        tx = tx.set(label.clone(), count);
    }
    let last_update = dist.last_update.map(|t| t.as_secs()).unwrap_or(0);
    tx.set(TOTAL_KEY, dist.total).set(LAST_UPDATE_KEY, last_update)
}

/// Write `dist` back atomically
pub async fn persist(store: &dyn HashStore, dist: &Distribution) -> StoreResult<PersistOutcome> {
    let tx = persist_transaction(dist);
    match store.transact(&tx).await? {
        TxOutcome::Committed => Ok(PersistOutcome::Applied),
        TxOutcome::Aborted => Ok(PersistOutcome::Conflict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HashOp, MemoryStore};

    fn half() -> Rate {
        Rate::new(0.5).unwrap()
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_reconcile_recomputes_total() {
        let d = reconcile(
            "orders",
            pairs(&[("shoes", "7"), ("hats", "3"), ("_Z", "999"), ("_T", "1000")]),
            half(),
        );
        assert_eq!(d.total, 10);
        assert_eq!(d.count("shoes"), 7);
        assert_eq!(d.last_update, Some(Timestamp::from_secs(1000)));
        assert!(!d.data.contains_key("_Z"));
        assert_eq!(
            d.observed,
            Some(Observed {
                total: Some("999".to_string()),
                last_update: Some("1000".to_string()),
            })
        );
    }

    #[test]
    fn test_reconcile_skips_bad_fields() {
        let d = reconcile(
            "orders",
            pairs(&[("shoes", "7"), ("hats", "lots"), ("socks", "-2"), ("_T", "soon")]),
            half(),
        );
        assert_eq!(d.data.len(), 1);
        assert_eq!(d.total, 7);
        assert_eq!(d.last_update, None);
    }

    #[test]
    fn test_reconcile_skips_field_overflowing_total() {
        let max = i64::MAX.to_string();
        let max = max.as_str();
        let d = reconcile(
            "huge",
            pairs(&[("a", max), ("b", max), ("c", max)]),
            half(),
        );
        assert_eq!(d.data.len(), 2);
        assert_eq!(d.total, 2 * i64::MAX as u64);
        assert_eq!(d.total, d.data.values().sum::<u64>());
    }

    #[test]
    fn test_reconcile_rate_override() {
        let d = reconcile("d", pairs(&[("_R", "0.9")]), half());
        assert_eq!(d.rate, Rate::new(0.9).unwrap());
        assert!(d.rate_overridden);

        let d = reconcile("d", pairs(&[("_R", "3.5")]), half());
        assert_eq!(d.rate, half());
        assert!(!d.rate_overridden);

        let d = reconcile("d", pairs(&[("_R", "quick")]), half());
        assert_eq!(d.rate, half());
    }

    #[test]
    fn test_zero_timestamp_means_never() {
        assert_eq!(parse_timestamp("0").unwrap(), None);
        assert_eq!(
            parse_timestamp("17").unwrap(),
            Some(Timestamp::from_secs(17))
        );
        assert!(parse_timestamp("x").is_err());
    }

    #[test]
    fn test_persist_transaction_never_writes_rate() {
        let mut d = Distribution::new("d", half());
        d.insert("a", 1);
        d.rate = Rate::new(0.8).unwrap();
        d.rate_overridden = true;
        let tx = persist_transaction(&d);
        assert!(tx.ops.iter().all(|op| !matches!(
            op,
            HashOp::Set { field, .. } if field == RATE_KEY
        )));
        assert!(tx.guard.is_empty());
    }

    #[tokio::test]
    async fn test_fill_persist_is_idempotent() {
        let store = MemoryStore::new();
        store.put_raw("d", "a", "4");
        store.put_raw("d", "b", "6");
        store.put_raw("d", "_Z", "11");
        store.put_raw("d", "_T", "50");
        store.put_raw("d", "_R", "0.7");

        let first = fill(&store, "d", half()).await.unwrap();
        assert_eq!(persist(&store, &first).await.unwrap(), PersistOutcome::Applied);
        let after_first = store.get_all("d").await.unwrap();

        let second = fill(&store, "d", half()).await.unwrap();
        assert_eq!(persist(&store, &second).await.unwrap(), PersistOutcome::Applied);
        let mut after_second = store.get_all("d").await.unwrap();

        let mut after_first = after_first;
        after_first.sort();
        after_second.sort();
        assert_eq!(after_first, after_second);
        assert_eq!(store.raw_field("d", "_Z").as_deref(), Some("10"));
        assert_eq!(store.raw_field("d", "_R").as_deref(), Some("0.7"));
    }

    #[tokio::test]
    async fn test_persist_conflicts_after_concurrent_increment() {
        let store = MemoryStore::new();
        store.put_raw("d", "a", "4");
        store.put_raw("d", "_Z", "4");
        store.put_raw("d", "_T", "50");

        let mut d = fill(&store, "d", half()).await.unwrap();
        d.decay(Timestamp::from_secs(51));

        let incr = Transaction::new("d").incr_by("a", 1).incr_by("_Z", 1);
        store.transact(&incr).await.unwrap();

        assert_eq!(persist(&store, &d).await.unwrap(), PersistOutcome::Conflict);
        assert_eq!(store.raw_field("d", "a").as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_fill_missing_record() {
        let store = MemoryStore::new();
        let d = fill(&store, "nothing", half()).await.unwrap();
        assert!(d.data.is_empty());
        assert_eq!(d.total, 0);
        assert_eq!(d.last_update, None);
    }

    #[tokio::test]
    async fn test_fill_fails_only_on_store_error() {
        let store = MemoryStore::new();
        store.set_outage(true);
        assert!(fill(&store, "d", half()).await.is_err());
    }
}
