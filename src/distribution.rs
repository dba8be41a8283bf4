use crate::clock::Timestamp;
use crate::decay::{self, Rate};
use crate::error::ValidationError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Reserved field holding the total mass
pub const TOTAL_KEY: &str = "_Z";
/// Reserved field holding the last-decay unix timestamp
pub const LAST_UPDATE_KEY: &str = "_T";
/// Reserved field holding the decay-rate override
pub const RATE_KEY: &str = "_R";

const RESERVED_PREFIXES: [&str; 3] = [TOTAL_KEY, LAST_UPDATE_KEY, RATE_KEY];

pub fn is_reserved(field: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|p| field.starts_with(p))
}

/// Reject labels that would collide with metadata fields
pub fn validate_label(field: &str) -> Result<(), ValidationError> {
    if is_reserved(field) {
        return Err(ValidationError::Reserved(field.to_string()));
    }
    Ok(())
}

/// Raw `_Z`/`_T` values as read by a Fill. Persist only applies while the
/// stored record still shows these values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Observed {
    pub total: Option<String>,
    pub last_update: Option<String>,
}

/// One named distribution, loaded on demand and never cached across requests.
///
/// `total == data.values().sum()` holds after every load and decay.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub name: String,
    pub data: BTreeMap<String, u64>,
    pub total: u64,
    pub last_update: Option<Timestamp>,
    pub rate: Rate,
    /// `rate` came from a stored `_R` rather than the process default
    pub rate_overridden: bool,
    pub observed: Option<Observed>,
}

impl Distribution {
    pub fn new(name: impl Into<String>, default_rate: Rate) -> Self {
        Distribution {
            name: name.into(),
            data: BTreeMap::new(),
            total: 0,
            last_update: None,
            rate: default_rate,
            rate_overridden: false,
            observed: None,
        }
    }

    /// Insert or replace a label count, keeping the total in step.
    ///
    /// Returns `false` and leaves the distribution untouched when the new
    /// total would not fit in a `u64`.
    pub fn insert(&mut self, label: impl Into<String>, count: u64) -> bool {
        let label = label.into();
        let rest = self.total - self.count(&label);
        let Some(total) = rest.checked_add(count) else {
            return false;
        };
        self.data.insert(label, count);
        self.total = total;
        true
    }

    pub fn count(&self, label: &str) -> u64 {
        self.data.get(label).copied().unwrap_or(0)
    }

    pub fn probability(&self, label: &str) -> f64 {
        probability(self.count(label), self.total)
    }

    /// Decay every field with the distribution's own rate
    pub fn decay(&mut self, now: Timestamp) {
        self.decay_with(self.rate, now);
    }

    /// Decay every field with `rate`, then recompute the total and stamp `now`.
    ///
    /// A step that would leave some non-zero count unchanged is not applied and
    /// `last_update` stays put, so the elapsed time carries into the next call.
    pub fn decay_with(&mut self, rate: Rate, now: Timestamp) {
        let f = decay::factor(self.last_update, rate, now);
        if !decay::moves_all(self.data.values().copied(), f) {
            return;
        }
        let mut total = 0u64;
        for count in self.data.values_mut() {
            *count = decay::scale(*count, f);
            total = total.saturating_add(*count);
        }
        self.total = total;
        self.last_update = Some(now);
    }

    pub fn snapshot(&self, rate: Rate) -> DistributionSnapshot {
        DistributionSnapshot {
            distribution: self.name.clone(),
            total: self.total,
            data: self.data.clone(),
            rate,
        }
    }
}

pub fn probability(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

/// Response of a full-distribution query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionSnapshot {
    pub distribution: String,
    #[serde(rename = "Z")]
    pub total: u64,
    pub data: BTreeMap<String, u64>,
    pub rate: Rate,
}

/// Response of a single-field query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSnapshot {
    pub distribution: String,
    pub field: String,
    pub count: u64,
    #[serde(rename = "Z")]
    pub total: u64,
    pub probability: f64,
    pub rate: Rate,
}
