//! Exponential decay of counts over wall-clock time
//!
//! Law: `factor = rate ^ elapsed_secs`, `new = round(old * factor)` where
//! `round` is `f64::round` (half away from zero). Every field of a
//! distribution is scaled by the same factor, so proportions are kept up to
//! integer rounding. An unset `last_update` or zero elapsed time is an exact
//! no-op, and a clock that went backwards counts as zero elapsed time.
//!
//! Refreshes run about once per request, so steps are often a second long.
//! A distribution only takes a step once the factor moves every non-zero
//! count (see [`moves_all`]). Until then its `last_update` is left alone and
//! the elapsed time accumulates. Repeated short steps therefore land close to
//! one long step instead of sticking at small counts.

use crate::clock::Timestamp;
use crate::error::ValidationError;
use serde::{Serialize, Serializer};

/// Per-second retention factor in `(0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Rate(f64);

impl Rate {
    pub const ONE: Rate = Rate(1.0);

    pub fn new(value: f64) -> Option<Rate> {
        if value > 0.0 && value <= 1.0 {
            Some(Rate(value))
        } else {
            None
        }
    }

    /// Parse request or stored text
    pub fn parse(text: &str) -> Result<Rate, String> {
        let value: f64 = text.trim().parse().map_err(|e| format!("{}", e))?;
        Rate::new(value).ok_or_else(|| format!("rate {} is outside (0, 1]", value))
    }

    pub fn parse_param(param: &'static str, text: &str) -> Result<Rate, ValidationError> {
        Rate::parse(text).map_err(|reason| ValidationError::Malformed { param, reason })
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for Rate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0)
    }
}

/// Scale factor for the time between `last_update` and `now`
pub fn factor(last_update: Option<Timestamp>, rate: Rate, now: Timestamp) -> f64 {
    let elapsed = match last_update {
        Some(t) => now.since(t),
        None => return 1.0,
    };
    if elapsed == 0 || rate == Rate::ONE {
        return 1.0;
    }
    rate.0.powf(elapsed as f64)
}

/// Apply a precomputed factor to one value
pub fn scale(value: u64, factor: f64) -> u64 {
    if factor >= 1.0 {
        return value;
    }
    let scaled = (value as f64 * factor).round();
    // round(x * f) <= x for f <= 1; the min guards float error at 2^53+
    (scaled.max(0.0) as u64).min(value)
}

/// Whether scaling by `factor` changes every non-zero value.
///
/// An identity factor always counts as moving, so the caller restamps.
pub fn moves_all(values: impl IntoIterator<Item = u64>, factor: f64) -> bool {
    factor >= 1.0
        || values
            .into_iter()
            .all(|v| v == 0 || scale(v, factor) < v)
}

/// Decay one count together with its total.
///
/// Distribution-level decay recomputes the total from the decayed counts
/// instead of using the second element.
pub fn decay(
    count: u64,
    total: u64,
    last_update: Option<Timestamp>,
    rate: Rate,
    now: Timestamp,
) -> (u64, u64) {
    let f = factor(last_update, rate, now);
    (scale(count, f), scale(total, f))
}
