//! Per-key rate-of-change engine
//!
//! Keeps the last observation of every delta column across poll cycles and
//! turns counter values into per-second rates. Records are never evicted.

use super::value::{ColumnValue, TypedValue};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct DeltaRecord {
    pub value: TypedValue,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DeltaEngine {
    records: HashMap<String, DeltaRecord>,
}

impl DeltaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation and return the rate since the previous one
    ///
    /// Returns `None` on the first observation of `key` (the column is left
    /// out of the event) and when a numeric value follows a stored string,
    /// which re-baselines the key. String values after the first observation
    /// pass through unchanged.
    ///
    /// A non-positive elapsed time reports a rate of zero.
    pub fn observe(
        &mut self,
        key: &str,
        value: &ColumnValue,
        observed_at: DateTime<Utc>,
    ) -> Option<TypedValue> {
        let current = DeltaRecord {
            value: value.typed.clone(),
            observed_at,
        };

        let prior = self.records.insert(key.to_string(), current)?;

        let elapsed_secs = elapsed_seconds(prior.observed_at, observed_at);

        match &value.typed {
            TypedValue::Str(_) => Some(TypedValue::Str(value.raw.clone())),
            TypedValue::Int(_) => {
                let increase = increase(&prior.value, &value.typed)?;
                let rate = if increase > 0.0 && elapsed_secs > 0.0 {
                    round_half_up(increase / elapsed_secs)
                } else {
                    0
                };
                Some(TypedValue::Int(rate))
            }
            TypedValue::Float(_) => {
                let increase = increase(&prior.value, &value.typed)?;
                let rate = if increase > 0.0 && elapsed_secs > 0.0 {
                    increase / elapsed_secs
                } else {
                    0.0
                };
                Some(TypedValue::Float(rate))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&DeltaRecord> {
        self.records.get(key)
    }
}

/// `new - old`, exact for two integers; `None` when either side is a string
fn increase(old: &TypedValue, new: &TypedValue) -> Option<f64> {
    match (old, new) {
        (TypedValue::Int(old), TypedValue::Int(new)) => {
            Some((i128::from(*new) - i128::from(*old)) as f64)
        }
        _ => Some(new.as_f64()? - old.as_f64()?),
    }
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Round to the nearest integer, exact halves away from zero
pub fn round_half_up(value: f64) -> i64 {
    value.round() as i64
}
