//! Mergeable partial-aggregate states.
//!
//! A [`PartialState`] is the intermediate representation of every supported
//! aggregation over a slice of points. States merge associatively and
//! commutatively, so re-merging a superset of already-merged data yields
//! the same result as merging the full set once; this is what makes the
//! checkpointed incremental path safe to replay.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use vigil_common::types::Aggregator;

/// Running accumulator covering the whole aggregator set: count, sum,
/// min/max, average (sum + count of observed values), distinct count over
/// hashed identities, and quantile samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialState {
    /// Rows observed, including rows without a numeric value.
    pub count: u64,
    /// Rows with a numeric value; the divisor for `avg`.
    pub value_count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Hashed identities for distinct counting.
    pub distinct: HashSet<u64>,
    /// Raw samples for quantile estimation.
    pub samples: Vec<f64>,
}

impl PartialState {
    /// Folds one point into the state. `distinct_key` is the identity used
    /// for distinct counting (a label value, or the formatted value).
    pub fn observe(&mut self, value: Option<f64>, distinct_key: Option<&str>) {
        self.count += 1;
        if let Some(key) = distinct_key {
            self.distinct.insert(hash_key(key));
        }
        if let Some(v) = value {
            self.value_count += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
            self.samples.push(v);
        }
    }

    /// Merges another partial state into this one.
    pub fn merge(&mut self, other: &PartialState) {
        self.count += other.count;
        self.value_count += other.value_count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.distinct.extend(&other.distinct);
        self.samples.extend_from_slice(&other.samples);
    }

    /// Collapses the state into a final scalar for the given aggregator.
    /// Returns `None` when the aggregation is undefined over the observed
    /// data (e.g. `min` with no numeric values).
    pub fn finalize(&self, aggregator: Aggregator) -> Option<f64> {
        match aggregator {
            Aggregator::Count => Some(self.count as f64),
            Aggregator::CountDistinct => Some(self.distinct.len() as f64),
            Aggregator::Min => self.min,
            Aggregator::Max => self.max,
            Aggregator::Sum => Some(self.sum),
            Aggregator::Avg => {
                if self.value_count == 0 {
                    None
                } else {
                    Some(self.sum / self.value_count as f64)
                }
            }
            Aggregator::P50 => self.quantile(0.5),
            Aggregator::P90 => self.quantile(0.9),
            Aggregator::P95 => self.quantile(0.95),
            Aggregator::P99 => self.quantile(0.99),
        }
    }

    /// Quantile by linear interpolation over the sorted samples.
    fn quantile(&self, q: f64) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = q * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            Some(sorted[lo])
        } else {
            let frac = rank - lo as f64;
            Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
        }
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Bucket index for a timestamp relative to the window start:
/// `floor(seconds_since(start, ts) / width_secs)`.
pub fn bucket_index(window_start_secs: i64, ts_secs: i64, width_secs: i64) -> u64 {
    debug_assert!(width_secs > 0);
    ((ts_secs - window_start_secs) / width_secs).max(0) as u64
}
