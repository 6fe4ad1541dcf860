//! Aggregate counters kept alongside each store.
//!
//! A `StatsTracker` lives inside the store's lock and is updated in the same
//! critical section as the record sequence, so a [`StatsSnapshot`] always
//! describes one consistent state of the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time copy of a store's counters, as served by `/api/*/stats`.
///
/// Breakdowns are flattened into `by_<dimension>` keys, e.g. `by_severity`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_received: u64,
    pub current_count: usize,
    pub last_received_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub breakdown: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug)]
pub struct StatsTracker {
    total_received: u64,
    current_count: usize,
    last_received_at: Option<DateTime<Utc>>,
    breakdown: BTreeMap<&'static str, BTreeMap<String, u64>>,
}

impl StatsTracker {
    pub fn new(dimensions: &[&'static str]) -> Self {
        Self {
            total_received: 0,
            current_count: 0,
            last_received_at: None,
            breakdown: dimensions.iter().map(|d| (*d, BTreeMap::new())).collect(),
        }
    }

    pub fn record_insert(&mut self, categories: &[(&'static str, String)], at: DateTime<Utc>) {
        self.total_received += 1;
        self.current_count += 1;
        self.last_received_at = Some(at);
        for (dimension, value) in categories {
            *self
                .breakdown
                .entry(*dimension)
                .or_default()
                .entry(value.clone())
                .or_insert(0) += 1;
        }
    }

    /// Forget a record dropped by capacity eviction. `total_received` is
    /// all-time and stays untouched.
    pub fn record_eviction(&mut self, categories: &[(&'static str, String)]) {
        self.current_count = self.current_count.saturating_sub(1);
        for (dimension, value) in categories {
            let Some(counts) = self.breakdown.get_mut(dimension) else {
                continue;
            };
            if let Some(count) = counts.get_mut(value) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(value);
                }
            }
        }
    }

    /// Reset everything a clear removes. `total_received` survives.
    pub fn reset(&mut self) {
        self.current_count = 0;
        self.last_received_at = None;
        for counts in self.breakdown.values_mut() {
            counts.clear();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_received: self.total_received,
            current_count: self.current_count,
            last_received_at: self.last_received_at,
            breakdown: self
                .breakdown
                .iter()
                .map(|(dimension, counts)| (format!("by_{}", dimension), counts.clone()))
                .collect(),
        }
    }
}
