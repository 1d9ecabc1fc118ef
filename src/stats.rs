//! Streaming per-query statistics and immutable window snapshots
//!
//! Durations are folded into a Welford accumulator so memory stays
//! O(distinct queries) no matter how many executions a window sees.

use crate::record::ExecutionRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Single-pass mean/variance accumulator (Welford)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an accumulator from a summary (count, mean, sample variance)
    pub fn from_summary(count: u64, mean: f64, sample_variance: f64) -> Self {
        let m2 = if count > 1 {
            sample_variance * (count - 1) as f64
        } else {
            0.0
        };
        Self { count, mean, m2 }
    }

    /// Fold one observation into the accumulator
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Combine two accumulators (Chan et al. parallel update)
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let n_a = self.count as f64;
        let n_b = other.count as f64;
        let total = n_a + n_b;
        let delta = other.mean - self.mean;
        self.mean += delta * n_b / total;
        self.m2 += other.m2 + delta * delta * n_a * n_b / total;
        self.count += other.count;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the observations; undefined when empty
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Unbiased sample variance (n-1); 0.0 with fewer than two observations
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).max(0.0)
        }
    }

    /// Population variance (n); 0.0 when empty
    pub fn population_variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }
}

/// Per-query accumulator over one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStats {
    pub query_id: String,
    pub sample_count: u64,
    pub total_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    /// Sum of rows returned; `None` when no record in the window tracked rows
    pub total_rows: Option<u64>,
    pub error_count: u64,
    #[serde(skip)]
    durations: RunningStats,
}

impl QueryStats {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            sample_count: 0,
            total_duration_ms: 0.0,
            min_duration_ms: f64::INFINITY,
            max_duration_ms: f64::NEG_INFINITY,
            total_rows: None,
            error_count: 0,
            durations: RunningStats::new(),
        }
    }

    /// Fold a validated record into the accumulator
    pub fn record(&mut self, record: &ExecutionRecord) {
        let duration = record.duration_ms;
        self.sample_count += 1;
        self.total_duration_ms += duration;
        self.min_duration_ms = self.min_duration_ms.min(duration);
        self.max_duration_ms = self.max_duration_ms.max(duration);
        self.durations.push(duration);

        if let Some(rows) = record.rows_returned {
            let total = self.total_rows.get_or_insert(0);
            *total = total.saturating_add(rows);
        }
        if record.error {
            self.error_count += 1;
        }
    }

    /// Mean duration; defined only once at least one sample is recorded
    pub fn mean_duration_ms(&self) -> Option<f64> {
        self.durations.mean()
    }

    /// Sample variance of durations
    pub fn variance(&self) -> f64 {
        self.durations.sample_variance()
    }

    pub fn population_variance(&self) -> f64 {
        self.durations.population_variance()
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Fraction of executions that failed
    pub fn error_rate(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.sample_count as f64
        }
    }

    pub fn min_duration(&self) -> Option<f64> {
        (self.sample_count > 0).then_some(self.min_duration_ms)
    }

    pub fn max_duration(&self) -> Option<f64> {
        (self.sample_count > 0).then_some(self.max_duration_ms)
    }

    /// The Welford accumulator backing the duration moments
    pub fn durations(&self) -> &RunningStats {
        &self.durations
    }
}

/// Summary totals across every query of a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotTotals {
    pub distinct_queries: usize,
    pub total_executions: u64,
    pub total_errors: u64,
    pub total_duration_ms: f64,
}

/// Read-only statistics of one closed window
///
/// Published by the aggregator at window close and never mutated
/// afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub window_index: u64,
    /// Records rejected by validation while this window was open
    pub rejected: u64,
    stats: BTreeMap<String, QueryStats>,
}

impl WindowSnapshot {
    pub fn new(window_index: u64, rejected: u64, stats: BTreeMap<String, QueryStats>) -> Self {
        Self {
            window_index,
            rejected,
            stats,
        }
    }

    pub fn get(&self, query_id: &str) -> Option<&QueryStats> {
        self.stats.get(query_id)
    }

    /// Iterate stats in ascending query_id order
    pub fn iter(&self) -> impl Iterator<Item = &QueryStats> {
        self.stats.values()
    }

    pub fn query_ids(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    pub fn stats(&self) -> &BTreeMap<String, QueryStats> {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Window totals across every query
    pub fn totals(&self) -> SnapshotTotals {
        if self.stats.is_empty() {
            return SnapshotTotals {
                distinct_queries: 0,
                total_executions: 0,
                total_errors: 0,
                total_duration_ms: 0.0,
            };
        }

        let total_executions = self.iter().map(|s| s.sample_count).sum();
        let total_errors = self.iter().map(|s| s.error_count).sum();
        let total_duration_ms = self.iter().map(|s| s.total_duration_ms).sum();

        SnapshotTotals {
            distinct_queries: self.stats.len(),
            total_executions,
            total_errors,
            total_duration_ms,
        }
    }
}
