//! Rolling per-query baselines fed by closed windows
//!
//! A baseline is only updated at window boundaries. It tracks cold-start
//! progress through `sample_count`; callers check `is_usable` before
//! treating it as authoritative. Queries idle for `eviction_ttl` windows are
//! dropped, and a query that reappears starts a fresh cold start.

use crate::stats::{QueryStats, RunningStats, WindowSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// How window statistics are folded into a baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Exponentially weighted mean/variance with smoothing factor `alpha`
    Ewma { alpha: f64 },
    /// Pooled statistics of the last `depth` windows
    SlidingWindow { depth: usize },
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        UpdatePolicy::Ewma { alpha: 0.3 }
    }
}

/// Reference distribution of a query's durations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub query_id: String,
    pub mean: f64,
    pub variance: f64,
    /// Executions that contributed, cumulative over the baseline's life
    pub sample_count: u64,
    /// Windows that contributed
    pub window_count: u64,
    /// Index of the last window folded in
    pub last_updated: u64,
    #[serde(skip)]
    history: VecDeque<RunningStats>,
}

impl Baseline {
    fn seed(stats: &QueryStats, mean: f64, window_index: u64) -> Self {
        Self {
            query_id: stats.query_id.clone(),
            mean,
            variance: stats.variance(),
            sample_count: stats.sample_count,
            window_count: 1,
            last_updated: window_index,
            history: VecDeque::new(),
        }
    }

    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Whether enough samples have accumulated to leave cold start
    pub fn is_usable(&self, min_samples: u64) -> bool {
        self.sample_count >= min_samples
    }
}

/// Owned store of per-query baselines
#[derive(Debug, Clone)]
pub struct BaselineStore {
    policy: UpdatePolicy,
    eviction_ttl: u64,
    baselines: HashMap<String, Baseline>,
}

impl BaselineStore {
    pub fn new(policy: UpdatePolicy, eviction_ttl: u64) -> Self {
        Self {
            policy,
            eviction_ttl,
            baselines: HashMap::new(),
        }
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    /// Fold one closed window's statistics into the query's baseline
    ///
    /// Returns `false` (and leaves the baseline untouched) for empty stats or
    /// for a window that is not newer than the last one applied.
    pub fn update(&mut self, stats: &QueryStats, window_index: u64) -> bool {
        let Some(window_mean) = stats.mean_duration_ms() else {
            return false;
        };

        let Some(baseline) = self.baselines.get_mut(&stats.query_id) else {
            let mut baseline = Baseline::seed(stats, window_mean, window_index);
            if let UpdatePolicy::SlidingWindow { .. } = self.policy {
                baseline.history.push_back(*stats.durations());
            }
            self.baselines.insert(stats.query_id.clone(), baseline);
            return true;
        };

        if window_index <= baseline.last_updated {
            tracing::warn!(
                query_id = %stats.query_id,
                window = window_index,
                last_updated = baseline.last_updated,
                "ignoring out-of-order baseline update"
            );
            return false;
        }

        match self.policy {
            UpdatePolicy::Ewma { alpha } => {
                let diff = window_mean - baseline.mean;
                baseline.mean += alpha * diff;
                baseline.variance = (1.0 - alpha) * (baseline.variance + alpha * diff * diff)
                    + alpha * stats.variance();
            }
            UpdatePolicy::SlidingWindow { depth } => {
                baseline.history.push_back(*stats.durations());
                while baseline.history.len() > depth.max(1) {
                    baseline.history.pop_front();
                }
                let mut pooled = RunningStats::new();
                for window in &baseline.history {
                    pooled.merge(window);
                }
                baseline.mean = pooled.mean().unwrap_or(window_mean);
                baseline.variance = pooled.sample_variance();
            }
        }

        baseline.sample_count += stats.sample_count;
        baseline.window_count += 1;
        baseline.last_updated = window_index;
        true
    }

    /// Update every query present in a closed window
    pub fn apply_snapshot(&mut self, snapshot: &WindowSnapshot) -> usize {
        snapshot
            .iter()
            .filter(|stats| self.update(stats, snapshot.window_index))
            .count()
    }

    pub fn get(&self, query_id: &str) -> Option<&Baseline> {
        self.baselines.get(query_id)
    }

    /// Drop baselines idle for at least `eviction_ttl` windows
    ///
    /// Returns the evicted query ids in ascending order.
    pub fn evict_stale(&mut self, current_window_index: u64) -> Vec<String> {
        let ttl = self.eviction_ttl;
        let mut evicted: Vec<String> = self
            .baselines
            .values()
            .filter(|b| current_window_index.saturating_sub(b.last_updated) >= ttl)
            .map(|b| b.query_id.clone())
            .collect();
        evicted.sort();

        for id in &evicted {
            self.baselines.remove(id);
        }
        if !evicted.is_empty() {
            tracing::info!(
                window = current_window_index,
                count = evicted.len(),
                "evicted stale baselines"
            );
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}
