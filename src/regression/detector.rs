// Window-over-window regression detection with per-query cooldown
//
// Combines the relative-change gate and Welch's t-test:
// 1. Both windows must hold at least `min_samples` executions
// 2. Optionally skip queries with a noisy (high CV) window on either side
// 3. Mean duration must grow by more than `relative_threshold`
// 4. Welch confidence must reach `confidence_threshold`
//
// A query that fired stays quiet while the shift persists, for
// `cooldown_windows` windows, and re-arms once a comparison no longer meets
// the condition.

use super::config::RegressionConfig;
use super::noise_filter::is_noisy;
use super::statistics::welch_test;
use crate::stats::WindowSnapshot;
use serde::Serialize;
use std::collections::HashMap;

/// Metric name carried by regression events
pub const MEAN_DURATION_METRIC: &str = "mean_duration_ms";

/// Executions behind each side of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleSizes {
    pub prior: u64,
    pub current: u64,
}

/// A statistically supported slow-down between two windows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegressionEvent {
    pub query_id: String,
    pub prior_window: u64,
    pub current_window: u64,
    pub metric: &'static str,
    pub prior_value: f64,
    pub current_value: f64,
    /// current - prior
    pub delta: f64,
    /// delta / prior
    pub relative_change: f64,
    /// 1 - two-sided p-value
    pub confidence: f64,
    pub sample_sizes: SampleSizes,
}

/// Compares window snapshots and remembers which shifts were reported
#[derive(Debug, Clone)]
pub struct RegressionDetector {
    config: RegressionConfig,
    min_samples: u64,
    /// query_id -> window index of the last emitted event
    reported: HashMap<String, u64>,
    noisy_skipped: u64,
}

impl RegressionDetector {
    pub fn new(config: RegressionConfig, min_samples: u64) -> Self {
        Self {
            config,
            min_samples,
            reported: HashMap::new(),
            noisy_skipped: 0,
        }
    }

    pub fn config(&self) -> &RegressionConfig {
        &self.config
    }

    /// Compare one query between two closed windows
    ///
    /// Returns `None` when the query is missing from either window, either
    /// side is below the cold-start gate, the change is not a significant
    /// slow-down, or the shift was already reported and is cooling down.
    pub fn compare(
        &mut self,
        query_id: &str,
        prior: &WindowSnapshot,
        current: &WindowSnapshot,
    ) -> Option<RegressionEvent> {
        let before = prior.get(query_id)?;
        let after = current.get(query_id)?;

        if before.sample_count < self.min_samples || after.sample_count < self.min_samples {
            return None;
        }

        let threshold = self.config.noise_threshold;
        if self.config.enable_noise_filtering
            && (is_noisy(before, threshold) || is_noisy(after, threshold))
        {
            self.noisy_skipped += 1;
            return None;
        }

        let prior_mean = before.mean_duration_ms()?;
        let current_mean = after.mean_duration_ms()?;
        let delta = current_mean - prior_mean;
        let relative_change = if prior_mean > 0.0 {
            delta / prior_mean
        } else if delta > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let confidence = welch_test(before.durations(), after.durations())
            .map(|test| test.confidence)
            .unwrap_or(0.0);

        let regressed = relative_change > self.config.relative_threshold
            && confidence >= self.config.confidence_threshold;
        if !regressed {
            self.reported.remove(query_id);
            return None;
        }

        if let Some(&last) = self.reported.get(query_id) {
            if current.window_index.saturating_sub(last) < self.config.cooldown_windows {
                tracing::debug!(query_id, window = current.window_index, "regression cooling down");
                return None;
            }
        }
        self.reported
            .insert(query_id.to_string(), current.window_index);

        let event = RegressionEvent {
            query_id: query_id.to_string(),
            prior_window: prior.window_index,
            current_window: current.window_index,
            metric: MEAN_DURATION_METRIC,
            prior_value: prior_mean,
            current_value: current_mean,
            delta,
            relative_change,
            confidence,
            sample_sizes: SampleSizes {
                prior: before.sample_count,
                current: after.sample_count,
            },
        };
        tracing::info!(
            query_id,
            relative_change = event.relative_change,
            confidence = event.confidence,
            "regression detected"
        );
        Some(event)
    }

    /// Compare every query present in the current window, in id order
    pub fn compare_snapshots(
        &mut self,
        prior: &WindowSnapshot,
        current: &WindowSnapshot,
    ) -> Vec<RegressionEvent> {
        let skipped_before = self.noisy_skipped;
        let events: Vec<RegressionEvent> = current
            .query_ids()
            .filter_map(|id| self.compare(id, prior, current))
            .collect();

        let noisy = self.noisy_skipped - skipped_before;
        if noisy > 0 {
            tracing::debug!(
                window = current.window_index,
                noisy,
                "noisy queries excluded from regression testing"
            );
        }
        events
    }

    /// Drop cooldown state for an evicted query
    pub fn forget(&mut self, query_id: &str) {
        self.reported.remove(query_id);
    }

    /// Whether a reported shift for the query has not yet cleared
    pub fn is_reported(&self, query_id: &str) -> bool {
        self.reported.contains_key(query_id)
    }

    /// Comparisons skipped because either window was too noisy
    pub fn noisy_skipped(&self) -> u64 {
        self.noisy_skipped
    }
}
