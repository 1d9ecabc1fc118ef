//! Per-record anomaly detection against rolling baselines
//!
//! Each execution is scored in units of baseline variability:
//! `(observed - mean) / max(stddev, variance_floor)`. The floor keeps the
//! score finite for queries whose baseline is perfectly constant. Severity is
//! a band on the absolute score. Once a query has been flagged, events of the
//! same or lower severity are suppressed until the score falls below the
//! re-arm threshold or the cooldown (in record time) elapses.

use crate::baseline::Baseline;
use crate::record::ExecutionRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Metric name carried by duration anomalies
pub const DURATION_METRIC: &str = "duration_ms";

/// Number of most-deviant events kept for the summary
const SUMMARY_TOP_N: usize = 10;

/// Anomaly severity classification based on deviation score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    /// Above the medium band, below the high band
    Medium,
    /// Above the high band
    High,
}

/// Severity band boundaries on the absolute deviation score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityBands {
    pub medium: f64,
    pub high: f64,
}

impl Default for SeverityBands {
    fn default() -> Self {
        Self {
            medium: 2.0,
            high: 3.0,
        }
    }
}

impl SeverityBands {
    /// Classify an absolute deviation score; `None` below the medium band
    pub fn classify(&self, abs_score: f64) -> Option<AnomalySeverity> {
        if abs_score > self.high {
            Some(AnomalySeverity::High)
        } else if abs_score > self.medium {
            Some(AnomalySeverity::Medium)
        } else {
            None
        }
    }
}

/// Anomaly detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Lower bound on the score denominator, in milliseconds
    pub variance_floor: f64,
    pub thresholds: SeverityBands,
    /// A flagged query re-arms once its score drops below this value
    pub rearm_threshold: f64,
    /// Suppression period after an event, in record time
    pub cooldown_ms: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            variance_floor: 0.1,
            thresholds: SeverityBands::default(),
            rearm_threshold: 1.0,
            cooldown_ms: 300_000,
        }
    }
}

/// Detected anomaly with the baseline it was judged against
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub query_id: String,
    pub timestamp_ms: u64,
    pub metric: &'static str,
    pub observed_value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub deviation_score: f64,
    pub severity: AnomalySeverity,
}

/// Hysteresis state of a flagged query
#[derive(Debug, Clone, Copy)]
struct AlertState {
    severity: AnomalySeverity,
    flagged_at_ms: u64,
}

/// Counts and most deviant events seen so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub medium: u64,
    pub high: u64,
    pub suppressed: u64,
    /// Most deviant events, by absolute score, descending
    pub top: Vec<AnomalyEvent>,
}

impl AnomalySummary {
    pub fn total(&self) -> u64 {
        self.medium + self.high
    }

    fn observe(&mut self, event: &AnomalyEvent) {
        match event.severity {
            AnomalySeverity::Medium => self.medium += 1,
            AnomalySeverity::High => self.high += 1,
        }
        self.top.push(event.clone());
        self.top.sort_by(|a, b| {
            b.deviation_score
                .abs()
                .total_cmp(&a.deviation_score.abs())
        });
        self.top.truncate(SUMMARY_TOP_N);
    }
}

/// Real-time anomaly detector
///
/// Safe to share across ingestion threads: alert state is sharded by query_id.
///
/// # Example
/// ```
/// use queryscope::anomaly::{AnomalyConfig, AnomalyDetector};
/// use queryscope::baseline::{BaselineStore, UpdatePolicy};
/// use queryscope::record::ExecutionRecord;
/// use queryscope::stats::QueryStats;
///
/// let mut window = QueryStats::new("Q1");
/// for _ in 0..40 {
///     window.record(&ExecutionRecord::new("Q1", 0, 10.0));
/// }
/// let mut store = BaselineStore::new(UpdatePolicy::default(), 10);
/// store.update(&window, 0);
///
/// let detector = AnomalyDetector::new(AnomalyConfig::default(), 30, 4);
/// let baseline = store.get("Q1").unwrap();
/// assert!(detector.check(&ExecutionRecord::new("Q1", 1, 10.0), baseline).is_none());
/// assert!(detector.check(&ExecutionRecord::new("Q1", 2, 100.0), baseline).is_some());
/// ```
#[derive(Debug)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    min_samples: u64,
    alerts: Vec<Mutex<HashMap<String, AlertState>>>,
    summary: Mutex<AnomalySummary>,
    skipped_cold: AtomicU64,
}

impl AnomalyDetector {
    /// Create a detector
    ///
    /// # Arguments
    /// * `config` - Bands, floor, re-arm threshold, and cooldown
    /// * `min_samples` - Cold-start gate a baseline must pass before scoring
    /// * `shards` - Lock domains for per-query alert state (min 1)
    pub fn new(config: AnomalyConfig, min_samples: u64, shards: usize) -> Self {
        Self {
            config,
            min_samples,
            alerts: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            summary: Mutex::new(AnomalySummary::default()),
            skipped_cold: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    fn shard(&self, query_id: &str) -> &Mutex<HashMap<String, AlertState>> {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(query_id.as_bytes());
        &self.alerts[(hasher.finish() % self.alerts.len() as u64) as usize]
    }

    /// Deviation of an observation from a baseline, in floored stddevs
    pub fn deviation_score(&self, observed: f64, baseline: &Baseline) -> f64 {
        let denominator = baseline.stddev().max(self.config.variance_floor);
        (observed - baseline.mean) / denominator
    }

    /// Check one record against its query's baseline
    ///
    /// Returns `None` while the baseline is in cold start, when the record is
    /// within the normal band, or when hysteresis suppresses a repeat.
    pub fn check(&self, record: &ExecutionRecord, baseline: &Baseline) -> Option<AnomalyEvent> {
        if !baseline.is_usable(self.min_samples) {
            self.skipped_cold.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let score = self.deviation_score(record.duration_ms, baseline);
        let abs_score = score.abs();
        let severity = self.config.thresholds.classify(abs_score);

        let mut alerts = self
            .shard(&record.query_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if abs_score < self.config.rearm_threshold {
            alerts.remove(&record.query_id);
        }
        let severity = severity?;

        if let Some(state) = alerts.get(&record.query_id) {
            let elapsed = record.timestamp_ms.saturating_sub(state.flagged_at_ms);
            if elapsed < self.config.cooldown_ms && severity <= state.severity {
                drop(alerts);
                self.summary
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .suppressed += 1;
                return None;
            }
        }

        alerts.insert(
            record.query_id.clone(),
            AlertState {
                severity,
                flagged_at_ms: record.timestamp_ms,
            },
        );
        drop(alerts);

        let event = AnomalyEvent {
            query_id: record.query_id.clone(),
            timestamp_ms: record.timestamp_ms,
            metric: DURATION_METRIC,
            observed_value: record.duration_ms,
            baseline_mean: baseline.mean,
            baseline_stddev: baseline.stddev(),
            deviation_score: score,
            severity,
        };
        tracing::warn!(
            query_id = %event.query_id,
            score = event.deviation_score,
            severity = ?event.severity,
            "anomalous execution"
        );
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(&event);
        Some(event)
    }

    /// Drop hysteresis state for an evicted query
    pub fn forget(&self, query_id: &str) {
        self.shard(query_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(query_id);
    }

    /// Whether the query is currently flagged (not re-armed)
    pub fn is_flagged(&self, query_id: &str) -> bool {
        self.shard(query_id)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(query_id)
    }

    /// Records skipped because their baseline was still in cold start
    pub fn skipped_cold_start(&self) -> u64 {
        self.skipped_cold.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> AnomalySummary {
        self.summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{BaselineStore, UpdatePolicy};
    use crate::stats::QueryStats;

    fn baseline_from(id: &str, durations: &[f64]) -> Baseline {
        let mut stats = QueryStats::new(id);
        for d in durations {
            stats.record(&ExecutionRecord::new(id, 0, *d));
        }
        let mut store = BaselineStore::new(UpdatePolicy::default(), 10);
        store.update(&stats, 0);
        store.get(id).cloned().unwrap()
    }

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyConfig::default(), 30, 4)
    }

    /// Baseline with mean 100 and sample stddev 10 over 40 samples
    fn noisy_baseline() -> Baseline {
        let mut durations = Vec::new();
        for _ in 0..20 {
            durations.push(90.0);
            durations.push(110.0);
        }
        let mut baseline = baseline_from("Q", &durations);
        baseline.variance = 100.0;
        baseline
    }

    #[test]
    fn test_severity_classification() {
        let bands = SeverityBands::default();
        assert_eq!(bands.classify(1.5), None);
        assert_eq!(bands.classify(2.0), None);
        assert_eq!(bands.classify(2.5), Some(AnomalySeverity::Medium));
        assert_eq!(bands.classify(3.5), Some(AnomalySeverity::High));
    }

    #[test]
    fn test_cold_start_never_emits() {
        let detector = detector();
        let baseline = baseline_from("Q", &[10.0; 29]);
        let event = detector.check(&ExecutionRecord::new("Q", 0, 10_000.0), &baseline);
        assert!(event.is_none());
        assert_eq!(detector.skipped_cold_start(), 1);
    }

    #[test]
    fn test_constant_baseline_uses_variance_floor() {
        let detector = detector();
        let baseline = baseline_from("Q1", &[10.0; 40]);

        let normal = detector.check(&ExecutionRecord::new("Q1", 0, 10.0), &baseline);
        assert!(normal.is_none());

        let event = detector
            .check(&ExecutionRecord::new("Q1", 1, 100.0), &baseline)
            .unwrap();
        assert_eq!(event.severity, AnomalySeverity::High);
        assert!((event.deviation_score - 900.0).abs() < 1e-9);
        assert_eq!(event.baseline_mean, 10.0);
        assert_eq!(event.baseline_stddev, 0.0);
        assert_eq!(event.metric, "duration_ms");
        assert!(event.deviation_score.is_finite());
    }

    #[test]
    fn test_fast_outliers_are_flagged() {
        let detector = detector();
        let event = detector
            .check(&ExecutionRecord::new("Q", 0, 60.0), &noisy_baseline())
            .unwrap();
        assert!(event.deviation_score < 0.0);
        assert_eq!(event.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_hysteresis_suppresses_repeat_until_rearmed() {
        let detector = detector();
        let baseline = noisy_baseline();

        // Score 3.5: high
        assert!(detector
            .check(&ExecutionRecord::new("Q", 0, 135.0), &baseline)
            .is_some());
        assert!(detector.is_flagged("Q"));

        // Still deviant but not below re-arm: suppressed
        assert!(detector
            .check(&ExecutionRecord::new("Q", 1, 140.0), &baseline)
            .is_none());
        // Score 1.5: above re-arm, no event, still flagged
        assert!(detector
            .check(&ExecutionRecord::new("Q", 2, 115.0), &baseline)
            .is_none());
        assert!(detector.is_flagged("Q"));

        // Score 0.5: re-armed
        detector.check(&ExecutionRecord::new("Q", 3, 105.0), &baseline);
        assert!(!detector.is_flagged("Q"));

        assert!(detector
            .check(&ExecutionRecord::new("Q", 4, 140.0), &baseline)
            .is_some());

        let summary = detector.summary();
        assert_eq!(summary.high, 2);
        assert_eq!(summary.suppressed, 1);
    }

    #[test]
    fn test_escalation_emits_despite_cooldown() {
        let detector = detector();
        let baseline = noisy_baseline();

        let medium = detector
            .check(&ExecutionRecord::new("Q", 0, 125.0), &baseline)
            .unwrap();
        assert_eq!(medium.severity, AnomalySeverity::Medium);

        let high = detector
            .check(&ExecutionRecord::new("Q", 1, 150.0), &baseline)
            .unwrap();
        assert_eq!(high.severity, AnomalySeverity::High);
    }

    #[test]
    fn test_cooldown_elapses() {
        let config = AnomalyConfig {
            cooldown_ms: 1_000,
            ..AnomalyConfig::default()
        };
        let detector = AnomalyDetector::new(config, 30, 2);
        let baseline = noisy_baseline();

        assert!(detector
            .check(&ExecutionRecord::new("Q", 0, 140.0), &baseline)
            .is_some());
        assert!(detector
            .check(&ExecutionRecord::new("Q", 999, 140.0), &baseline)
            .is_none());
        assert!(detector
            .check(&ExecutionRecord::new("Q", 1_000, 140.0), &baseline)
            .is_some());
    }

    #[test]
    fn test_forget_clears_state() {
        let detector = detector();
        let baseline = noisy_baseline();
        detector.check(&ExecutionRecord::new("Q", 0, 140.0), &baseline);
        assert!(detector.is_flagged("Q"));
        detector.forget("Q");
        assert!(!detector.is_flagged("Q"));
    }

    #[test]
    fn test_queries_flag_independently() {
        let detector = detector();
        let a = baseline_from("A", &[10.0; 40]);
        let b = baseline_from("B", &[10.0; 40]);
        assert!(detector.check(&ExecutionRecord::new("A", 0, 50.0), &a).is_some());
        assert!(detector.check(&ExecutionRecord::new("B", 0, 50.0), &b).is_some());
    }

    #[test]
    fn test_summary_keeps_most_deviant() {
        let detector = AnomalyDetector::new(
            AnomalyConfig {
                cooldown_ms: 0,
                ..AnomalyConfig::default()
            },
            30,
            1,
        );
        let baseline = baseline_from("Q", &[10.0; 40]);
        for i in 0..15u64 {
            detector.check(
                &ExecutionRecord::new("Q", i, 20.0 + i as f64),
                &baseline,
            );
        }
        let summary = detector.summary();
        assert_eq!(summary.total(), 15);
        assert_eq!(summary.top.len(), 10);
        assert_eq!(summary.top[0].observed_value, 34.0);
    }
}
