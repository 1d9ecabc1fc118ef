//! The analysis pipeline
//!
//! `Analyzer` owns every component and drives windows:
//!
//! ```text
//! record -> Aggregator ----------------------> (window close) snapshot
//!    \                                              |-> Ranker, EfficiencyScorer
//!     \-> AnomalyDetector (reads Baseline)          |-> BaselineStore update + eviction
//!                                                   '-> RegressionDetector (prior vs current)
//! ```
//!
//! Ingestion only takes the aggregator's shard locks and a shared read of
//! the baseline store. Window closes are serialized by one mutex, so
//! baselines and regression comparisons see windows strictly in order.

use crate::aggregator::Aggregator;
use crate::anomaly::{AnomalyDetector, AnomalyEvent, AnomalySummary};
use crate::baseline::{Baseline, BaselineStore};
use crate::config::{AnalyzerConfig, WindowSize};
use crate::efficiency::{EfficiencyReport, EfficiencyScorer};
use crate::error::{ConfigError, IngestError};
use crate::ranker::{rank, rank_scores, RankedReport};
use crate::record::ExecutionRecord;
use crate::regression::{RegressionDetector, RegressionEvent};
use crate::stats::{SnapshotTotals, WindowSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// No time window has started yet
const UNSET: u64 = u64::MAX;

/// Everything produced when a window closes
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub snapshot: Arc<WindowSnapshot>,
    pub totals: SnapshotTotals,
    pub ranking: RankedReport,
    pub efficiency: EfficiencyReport,
    /// Queries ordered by efficiency score, undefined scores last
    pub efficiency_ranking: RankedReport,
    pub regressions: Vec<RegressionEvent>,
    /// Queries whose baselines were dropped at this close
    pub evicted: Vec<String>,
}

impl WindowReport {
    pub fn window_index(&self) -> u64 {
        self.snapshot.window_index
    }
}

/// Result of ingesting one record
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub anomaly: Option<AnomalyEvent>,
    /// Report of the window this record closed, if any
    pub closed: Option<WindowReport>,
}

/// State touched only at window close
#[derive(Debug)]
struct WindowPipeline {
    regression: RegressionDetector,
    previous: Option<Arc<WindowSnapshot>>,
}

/// Streaming query analyzer
///
/// # Example
///
/// ```
/// use queryscope::config::{AnalyzerConfig, WindowSize};
/// use queryscope::engine::Analyzer;
/// use queryscope::record::ExecutionRecord;
///
/// let config = AnalyzerConfig {
///     window: WindowSize::Records(2),
///     ..AnalyzerConfig::default()
/// };
/// let analyzer = Analyzer::new(config).unwrap();
///
/// assert!(analyzer.ingest(&ExecutionRecord::new("Q1", 0, 5.0)).unwrap().closed.is_none());
/// let outcome = analyzer.ingest(&ExecutionRecord::new("Q1", 1, 7.0)).unwrap();
/// let report = outcome.closed.unwrap();
/// assert_eq!(report.window_index(), 0);
/// assert_eq!(report.totals.total_executions, 2);
/// ```
#[derive(Debug)]
pub struct Analyzer {
    config: AnalyzerConfig,
    aggregator: Aggregator,
    scorer: EfficiencyScorer,
    baselines: RwLock<BaselineStore>,
    anomaly: AnomalyDetector,
    pipeline: Mutex<WindowPipeline>,
    window_start: AtomicU64,
    windows_closed: AtomicU64,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let aggregator = Aggregator::new(config.ingest.shards, config.ingest.max_tracked_queries);
        let scorer = EfficiencyScorer::new(config.score_formula);
        let baselines = BaselineStore::new(config.baseline.policy, config.baseline.eviction_ttl);
        let anomaly =
            AnomalyDetector::new(config.anomaly.clone(), config.min_samples, config.ingest.shards);
        let regression = RegressionDetector::new(config.regression.clone(), config.min_samples);

        tracing::debug!(window = ?config.window, min_samples = config.min_samples, "analyzer ready");

        Ok(Self {
            config,
            aggregator,
            scorer,
            baselines: RwLock::new(baselines),
            anomaly,
            pipeline: Mutex::new(WindowPipeline {
                regression,
                previous: None,
            }),
            window_start: AtomicU64::new(UNSET),
            windows_closed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Ingest one record
    ///
    /// The record is aggregated into the open window and checked against
    /// its query's baseline. A time window whose end the record's timestamp
    /// has reached is closed first; a count window that the record fills is
    /// closed afterwards.
    pub fn ingest(&self, record: &ExecutionRecord) -> Result<IngestOutcome, IngestError> {
        let mut outcome = IngestOutcome::default();

        if record.validate().is_ok() {
            outcome.closed = self.roll_time_window(record.timestamp_ms);
        }

        // A window that was just closed leaves an empty one behind, so the
        // tracked-query limit cannot reject this record after a roll.
        self.aggregator.ingest(record)?;

        outcome.anomaly = {
            let baselines = self.baselines.read().unwrap_or_else(PoisonError::into_inner);
            baselines
                .get(&record.query_id)
                .and_then(|baseline| self.anomaly.check(record, baseline))
        };

        if outcome.closed.is_none() {
            outcome.closed = self.fill_count_window();
        }

        Ok(outcome)
    }

    /// Close the open window now, regardless of the window policy
    pub fn close_window(&self) -> WindowReport {
        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        self.window_start.store(UNSET, Ordering::Release);
        self.close_locked(&mut pipeline, 1)
    }

    fn roll_time_window(&self, timestamp_ms: u64) -> Option<WindowReport> {
        let WindowSize::DurationMs(duration) = self.config.window else {
            return None;
        };

        let start = self.window_start.load(Ordering::Acquire);
        if start == UNSET {
            let aligned = timestamp_ms - timestamp_ms % duration;
            // Losing the race means another record already opened the window
            let _ = self.window_start.compare_exchange(
                UNSET,
                aligned,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            return None;
        }
        if timestamp_ms < start.saturating_add(duration) {
            return None;
        }

        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        let start = self.window_start.load(Ordering::Acquire);
        if start == UNSET || timestamp_ms < start.saturating_add(duration) {
            return None;
        }
        let elapsed = (timestamp_ms - start) / duration;
        self.window_start
            .store(start + elapsed * duration, Ordering::Release);
        Some(self.close_locked(&mut pipeline, elapsed))
    }

    /// Close the count window once it holds `limit` records
    ///
    /// Producers that pass the first check block on the pipeline lock until
    /// the close, so each can add at most one record past the limit: a window
    /// holds between `limit` and `limit + producers - 1` records.
    fn fill_count_window(&self) -> Option<WindowReport> {
        let WindowSize::Records(limit) = self.config.window else {
            return None;
        };
        if self.aggregator.pending_records() < limit {
            return None;
        }

        let mut pipeline = self.pipeline.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have closed it while we waited
        if self.aggregator.pending_records() < limit {
            return None;
        }
        Some(self.close_locked(&mut pipeline, 1))
    }

    fn close_locked(&self, pipeline: &mut WindowPipeline, steps: u64) -> WindowReport {
        let snapshot = Arc::new(self.aggregator.close_window_advancing(steps));
        let ranking_config = &self.config.ranking;

        let ranking = rank(
            &snapshot,
            ranking_config.metric,
            ranking_config.order,
            ranking_config.top_k,
        );
        let efficiency = self.scorer.score_snapshot(&snapshot);
        let efficiency_ranking =
            rank_scores(&efficiency, ranking_config.order, ranking_config.top_k);
        let totals = snapshot.totals();

        // Idle windows skipped by this close count toward the eviction TTL
        let last_elapsed = snapshot.window_index.saturating_add(steps.saturating_sub(1));
        let evicted = {
            let mut baselines = self.baselines.write().unwrap_or_else(PoisonError::into_inner);
            baselines.apply_snapshot(&snapshot);
            baselines.evict_stale(last_elapsed)
        };

        let regressions = match &pipeline.previous {
            Some(prior) => pipeline.regression.compare_snapshots(prior, &snapshot),
            None => Vec::new(),
        };

        for query_id in &evicted {
            self.anomaly.forget(query_id);
            pipeline.regression.forget(query_id);
        }
        pipeline.previous = Some(Arc::clone(&snapshot));
        self.windows_closed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            window = snapshot.window_index,
            queries = totals.distinct_queries,
            executions = totals.total_executions,
            regressions = regressions.len(),
            evicted = evicted.len(),
            "window report ready"
        );

        WindowReport {
            snapshot,
            totals,
            ranking,
            efficiency,
            efficiency_ranking,
            regressions,
            evicted,
        }
    }

    /// Current baseline of a query, if tracked
    pub fn baseline(&self, query_id: &str) -> Option<Baseline> {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(query_id)
            .cloned()
    }

    pub fn tracked_baselines(&self) -> usize {
        self.baselines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn anomaly_summary(&self) -> AnomalySummary {
        self.anomaly.summary()
    }

    /// Records skipped by the anomaly detector during cold start
    pub fn skipped_cold_start(&self) -> u64 {
        self.anomaly.skipped_cold_start()
    }

    /// Regression comparisons skipped by the noise filter
    pub fn regression_noisy_skipped(&self) -> u64 {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .regression
            .noisy_skipped()
    }

    pub fn rejected_total(&self) -> u64 {
        self.aggregator.rejected_total()
    }

    pub fn exhausted_total(&self) -> u64 {
        self.aggregator.exhausted_total()
    }

    pub fn windows_closed(&self) -> u64 {
        self.windows_closed.load(Ordering::Relaxed)
    }

    pub fn pending_records(&self) -> u64 {
        self.aggregator.pending_records()
    }

    pub fn current_window_index(&self) -> u64 {
        self.aggregator.current_window_index()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::AnomalySeverity;
    use crate::error::ValidationError;

    fn analyzer(window: WindowSize) -> Analyzer {
        Analyzer::new(AnalyzerConfig {
            window,
            ..AnalyzerConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalyzerConfig {
            min_samples: 0,
            ..AnalyzerConfig::default()
        };
        assert!(Analyzer::new(config).is_err());
    }

    #[test]
    fn test_count_window_closes_on_fill() {
        let analyzer = analyzer(WindowSize::Records(3));
        for i in 0..2 {
            let outcome = analyzer.ingest(&ExecutionRecord::new("Q", i, 1.0)).unwrap();
            assert!(outcome.closed.is_none());
        }
        let report = analyzer
            .ingest(&ExecutionRecord::new("Q", 2, 1.0))
            .unwrap()
            .closed
            .unwrap();
        assert_eq!(report.window_index(), 0);
        assert_eq!(report.totals.total_executions, 3);
        assert_eq!(analyzer.pending_records(), 0);
        assert_eq!(analyzer.current_window_index(), 1);
        assert_eq!(analyzer.windows_closed(), 1);
    }

    #[test]
    fn test_rejected_records_do_not_fill_window() {
        let analyzer = analyzer(WindowSize::Records(2));
        let err = analyzer
            .ingest(&ExecutionRecord::new("", 0, 1.0))
            .unwrap_err();
        assert_eq!(err, IngestError::Validation(ValidationError::MissingQueryId));
        assert!(analyzer
            .ingest(&ExecutionRecord::new("Q", 0, -1.0))
            .is_err());

        assert!(analyzer.ingest(&ExecutionRecord::new("Q", 1, 1.0)).unwrap().closed.is_none());
        assert_eq!(analyzer.rejected_total(), 2);

        let report = analyzer.ingest(&ExecutionRecord::new("Q", 2, 1.0)).unwrap().closed.unwrap();
        assert_eq!(report.snapshot.rejected, 2);
    }

    #[test]
    fn test_time_windows_align_and_skip_idle() {
        let analyzer = analyzer(WindowSize::DurationMs(1000));
        analyzer.ingest(&ExecutionRecord::new("Q", 1_500, 1.0)).unwrap();
        analyzer.ingest(&ExecutionRecord::new("Q", 1_999, 1.0)).unwrap();

        // 2000 opens the next aligned window [2000, 3000)
        let report = analyzer
            .ingest(&ExecutionRecord::new("Q", 2_000, 1.0))
            .unwrap()
            .closed
            .unwrap();
        assert_eq!(report.window_index(), 0);
        assert_eq!(report.totals.total_executions, 2);

        // Two idle windows pass before 5_100
        let report = analyzer
            .ingest(&ExecutionRecord::new("Q", 5_100, 1.0))
            .unwrap()
            .closed
            .unwrap();
        assert_eq!(report.window_index(), 1);
        assert_eq!(analyzer.current_window_index(), 4);
    }

    #[test]
    fn test_late_record_lands_in_open_window() {
        let analyzer = analyzer(WindowSize::DurationMs(1000));
        analyzer.ingest(&ExecutionRecord::new("Q", 10_000, 1.0)).unwrap();
        let outcome = analyzer.ingest(&ExecutionRecord::new("Q", 9_000, 1.0)).unwrap();
        assert!(outcome.closed.is_none());
        assert_eq!(analyzer.pending_records(), 2);
    }

    #[test]
    fn test_anomaly_after_cold_start() {
        let analyzer = analyzer(WindowSize::Records(40));
        for i in 0..40 {
            let outcome = analyzer.ingest(&ExecutionRecord::new("Q1", i, 10.0)).unwrap();
            assert!(outcome.anomaly.is_none());
        }
        assert!(analyzer.baseline("Q1").unwrap().is_usable(30));

        let outcome = analyzer.ingest(&ExecutionRecord::new("Q1", 40, 100.0)).unwrap();
        let event = outcome.anomaly.unwrap();
        assert_eq!(event.severity, AnomalySeverity::High);
        assert_eq!(analyzer.anomaly_summary().high, 1);
    }

    #[test]
    fn test_explicit_close_reports_partial_window() {
        let analyzer = analyzer(WindowSize::Records(1000));
        analyzer
            .ingest(&ExecutionRecord::new("A", 0, 4.0).with_rows(8))
            .unwrap();
        analyzer.ingest(&ExecutionRecord::new("B", 0, 1.0)).unwrap();

        let report = analyzer.close_window();
        assert_eq!(report.totals.distinct_queries, 2);
        assert_eq!(report.ranking.entries[0].query_id, "A");
        assert_eq!(report.efficiency.scores["A"], Some(2.0));
        assert_eq!(report.efficiency.scores["B"], None);
        assert_eq!(report.efficiency_ranking.entries[1].query_id, "B");
        assert!(report.regressions.is_empty());
        assert_eq!(analyzer.tracked_baselines(), 2);
    }

    #[test]
    fn test_eviction_forgets_baseline() {
        let config = AnalyzerConfig {
            window: WindowSize::Records(1),
            baseline: crate::config::BaselineConfig {
                eviction_ttl: 2,
                ..Default::default()
            },
            ..AnalyzerConfig::default()
        };
        let analyzer = Analyzer::new(config).unwrap();
        analyzer.ingest(&ExecutionRecord::new("gone", 0, 1.0)).unwrap();
        analyzer.ingest(&ExecutionRecord::new("busy", 1, 1.0)).unwrap();
        let report = analyzer
            .ingest(&ExecutionRecord::new("busy", 2, 1.0))
            .unwrap()
            .closed
            .unwrap();

        assert_eq!(report.evicted, vec!["gone".to_string()]);
        assert!(analyzer.baseline("gone").is_none());
        assert!(analyzer.baseline("busy").is_some());
    }

    #[test]
    fn test_idle_gap_evicts_at_advancing_close() {
        let config = AnalyzerConfig {
            window: WindowSize::DurationMs(1000),
            baseline: crate::config::BaselineConfig {
                eviction_ttl: 3,
                ..Default::default()
            },
            ..AnalyzerConfig::default()
        };
        let analyzer = Analyzer::new(config).unwrap();
        for i in 0..40 {
            analyzer.ingest(&ExecutionRecord::new("Q", i, 10.0)).unwrap();
        }

        // Twenty windows later the old baseline must not score the record
        let outcome = analyzer.ingest(&ExecutionRecord::new("Q", 20_000, 100.0)).unwrap();
        let report = outcome.closed.unwrap();
        assert_eq!(report.window_index(), 0);
        assert_eq!(report.evicted, vec!["Q".to_string()]);
        assert!(outcome.anomaly.is_none());
        assert!(analyzer.baseline("Q").is_none());
        assert!(!analyzer.anomaly.is_flagged("Q"));

        let report = analyzer.close_window();
        assert_eq!(report.window_index(), 20);
        assert!(report.evicted.is_empty());
        let baseline = analyzer.baseline("Q").unwrap();
        assert_eq!(baseline.sample_count, 1);
        assert_eq!(baseline.window_count, 1);
    }

    #[test]
    fn test_short_gap_keeps_baseline() {
        let config = AnalyzerConfig {
            window: WindowSize::DurationMs(1000),
            baseline: crate::config::BaselineConfig {
                eviction_ttl: 3,
                ..Default::default()
            },
            ..AnalyzerConfig::default()
        };
        let analyzer = Analyzer::new(config).unwrap();
        analyzer.ingest(&ExecutionRecord::new("Q", 0, 10.0)).unwrap();

        // Windows 1 and 2 idle: two elapsed windows stay under the TTL
        let report = analyzer
            .ingest(&ExecutionRecord::new("Q", 3_000, 10.0))
            .unwrap()
            .closed
            .unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(analyzer.baseline("Q").unwrap().sample_count, 1);
    }
}
