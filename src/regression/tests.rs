// Scenario tests for window-over-window regression detection
//
// - Realistic duration distributions (alternating spread around a mean)
// - Sustained shifts must be reported exactly once
// - Natural variance at low sample counts must not fire

use super::*;
use crate::record::ExecutionRecord;
use crate::stats::{QueryStats, WindowSnapshot};
use std::collections::BTreeMap;

/// `count` executions alternating between `mean - spread` and `mean + spread`
fn query(id: &str, count: usize, mean: f64, spread: f64) -> QueryStats {
    let mut stats = QueryStats::new(id);
    for i in 0..count {
        let d = if i % 2 == 0 { mean - spread } else { mean + spread };
        stats.record(&ExecutionRecord::new(id, i as u64, d));
    }
    stats
}

fn snapshot(window_index: u64, queries: Vec<QueryStats>) -> WindowSnapshot {
    let stats: BTreeMap<String, QueryStats> = queries
        .into_iter()
        .map(|q| (q.query_id.clone(), q))
        .collect();
    WindowSnapshot::new(window_index, 0, stats)
}

fn detector() -> RegressionDetector {
    RegressionDetector::new(RegressionConfig::default(), 30)
}

fn detector_without_noise_filter() -> RegressionDetector {
    RegressionDetector::new(
        RegressionConfig {
            enable_noise_filtering: false,
            ..RegressionConfig::strict()
        },
        30,
    )
}

/// Q2 goes from 50ms to 70ms over 200 samples per window
///
/// Expected: one event with relative_change 0.4, no repeat while the mean
/// stays at 70ms
#[test]
fn test_sustained_shift_reported_once() {
    let mut detector = detector();
    let n = snapshot(5, vec![query("Q2", 200, 50.0, 5.0)]);
    let n1 = snapshot(6, vec![query("Q2", 200, 70.0, 5.0)]);
    let n2 = snapshot(7, vec![query("Q2", 200, 70.0, 5.0)]);

    let event = detector.compare("Q2", &n, &n1).expect("regression expected");
    assert_eq!(event.query_id, "Q2");
    assert_eq!(event.prior_window, 5);
    assert_eq!(event.current_window, 6);
    assert_eq!(event.metric, MEAN_DURATION_METRIC);
    assert!((event.relative_change - 0.4).abs() < 1e-9);
    assert!((event.delta - 20.0).abs() < 1e-9);
    assert!(event.confidence > 0.999);
    assert_eq!(event.sample_sizes, SampleSizes { prior: 200, current: 200 });

    assert!(detector.compare("Q2", &n1, &n2).is_none());
}

/// A still-growing query is suppressed until the cooldown elapses
#[test]
fn test_cooldown_counts_windows() {
    let mut detector = detector();
    let windows = [
        snapshot(0, vec![query("Q", 100, 50.0, 2.0)]),
        snapshot(1, vec![query("Q", 100, 70.0, 2.0)]),
        snapshot(2, vec![query("Q", 100, 90.0, 2.0)]),
        snapshot(3, vec![query("Q", 100, 120.0, 2.0)]),
        snapshot(4, vec![query("Q", 100, 160.0, 2.0)]),
    ];

    let fired: Vec<bool> = windows
        .windows(2)
        .map(|pair| detector.compare("Q", &pair[0], &pair[1]).is_some())
        .collect();

    // Fires at window 1, cools down for windows 2 and 3, fires again at 4
    assert_eq!(fired, vec![true, false, false, true]);
}

/// Once the condition clears the next shift is reported immediately
#[test]
fn test_cleared_condition_rearms() {
    let mut detector = detector();
    let w0 = snapshot(0, vec![query("Q", 100, 50.0, 2.0)]);
    let w1 = snapshot(1, vec![query("Q", 100, 70.0, 2.0)]);
    let w2 = snapshot(2, vec![query("Q", 100, 70.0, 2.0)]);
    let w3 = snapshot(3, vec![query("Q", 100, 100.0, 2.0)]);

    assert!(detector.compare("Q", &w0, &w1).is_some());
    assert!(detector.is_reported("Q"));
    assert!(detector.compare("Q", &w1, &w2).is_none());
    assert!(!detector.is_reported("Q"));
    assert!(detector.compare("Q", &w2, &w3).is_some());
}

/// Large relative change below the cold-start gate stays silent
#[test]
fn test_insufficient_samples_never_fire() {
    let mut detector = detector();
    let prior = snapshot(0, vec![query("Q", 20, 50.0, 1.0)]);
    let current = snapshot(1, vec![query("Q", 200, 500.0, 1.0)]);
    assert!(detector.compare("Q", &prior, &current).is_none());

    let prior = snapshot(0, vec![query("Q", 200, 50.0, 1.0)]);
    let current = snapshot(1, vec![query("Q", 29, 500.0, 1.0)]);
    assert!(detector.compare("Q", &prior, &current).is_none());
}

/// +30% on a wildly varying query is not statistically supported
#[test]
fn test_natural_variance_no_false_positive() {
    let mut detector = detector();
    let prior = snapshot(0, vec![query("Q", 30, 50.0, 49.0)]);
    let current = snapshot(1, vec![query("Q", 30, 65.0, 49.0)]);
    assert!(detector.compare("Q", &prior, &current).is_none());
}

/// Small but certain shifts stay below the relative threshold
#[test]
fn test_small_shift_below_threshold() {
    let mut detector = detector();
    let prior = snapshot(0, vec![query("Q", 500, 100.0, 1.0)]);
    let current = snapshot(1, vec![query("Q", 500, 110.0, 1.0)]);
    assert!(detector.compare("Q", &prior, &current).is_none());
}

/// Speed-ups are improvements, not regressions
#[test]
fn test_speedup_not_reported() {
    let mut detector = detector();
    let prior = snapshot(0, vec![query("Q", 200, 70.0, 5.0)]);
    let current = snapshot(1, vec![query("Q", 200, 35.0, 5.0)]);
    assert!(detector.compare("Q", &prior, &current).is_none());
}

#[test]
fn test_missing_query_is_not_compared() {
    let mut detector = detector();
    let prior = snapshot(0, vec![query("A", 100, 50.0, 1.0)]);
    let current = snapshot(1, vec![query("B", 100, 500.0, 1.0)]);
    assert!(detector.compare("A", &prior, &current).is_none());
    assert!(detector.compare("B", &prior, &current).is_none());
}

#[test]
fn test_noise_filter_skips_noisy_prior() {
    let config = RegressionConfig {
        enable_noise_filtering: true,
        noise_threshold: 0.5,
        ..RegressionConfig::default()
    };
    let mut detector = RegressionDetector::new(config, 30);
    let prior = snapshot(0, vec![query("Q", 100, 50.0, 45.0)]);
    let current = snapshot(1, vec![query("Q", 100, 500.0, 1.0)]);

    assert!(detector.compare("Q", &prior, &current).is_none());
    assert_eq!(detector.noisy_skipped(), 1);
}

#[test]
fn test_noise_filter_skips_noisy_current() {
    let mut detector = RegressionDetector::new(RegressionConfig::strict(), 30);
    let prior = snapshot(0, vec![query("Q", 200, 50.0, 1.0)]);
    // CV 0.8 against the strict threshold of 0.3
    let current = snapshot(1, vec![query("Q", 200, 100.0, 80.0)]);

    assert!(detector.compare("Q", &prior, &current).is_none());
    assert_eq!(detector.noisy_skipped(), 1);

    let mut unfiltered = detector_without_noise_filter();
    assert!(unfiltered.compare("Q", &prior, &current).is_some());
}

#[test]
fn test_compare_snapshots_counts_noisy() {
    let config = RegressionConfig {
        enable_noise_filtering: true,
        ..RegressionConfig::default()
    };
    let mut detector = RegressionDetector::new(config, 30);
    let prior = snapshot(
        0,
        vec![query("noisy", 100, 50.0, 45.0), query("stable", 100, 50.0, 1.0)],
    );
    let current = snapshot(
        1,
        vec![query("noisy", 100, 90.0, 1.0), query("stable", 100, 90.0, 1.0)],
    );

    let events = detector.compare_snapshots(&prior, &current);
    let ids: Vec<&str> = events.iter().map(|e| e.query_id.as_str()).collect();
    assert_eq!(ids, vec!["stable"]);
    assert_eq!(detector.noisy_skipped(), 1);
}

#[test]
fn test_compare_snapshots_in_id_order() {
    let mut detector = detector();
    let prior = snapshot(
        0,
        vec![
            query("zeta", 100, 10.0, 1.0),
            query("alpha", 100, 10.0, 1.0),
            query("steady", 100, 10.0, 1.0),
        ],
    );
    let current = snapshot(
        1,
        vec![
            query("zeta", 100, 20.0, 1.0),
            query("alpha", 100, 20.0, 1.0),
            query("steady", 100, 10.0, 1.0),
        ],
    );

    let events = detector.compare_snapshots(&prior, &current);
    let ids: Vec<&str> = events.iter().map(|e| e.query_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "zeta"]);
}

#[test]
fn test_forget_clears_cooldown() {
    let mut detector = detector();
    let w0 = snapshot(0, vec![query("Q", 100, 50.0, 2.0)]);
    let w1 = snapshot(1, vec![query("Q", 100, 70.0, 2.0)]);
    let w2 = snapshot(2, vec![query("Q", 100, 100.0, 2.0)]);

    assert!(detector.compare("Q", &w0, &w1).is_some());
    detector.forget("Q");
    assert!(!detector.is_reported("Q"));
    assert!(detector.compare("Q", &w1, &w2).is_some());
}

#[test]
fn test_strict_config_suppresses_moderate_shift() {
    let mut strict = RegressionDetector::new(RegressionConfig::strict(), 30);
    let mut default = detector();
    let prior = snapshot(0, vec![query("Q", 200, 50.0, 5.0)]);
    let current = snapshot(1, vec![query("Q", 200, 70.0, 5.0)]);

    assert!(default.compare("Q", &prior, &current).is_some());
    assert!(strict.compare("Q", &prior, &current).is_none());
}
