// Coefficient-of-variation noise filter
//
// A window whose duration CV exceeds a threshold is too noisy for a mean
// comparison. Queries become noisy through:
// - Cache warm-up and eviction
// - Lock contention with unrelated workloads
// - Plan flips on parameter-sensitive statements
//
// Such windows are skipped before the t-test runs.

use crate::stats::QueryStats;

/// Coefficient of variation (CV = std_dev / mean) of a query's durations
///
/// CV is a normalized measure of variability:
/// - CV near 0: very stable (e.g., CV=0.1 means std is 10% of mean)
/// - CV near 1: highly variable (e.g., CV=1.0 means std equals mean)
/// - CV > 1: extreme variability
///
/// Empty stats and near-zero means report 0.0.
pub fn coefficient_of_variation(stats: &QueryStats) -> f64 {
    let Some(mean) = stats.mean_duration_ms() else {
        return 0.0;
    };
    if mean.abs() < 1e-6 {
        return 0.0;
    }
    stats.stddev() / mean.abs()
}

/// Check if a query's window is "noisy" based on CV threshold
pub fn is_noisy(stats: &QueryStats, threshold: f64) -> bool {
    coefficient_of_variation(stats) > threshold
}
