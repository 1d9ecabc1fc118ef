// Statistical regression detection between consecutive windows
//
// A query regresses when its mean duration grows by more than a relative
// threshold AND Welch's t-test on the two window summaries says the shift
// is unlikely to be natural variance. Fixed percentage thresholds alone
// yield high false-positive rates at low sample counts, so both conditions
// must hold, and both windows must pass the cold-start gate.
//
// Scientific Foundation:
// [9] Heger, C., Happe, J., & Farahbod, R. (2013). Automated root cause isolation
//     of performance regressions. ICPE. Fixed % thresholds yield high false positives.
//
// Implementation:
// - Welch's t statistic and Welch-Satterthwaite degrees of freedom are computed
//   from streaming summaries (count, mean, variance); raw samples are never kept
// - Two-sided p-values come from the Student-t CDF via the regularized
//   incomplete beta function
// - Optional coefficient-of-variation noise filter skips inherently noisy queries

mod config;
mod detector;
mod noise_filter;
mod statistics;

pub use config::RegressionConfig;
pub use detector::{RegressionDetector, RegressionEvent, SampleSizes, MEAN_DURATION_METRIC};
pub use noise_filter::{coefficient_of_variation, is_noisy};
pub use statistics::{student_t_two_sided_p, welch_test, WelchTest};

#[cfg(test)]
mod tests;
