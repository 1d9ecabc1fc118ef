// Welch's two-sample t-test from streaming summaries
//
// Window statistics are Welford accumulators, so the test works on
// (count, mean, sample variance) triples instead of raw samples.
// P-values come from the statrs Student-t distribution with
// Welch-Satterthwaite degrees of freedom.

use crate::stats::RunningStats;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Result of comparing two window summaries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    /// t-statistic (positive when the current mean is higher)
    pub statistic: f64,

    /// Welch-Satterthwaite degrees of freedom
    pub df: f64,

    /// Two-tailed p-value: probability the difference is due to chance
    pub pvalue: f64,

    /// 1 - pvalue
    pub confidence: f64,
}

/// Compare two distributions using Welch's unequal-variance t-test
///
/// Returns `None` when either side has fewer than two observations.
///
/// # Example
/// ```
/// use queryscope::regression::welch_test;
/// use queryscope::stats::RunningStats;
///
/// let prior = RunningStats::from_summary(200, 50.0, 25.0);
/// let current = RunningStats::from_summary(200, 70.0, 25.0);
/// let test = welch_test(&prior, &current).unwrap();
/// assert!(test.confidence > 0.999);
/// ```
pub fn welch_test(prior: &RunningStats, current: &RunningStats) -> Option<WelchTest> {
    if prior.count() < 2 || current.count() < 2 {
        return None;
    }
    let n1 = prior.count() as f64;
    let n2 = current.count() as f64;
    let m1 = prior.mean()?;
    let m2 = current.mean()?;
    let se1 = prior.sample_variance() / n1;
    let se2 = current.sample_variance() / n2;
    let se_sq = se1 + se2;
    let diff = m2 - m1;

    if se_sq <= f64::EPSILON * (m1.abs() + m2.abs()).max(1.0) {
        // Both windows constant: any difference is certain, none is noise
        let (statistic, pvalue) = if diff.abs() > 0.0 {
            (diff.signum() * f64::INFINITY, 0.0)
        } else {
            (0.0, 1.0)
        };
        return Some(WelchTest {
            statistic,
            df: n1 + n2 - 2.0,
            pvalue,
            confidence: 1.0 - pvalue,
        });
    }

    let statistic = diff / se_sq.sqrt();
    let df_denominator = se1 * se1 / (n1 - 1.0) + se2 * se2 / (n2 - 1.0);
    let df = if df_denominator > 0.0 {
        se_sq * se_sq / df_denominator
    } else {
        n1 + n2 - 2.0
    };
    let pvalue = student_t_two_sided_p(statistic, df);

    Some(WelchTest {
        statistic,
        df,
        pvalue,
        confidence: 1.0 - pvalue,
    })
}

/// Two-sided p-value of a Student-t statistic
pub fn student_t_two_sided_p(t: f64, df: f64) -> f64 {
    if t.is_nan() || df.is_nan() || df <= 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.cdf(-t.abs())).clamp(0.0, 1.0),
        Err(e) => {
            tracing::warn!(df, error = %e, "invalid Student-t parameters");
            1.0
        }
    }
}
