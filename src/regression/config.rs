// Configuration for statistical regression detection
//
// A regression requires BOTH a relative slow-down above `relative_threshold`
// AND statistical confidence above `confidence_threshold`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Configuration for statistical regression detection
///
/// # Example
/// ```
/// use queryscope::regression::RegressionConfig;
///
/// let config = RegressionConfig::default();
/// assert_eq!(config.relative_threshold, 0.25); // +25% mean duration
/// assert_eq!(config.confidence_threshold, 0.95);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Minimum relative increase in mean duration
    ///
    /// - 0.25 (default): current mean must exceed the prior mean by more than 25%
    pub relative_threshold: f64,

    /// Minimum confidence (1 - two-sided p-value of Welch's t-test)
    ///
    /// - 0.95 (default): 95% confidence, <5% false positive rate
    /// - 0.99: stricter (fewer false positives, more false negatives)
    /// - 0.90: looser (more false positives, fewer false negatives)
    pub confidence_threshold: f64,

    /// Windows during which a reported, still-present shift is not re-reported
    ///
    /// Default: 3 windows
    pub cooldown_windows: u64,

    /// Skip queries whose prior or current window is too noisy to compare
    ///
    /// Default: false
    pub enable_noise_filtering: bool,

    /// Coefficient of variation (std_dev / mean) above which a window is noisy
    ///
    /// Default: 0.5 (50% CV threshold)
    pub noise_threshold: f64,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            relative_threshold: 0.25,
            confidence_threshold: 0.95,
            cooldown_windows: 3,
            enable_noise_filtering: false,
            noise_threshold: 0.5,
        }
    }
}

impl RegressionConfig {
    /// Create a strict configuration (fewer false positives, more false negatives)
    pub fn strict() -> Self {
        Self {
            relative_threshold: 0.5,
            confidence_threshold: 0.99,
            cooldown_windows: 6,
            enable_noise_filtering: true,
            noise_threshold: 0.3,
        }
    }

    /// Create a permissive configuration (more false positives, fewer false negatives)
    pub fn permissive() -> Self {
        Self {
            relative_threshold: 0.1,
            confidence_threshold: 0.90,
            cooldown_windows: 1,
            enable_noise_filtering: false,
            noise_threshold: 1.0,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relative_threshold.is_nan() || self.relative_threshold <= 0.0 {
            return Err(ConfigError::invalid(
                "regression.relative_threshold",
                format!("must be > 0, got {}", self.relative_threshold),
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::invalid(
                "regression.confidence_threshold",
                format!("must be in [0, 1], got {}", self.confidence_threshold),
            ));
        }

        if self.noise_threshold < 0.0 {
            return Err(ConfigError::invalid(
                "regression.noise_threshold",
                format!("must be non-negative, got {}", self.noise_threshold),
            ));
        }

        Ok(())
    }
}
