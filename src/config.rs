//! Analyzer configuration
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the
//! options it changes:
//!
//! ```toml
//! min_samples = 50
//! window = { duration_ms = 60000 }
//!
//! [baseline]
//! policy = { sliding_window = { depth = 5 } }
//!
//! [regression]
//! relative_threshold = 0.5
//! ```

use crate::anomaly::{AnomalyConfig, SeverityBands};
use crate::baseline::UpdatePolicy;
use crate::efficiency::ScoreFormula;
use crate::error::ConfigError;
use crate::ranker::{RankMetric, SortOrder};
use crate::regression::RegressionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// When the current window closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSize {
    /// After this many accepted records
    ///
    /// With concurrent producers a window may hold up to one extra record
    /// per producer racing the close.
    Records(u64),
    /// At aligned boundaries of this many milliseconds of record time
    DurationMs(u64),
}

impl Default for WindowSize {
    fn default() -> Self {
        WindowSize::Records(1000)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub metric: RankMetric,
    pub order: SortOrder,
    /// 0 keeps every query
    pub top_k: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            metric: RankMetric::default(),
            order: SortOrder::default(),
            top_k: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub policy: UpdatePolicy,
    /// Windows of inactivity before a baseline is dropped
    pub eviction_ttl: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            policy: UpdatePolicy::default(),
            eviction_ttl: 10,
        }
    }
}

/// Concurrency and memory bounds of the ingestion path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub shards: usize,
    pub queue_capacity: usize,
    pub max_tracked_queries: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            queue_capacity: 8192,
            max_tracked_queries: 100_000,
        }
    }
}

/// Complete analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub window: WindowSize,
    /// Cold-start gate shared by baselines and regression comparisons
    pub min_samples: u64,
    pub ranking: RankingConfig,
    pub score_formula: ScoreFormula,
    pub baseline: BaselineConfig,
    pub anomaly: AnomalyConfig,
    pub regression: RegressionConfig,
    pub ingest: IngestConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window: WindowSize::default(),
            min_samples: 30,
            ranking: RankingConfig::default(),
            score_formula: ScoreFormula::default(),
            baseline: BaselineConfig::default(),
            anomaly: AnomalyConfig::default(),
            regression: RegressionConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Fewer, higher-confidence alerts
    pub fn strict() -> Self {
        Self {
            min_samples: 100,
            anomaly: AnomalyConfig {
                thresholds: SeverityBands {
                    medium: 3.0,
                    high: 4.0,
                },
                rearm_threshold: 1.5,
                ..AnomalyConfig::default()
            },
            regression: RegressionConfig::strict(),
            ..Self::default()
        }
    }

    /// Earlier, noisier alerts
    pub fn permissive() -> Self {
        Self {
            min_samples: 10,
            anomaly: AnomalyConfig {
                thresholds: SeverityBands {
                    medium: 1.5,
                    high: 2.5,
                },
                rearm_threshold: 0.5,
                cooldown_ms: 60_000,
                ..AnomalyConfig::default()
            },
            regression: RegressionConfig::permissive(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading configuration");
        Self::from_toml_str(&content)
    }

    /// Check every option; the error names the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.window {
            WindowSize::Records(0) => {
                return Err(ConfigError::invalid("window.records", "must be > 0"))
            }
            WindowSize::DurationMs(0) => {
                return Err(ConfigError::invalid("window.duration_ms", "must be > 0"))
            }
            _ => {}
        }

        if self.min_samples < 2 {
            return Err(ConfigError::invalid(
                "min_samples",
                format!("must be >= 2, got {}", self.min_samples),
            ));
        }

        if let ScoreFormula::ErrorPenalized { error_weight } = self.score_formula {
            if error_weight.is_nan() || error_weight < 0.0 {
                return Err(ConfigError::invalid(
                    "score_formula.error_weight",
                    format!("must be non-negative, got {error_weight}"),
                ));
            }
        }

        match self.baseline.policy {
            UpdatePolicy::Ewma { alpha } if !(alpha > 0.0 && alpha <= 1.0) => {
                return Err(ConfigError::invalid(
                    "baseline.policy.alpha",
                    format!("must be in (0, 1], got {alpha}"),
                ));
            }
            UpdatePolicy::SlidingWindow { depth: 0 } => {
                return Err(ConfigError::invalid("baseline.policy.depth", "must be >= 1"));
            }
            _ => {}
        }

        if self.baseline.eviction_ttl == 0 {
            return Err(ConfigError::invalid("baseline.eviction_ttl", "must be >= 1"));
        }

        let anomaly = &self.anomaly;
        if anomaly.variance_floor.is_nan() || anomaly.variance_floor <= 0.0 {
            return Err(ConfigError::invalid(
                "anomaly.variance_floor",
                format!("must be > 0, got {}", anomaly.variance_floor),
            ));
        }
        if !(anomaly.thresholds.medium > 0.0 && anomaly.thresholds.medium <= anomaly.thresholds.high)
        {
            return Err(ConfigError::invalid(
                "anomaly.thresholds",
                format!(
                    "need 0 < medium <= high, got medium={} high={}",
                    anomaly.thresholds.medium, anomaly.thresholds.high
                ),
            ));
        }
        if anomaly.rearm_threshold.is_nan() || anomaly.rearm_threshold >= anomaly.thresholds.medium {
            return Err(ConfigError::invalid(
                "anomaly.rearm_threshold",
                format!(
                    "must be below the medium band ({}), got {}",
                    anomaly.thresholds.medium, anomaly.rearm_threshold
                ),
            ));
        }

        self.regression.validate()?;

        if self.ingest.shards == 0 {
            return Err(ConfigError::invalid("ingest.shards", "must be >= 1"));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::invalid("ingest.queue_capacity", "must be >= 1"));
        }
        if self.ingest.max_tracked_queries == 0 {
            return Err(ConfigError::invalid(
                "ingest.max_tracked_queries",
                "must be >= 1",
            ));
        }

        Ok(())
    }
}
