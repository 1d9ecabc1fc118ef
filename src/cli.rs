//! CLI argument parsing for queryscope

use crate::config::{AnalyzerConfig, WindowSize};
use crate::error::ConfigError;
use crate::ranker::{RankMetric, SortOrder};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    #[default]
    Text,
    /// JSON Lines for machine parsing
    Json,
    /// CSV format for spreadsheet analysis
    Csv,
}

/// Built-in configuration presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Fewer, higher-confidence alerts
    Strict,
    /// Earlier, noisier alerts
    Permissive,
}

#[derive(Parser, Debug)]
#[command(name = "queryscope")]
#[command(version)]
#[command(
    about = "Rank queries by cost, score their efficiency, and flag anomalies and regressions",
    long_about = None
)]
pub struct Cli {
    /// JSON-Lines file of execution records (default: stdin)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Start from a built-in preset instead of the defaults
    #[arg(long, value_enum, conflicts_with = "config")]
    pub preset: Option<Preset>,

    /// Output format (text, json, or csv)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Metric to rank queries by
    #[arg(short, long, value_enum)]
    pub metric: Option<RankMetric>,

    /// Ranking direction
    #[arg(short, long, value_enum)]
    pub order: Option<SortOrder>,

    /// Queries shown per ranking (0 = all)
    #[arg(short = 'k', long = "top-k", value_name = "N")]
    pub top_k: Option<usize>,

    /// Close a window every N accepted records
    #[arg(long = "window-records", value_name = "N", conflicts_with = "window_ms")]
    pub window_records: Option<u64>,

    /// Close windows at aligned boundaries of N milliseconds of record time
    #[arg(long = "window-ms", value_name = "N")]
    pub window_ms: Option<u64>,

    /// Executions required before a baseline can raise alerts
    #[arg(long = "min-samples", value_name = "N")]
    pub min_samples: Option<u64>,

    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Build the analyzer configuration: file or preset, then flag overrides
    pub fn analyzer_config(&self) -> Result<AnalyzerConfig, ConfigError> {
        let mut config = match (&self.config, self.preset) {
            (Some(path), _) => AnalyzerConfig::load(path)?,
            (None, Some(Preset::Strict)) => AnalyzerConfig::strict(),
            (None, Some(Preset::Permissive)) => AnalyzerConfig::permissive(),
            (None, None) => AnalyzerConfig::default(),
        };

        if let Some(metric) = self.metric {
            config.ranking.metric = metric;
        }
        if let Some(order) = self.order {
            config.ranking.order = order;
        }
        if let Some(top_k) = self.top_k {
            config.ranking.top_k = top_k;
        }
        if let Some(records) = self.window_records {
            config.window = WindowSize::Records(records);
        }
        if let Some(ms) = self.window_ms {
            config.window = WindowSize::DurationMs(ms);
        }
        if let Some(min_samples) = self.min_samples {
            config.min_samples = min_samples;
        }

        config.validate()?;
        Ok(config)
    }
}
