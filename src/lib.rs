//! queryscope - Streaming query profiling analytics
//!
//! Turns a stream of per-execution query records into per-window cost
//! rankings, efficiency scores, and anomaly/regression signals against
//! rolling per-query baselines.
//!
//! ```text
//! records -> Aggregator -> window snapshot -> {Ranker, EfficiencyScorer}
//!                                          -> BaselineStore -> {AnomalyDetector, RegressionDetector}
//! ```

pub mod aggregator;
pub mod anomaly;
pub mod baseline;
pub mod cli;
pub mod config;
pub mod efficiency;
pub mod engine;
pub mod error;
pub mod ingest_queue;
pub mod ranker;
pub mod record;
pub mod regression; // Welch's t-test window comparison
pub mod report;
pub mod stats;

pub use config::AnalyzerConfig;
pub use engine::{Analyzer, IngestOutcome, WindowReport};
pub use error::{ConfigError, IngestError, ValidationError};
pub use record::ExecutionRecord;
