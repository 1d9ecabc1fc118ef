//! Error taxonomy for the analysis core
//!
//! Undefined computations (zero-duration scores, cold-start baselines) are
//! not errors and are represented as `Option::None` by the components that
//! produce them.

use thiserror::Error;

/// A malformed execution record. The record is rejected and counted; the
/// stream continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record rejected: query_id is missing or empty")]
    MissingQueryId,

    #[error("record rejected: duration_ms must be a finite non-negative number, got {0}")]
    InvalidDuration(f64),
}

impl ValidationError {
    /// Name of the record field that violated validation
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingQueryId => "query_id",
            ValidationError::InvalidDuration(_) => "duration_ms",
        }
    }
}

/// Errors surfaced to callers of `ingest`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Ingestion queue overflow; the record was dropped and counted
    #[error("ingestion queue full (capacity {capacity}), record dropped")]
    CapacityExceeded { capacity: usize },

    /// Tracking state for a new query_id cannot be allocated
    #[error("cannot track new query: {limit} distinct queries already tracked in this window")]
    ResourceExhausted { limit: usize },
}

impl IngestError {
    /// Whether processing of subsequent records may continue
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, IngestError::ResourceExhausted { .. })
    }
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
