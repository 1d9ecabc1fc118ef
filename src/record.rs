//! Execution records supplied by the instrumentation layer

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

/// One observed run of a query
///
/// `query_id` is assumed to be already normalized by the producer. Records
/// are immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "fuzz", derive(arbitrary::Arbitrary))]
pub struct ExecutionRecord {
    /// Stable, externally assigned query identifier
    #[serde(default)]
    pub query_id: String,
    /// Observation time in milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp_ms: u64,
    /// Wall-clock duration of the execution in milliseconds
    pub duration_ms: f64,
    /// Rows returned, when the producer tracks it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<u64>,
    /// Whether the execution failed
    #[serde(default)]
    pub error: bool,
}

impl ExecutionRecord {
    pub fn new(query_id: impl Into<String>, timestamp_ms: u64, duration_ms: f64) -> Self {
        Self {
            query_id: query_id.into(),
            timestamp_ms,
            duration_ms,
            rows_returned: None,
            error: false,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows_returned = Some(rows);
        self
    }

    pub fn with_error(mut self, error: bool) -> Self {
        self.error = error;
        self
    }

    /// Check the record against the ingestion contract
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.query_id.trim().is_empty() {
            return Err(ValidationError::MissingQueryId);
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Err(ValidationError::InvalidDuration(self.duration_ms));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record() {
        let record = ExecutionRecord::new("Q1", 1000, 12.5).with_rows(10);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_zero_duration_is_valid() {
        assert!(ExecutionRecord::new("Q1", 0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let err = ExecutionRecord::new("Q1", 0, -1.0).validate().unwrap_err();
        assert_eq!(err, ValidationError::InvalidDuration(-1.0));
        assert_eq!(err.field(), "duration_ms");
    }

    #[test]
    fn test_non_finite_duration_rejected() {
        assert!(ExecutionRecord::new("Q1", 0, f64::NAN).validate().is_err());
        assert!(ExecutionRecord::new("Q1", 0, f64::INFINITY)
            .validate()
            .is_err());
    }

    #[test]
    fn test_missing_query_id_rejected() {
        let err = ExecutionRecord::new("  ", 0, 1.0).validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingQueryId);
    }

    #[test]
    fn test_deserialize_defaults() {
        let record: ExecutionRecord = serde_json::from_str(r#"{"duration_ms": 3.0}"#).unwrap();
        assert_eq!(record.query_id, "");
        assert_eq!(record.rows_returned, None);
        assert!(!record.error);
        assert_eq!(
            record.validate().unwrap_err(),
            ValidationError::MissingQueryId
        );
    }

    #[test]
    fn test_deserialize_full_record() {
        let json = r#"{"query_id":"Q7","timestamp_ms":42,"duration_ms":1.5,"rows_returned":3,"error":true}"#;
        let record: ExecutionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.query_id, "Q7");
        assert_eq!(record.timestamp_ms, 42);
        assert_eq!(record.rows_returned, Some(3));
        assert!(record.error);
    }
}
