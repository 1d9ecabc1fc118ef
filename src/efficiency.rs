//! Per-query efficiency scores derived from a window snapshot
//!
//! Scores are pure functions of a `QueryStats`. A score is undefined
//! (`None`) rather than infinite when the query spent no measurable time,
//! and undefined when rows were never tracked for the query, which is
//! distinct from a query that tracked rows and returned none (score 0).

use crate::stats::{QueryStats, WindowSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scoring formula
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreFormula {
    /// Rows returned per millisecond of total duration
    #[default]
    Throughput,
    /// Rows returned per execution
    RowsPerCall,
    /// Throughput scaled by `1 - error_weight * error_rate`, floored at 0
    ErrorPenalized { error_weight: f64 },
}

impl ScoreFormula {
    pub fn name(&self) -> &'static str {
        match self {
            ScoreFormula::Throughput => "throughput",
            ScoreFormula::RowsPerCall => "rows_per_call",
            ScoreFormula::ErrorPenalized { .. } => "error_penalized",
        }
    }
}

/// Why a score could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedScore {
    ZeroDuration,
    RowsNotTracked,
}

/// Scores for every query of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficiencyReport {
    pub formula: String,
    pub scores: BTreeMap<String, Option<f64>>,
    /// Reason for each `None` in `scores`
    pub undefined: BTreeMap<String, UndefinedScore>,
}

impl EfficiencyReport {
    /// Queries whose rows were never tracked in the window
    pub fn rows_not_tracked(&self) -> impl Iterator<Item = &str> {
        self.undefined
            .iter()
            .filter(|(_, reason)| **reason == UndefinedScore::RowsNotTracked)
            .map(|(id, _)| id.as_str())
    }
}

/// Computes efficiency scores with a fixed formula
#[derive(Debug, Clone, Copy, Default)]
pub struct EfficiencyScorer {
    formula: ScoreFormula,
}

impl EfficiencyScorer {
    pub fn new(formula: ScoreFormula) -> Self {
        Self { formula }
    }

    pub fn formula(&self) -> ScoreFormula {
        self.formula
    }

    /// Score a query, explaining undefined results
    pub fn evaluate(&self, stats: &QueryStats) -> Result<f64, UndefinedScore> {
        if stats.total_duration_ms <= 0.0 {
            return Err(UndefinedScore::ZeroDuration);
        }
        let rows = stats.total_rows.ok_or(UndefinedScore::RowsNotTracked)? as f64;
        let throughput = rows / stats.total_duration_ms;

        Ok(match self.formula {
            ScoreFormula::Throughput => throughput,
            ScoreFormula::RowsPerCall => rows / stats.sample_count.max(1) as f64,
            ScoreFormula::ErrorPenalized { error_weight } => {
                throughput * (1.0 - error_weight * stats.error_rate()).max(0.0)
            }
        })
    }

    /// Score a query; `None` when the score is undefined
    pub fn score(&self, stats: &QueryStats) -> Option<f64> {
        self.evaluate(stats).ok()
    }

    /// Score every query in a snapshot
    pub fn score_snapshot(&self, snapshot: &WindowSnapshot) -> EfficiencyReport {
        let mut scores = BTreeMap::new();
        let mut undefined = BTreeMap::new();

        for stats in snapshot.iter() {
            match self.evaluate(stats) {
                Ok(score) => {
                    scores.insert(stats.query_id.clone(), Some(score));
                }
                Err(reason) => {
                    scores.insert(stats.query_id.clone(), None);
                    undefined.insert(stats.query_id.clone(), reason);
                }
            }
        }

        EfficiencyReport {
            formula: self.formula.name().to_string(),
            scores,
            undefined,
        }
    }
}
