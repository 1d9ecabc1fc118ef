//! Deterministic ranking of a window snapshot's queries

use crate::efficiency::EfficiencyReport;
use crate::stats::{QueryStats, WindowSnapshot};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Metric a ranking orders by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    TotalDuration,
    MeanDuration,
    SampleCount,
    ErrorCount,
}

impl RankMetric {
    pub fn name(&self) -> &'static str {
        match self {
            RankMetric::TotalDuration => "total_duration",
            RankMetric::MeanDuration => "mean_duration",
            RankMetric::SampleCount => "sample_count",
            RankMetric::ErrorCount => "error_count",
        }
    }

    fn value(&self, stats: &QueryStats) -> f64 {
        match self {
            RankMetric::TotalDuration => stats.total_duration_ms,
            RankMetric::MeanDuration => stats.mean_duration_ms().unwrap_or(0.0),
            RankMetric::SampleCount => stats.sample_count as f64,
            RankMetric::ErrorCount => stats.error_count as f64,
        }
    }
}

/// Ranking direction; ties always break by ascending query_id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    #[value(alias = "desc")]
    #[serde(alias = "desc")]
    Descending,
    #[value(alias = "asc")]
    #[serde(alias = "asc")]
    Ascending,
}

/// One position of a ranking
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub query_id: String,
    /// Value of the ranked metric; `None` only for undefined efficiency scores
    pub metric_value: Option<f64>,
    /// 1-based position
    pub rank: usize,
    pub tie_break_key: String,
}

/// Ordered ranking plus the metric that produced it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedReport {
    pub metric: String,
    pub order: SortOrder,
    pub entries: Vec<RankedEntry>,
}

/// Rank a snapshot's queries by `metric`
///
/// `top_k == 0` means all queries. Pure function of the snapshot.
///
/// # Example
/// ```
/// use queryscope::aggregator::Aggregator;
/// use queryscope::ranker::{rank, RankMetric, SortOrder};
/// use queryscope::record::ExecutionRecord;
///
/// let aggregator = Aggregator::new(4, 100);
/// aggregator.ingest(&ExecutionRecord::new("fast", 0, 1.0)).unwrap();
/// aggregator.ingest(&ExecutionRecord::new("slow", 0, 50.0)).unwrap();
/// let snapshot = aggregator.close_window();
///
/// let report = rank(&snapshot, RankMetric::TotalDuration, SortOrder::Descending, 0);
/// assert_eq!(report.entries[0].query_id, "slow");
/// ```
pub fn rank(
    snapshot: &WindowSnapshot,
    metric: RankMetric,
    order: SortOrder,
    top_k: usize,
) -> RankedReport {
    let values = snapshot
        .iter()
        .map(|stats| (stats.query_id.as_str(), Some(metric.value(stats))))
        .collect();

    RankedReport {
        metric: metric.name().to_string(),
        order,
        entries: order_entries(values, order, top_k),
    }
}

/// Rank queries by efficiency score
///
/// Undefined scores sort after every defined score in either direction.
pub fn rank_scores(report: &EfficiencyReport, order: SortOrder, top_k: usize) -> RankedReport {
    let values = report
        .scores
        .iter()
        .map(|(id, score)| (id.as_str(), *score))
        .collect();

    RankedReport {
        metric: report.formula.clone(),
        order,
        entries: order_entries(values, order, top_k),
    }
}

fn compare_values(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Descending => b.total_cmp(&a),
            SortOrder::Ascending => a.total_cmp(&b),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn order_entries(
    mut values: Vec<(&str, Option<f64>)>,
    order: SortOrder,
    top_k: usize,
) -> Vec<RankedEntry> {
    values.sort_by(|(id_a, a), (id_b, b)| {
        compare_values(*a, *b, order).then_with(|| id_a.cmp(id_b))
    });

    let limit = if top_k == 0 { values.len() } else { top_k };
    values
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (id, value))| RankedEntry {
            query_id: id.to_string(),
            metric_value: value,
            rank: i + 1,
            tie_break_key: id.to_string(),
        })
        .collect()
}
