//! Rendering of anomalies, window reports, and run summaries
//!
//! Three formats share one writer:
//! - text: human-readable blocks
//! - json: one JSON object per line, tagged by `"type"`
//! - csv: one header, then uniform rows tagged by `kind`

use crate::anomaly::{AnomalyEvent, AnomalySeverity, AnomalySummary};
use crate::cli::OutputFormat;
use crate::efficiency::UndefinedScore;
use crate::engine::WindowReport;
use crate::ranker::RankedEntry;
use crate::regression::RegressionEvent;
use crate::stats::SnapshotTotals;
use serde::Serialize;
use std::io::{self, Write};

const CSV_HEADER: &str = "kind,window,timestamp_ms,rank,query_id,metric,value,score,detail";

/// Counters printed at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub lines_read: u64,
    pub parse_errors: u64,
    pub rejected: u64,
    pub exhausted: u64,
    pub windows: u64,
    pub cold_start_skipped: u64,
    /// Regression comparisons skipped by the noise filter
    pub noisy_skipped: u64,
}

#[derive(Serialize)]
struct JsonAnomaly<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    event: &'a AnomalyEvent,
}

#[derive(Serialize)]
struct JsonRankedEntry<'a> {
    rank: usize,
    query_id: &'a str,
    value: Option<f64>,
}

#[derive(Serialize)]
struct JsonWindow<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    window_index: u64,
    rejected: u64,
    totals: &'a SnapshotTotals,
    ranking_metric: &'a str,
    ranking: Vec<JsonRankedEntry<'a>>,
    score_formula: &'a str,
    efficiency: Vec<JsonRankedEntry<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rows_not_tracked: Vec<&'a str>,
    regressions: &'a [RegressionEvent],
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    evicted: &'a [String],
}

fn json_entries(entries: &[RankedEntry]) -> Vec<JsonRankedEntry<'_>> {
    entries
        .iter()
        .map(|e| JsonRankedEntry {
            rank: e.rank,
            query_id: &e.query_id,
            value: e.metric_value,
        })
        .collect()
}

/// Escape CSV field (handle commas, quotes, newlines)
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn severity_label(severity: AnomalySeverity) -> &'static str {
    match severity {
        AnomalySeverity::Medium => "medium",
        AnomalySeverity::High => "high",
    }
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Streams rendered output to a writer
#[derive(Debug)]
pub struct ReportWriter<W: Write> {
    out: W,
    format: OutputFormat,
    header_written: bool,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            header_written: false,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn csv_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{CSV_HEADER}")?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Write one anomaly as soon as it is detected
    pub fn anomaly(&mut self, event: &AnomalyEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(
                self.out,
                "ANOMALY [{}] {} at {}: {:.2}ms vs baseline {:.2}±{:.2}ms (score {:+.2})",
                severity_label(event.severity),
                event.query_id,
                event.timestamp_ms,
                event.observed_value,
                event.baseline_mean,
                event.baseline_stddev,
                event.deviation_score,
            ),
            OutputFormat::Json => {
                let line = JsonAnomaly {
                    kind: "anomaly",
                    event,
                };
                serde_json::to_writer(&mut self.out, &line)?;
                writeln!(self.out)
            }
            OutputFormat::Csv => {
                self.csv_header()?;
                writeln!(
                    self.out,
                    "anomaly,,{},,{},{},{},{},{}",
                    event.timestamp_ms,
                    escape_field(&event.query_id),
                    event.metric,
                    event.observed_value,
                    event.deviation_score,
                    severity_label(event.severity),
                )
            }
        }
    }

    /// Write the report of a closed window
    pub fn window(&mut self, report: &WindowReport) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.window_text(report),
            OutputFormat::Json => self.window_json(report),
            OutputFormat::Csv => self.window_csv(report),
        }
    }

    fn window_text(&mut self, report: &WindowReport) -> io::Result<()> {
        let totals = &report.totals;
        writeln!(
            self.out,
            "=== window {}: {} queries, {} executions, {} errors, {:.2}ms total ===",
            report.window_index(),
            totals.distinct_queries,
            totals.total_executions,
            totals.total_errors,
            totals.total_duration_ms,
        )?;

        writeln!(self.out, "Top queries by {}:", report.ranking.metric)?;
        for entry in &report.ranking.entries {
            writeln!(
                self.out,
                "  {:>3}. {:<32} {:>14.2}",
                entry.rank,
                entry.query_id,
                entry.metric_value.unwrap_or(0.0)
            )?;
        }

        writeln!(self.out, "Efficiency ({}):", report.efficiency.formula)?;
        for entry in &report.efficiency_ranking.entries {
            match entry.metric_value {
                Some(score) => writeln!(
                    self.out,
                    "  {:>3}. {:<32} {:>14.4}",
                    entry.rank, entry.query_id, score
                )?,
                None => {
                    let reason = match report.efficiency.undefined.get(&entry.query_id) {
                        Some(UndefinedScore::RowsNotTracked) => "rows not tracked",
                        _ => "zero duration",
                    };
                    writeln!(
                        self.out,
                        "  {:>3}. {:<32} {:>14}",
                        entry.rank,
                        entry.query_id,
                        format!("n/a ({reason})")
                    )?
                }
            }
        }

        if !report.regressions.is_empty() {
            writeln!(self.out, "Regressions:")?;
            for event in &report.regressions {
                writeln!(
                    self.out,
                    "  {}: mean {:.2}ms -> {:.2}ms ({:+.1}%, confidence {:.1}%, n={}/{})",
                    event.query_id,
                    event.prior_value,
                    event.current_value,
                    event.relative_change * 100.0,
                    event.confidence * 100.0,
                    event.sample_sizes.prior,
                    event.sample_sizes.current,
                )?;
            }
        }

        if !report.evicted.is_empty() {
            writeln!(self.out, "Evicted: {}", report.evicted.join(", "))?;
        }
        writeln!(self.out)
    }

    fn window_json(&mut self, report: &WindowReport) -> io::Result<()> {
        let line = JsonWindow {
            kind: "window",
            window_index: report.window_index(),
            rejected: report.snapshot.rejected,
            totals: &report.totals,
            ranking_metric: &report.ranking.metric,
            ranking: json_entries(&report.ranking.entries),
            score_formula: &report.efficiency.formula,
            efficiency: json_entries(&report.efficiency_ranking.entries),
            rows_not_tracked: report.efficiency.rows_not_tracked().collect(),
            regressions: &report.regressions,
            evicted: &report.evicted,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        writeln!(self.out)
    }

    fn window_csv(&mut self, report: &WindowReport) -> io::Result<()> {
        self.csv_header()?;
        let window = report.window_index();

        for entry in &report.ranking.entries {
            let score = report
                .efficiency
                .scores
                .get(&entry.query_id)
                .copied()
                .flatten();
            writeln!(
                self.out,
                "ranking,{},,{},{},{},{},{},{}",
                window,
                entry.rank,
                escape_field(&entry.query_id),
                report.ranking.metric,
                optional(entry.metric_value),
                optional(score),
                report.efficiency.formula,
            )?;
        }

        for event in &report.regressions {
            writeln!(
                self.out,
                "regression,{},,,{},{},{},{},{}",
                window,
                escape_field(&event.query_id),
                event.metric,
                event.relative_change,
                event.confidence,
                event.prior_window,
            )?;
        }

        for query_id in &report.evicted {
            writeln!(self.out, "evicted,{},,,{},,,,", window, escape_field(query_id))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// End-of-run summary: anomaly counts, most deviant events, counters
pub fn render_summary(summary: &AnomalySummary, counters: &RunCounters) -> String {
    let mut out = String::new();
    out.push_str("=== Anomaly Summary ===\n");
    out.push_str(&format!(
        "Total anomalies: {} (high: {}, medium: {}, suppressed repeats: {})\n",
        summary.total(),
        summary.high,
        summary.medium,
        summary.suppressed
    ));

    if !summary.top.is_empty() {
        out.push_str("Most deviant executions:\n");
        for event in &summary.top {
            out.push_str(&format!(
                "  [{}] {} at {}: {:.2}ms (score {:+.2})\n",
                severity_label(event.severity),
                event.query_id,
                event.timestamp_ms,
                event.observed_value,
                event.deviation_score
            ));
        }
    }

    out.push_str(&format!(
        "Lines read: {}, unparseable: {}, rejected: {}, over query limit: {}, \
         cold-start skips: {}, noisy regression skips: {}, windows: {}\n",
        counters.lines_read,
        counters.parse_errors,
        counters.rejected,
        counters.exhausted,
        counters.cold_start_skipped,
        counters.noisy_skipped,
        counters.windows
    ));
    out
}
