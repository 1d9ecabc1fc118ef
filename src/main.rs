use anyhow::{Context, Result};
use clap::Parser;
use queryscope::cli::Cli;
use queryscope::engine::Analyzer;
use queryscope::record::ExecutionRecord;
use queryscope::report::{render_summary, ReportWriter, RunCounters};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
///
/// `--debug` forces TRACE; otherwise logging is only enabled when
/// `RUST_LOG` is set, so stdout and stderr stay clean by default.
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Feed every JSON line through the analyzer, writing output as it appears
fn replay<R: BufRead, W: Write>(
    analyzer: &Analyzer,
    input: R,
    writer: &mut ReportWriter<W>,
) -> Result<RunCounters> {
    let mut counters = RunCounters::default();

    for (index, line) in input.lines().enumerate() {
        let line = line.context("failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        counters.lines_read += 1;

        let record: ExecutionRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                counters.parse_errors += 1;
                tracing::warn!(line = index + 1, error = %e, "skipping unparseable line");
                continue;
            }
        };

        match analyzer.ingest(&record) {
            Ok(outcome) => {
                if let Some(anomaly) = outcome.anomaly {
                    writer.anomaly(&anomaly).context("failed to write anomaly")?;
                }
                if let Some(report) = outcome.closed {
                    writer.window(&report).context("failed to write window report")?;
                }
            }
            // Counted by the analyzer; the stream continues
            Err(e) => tracing::debug!(line = index + 1, error = %e, "record not ingested"),
        }
    }

    if analyzer.pending_records() > 0 {
        let report = analyzer.close_window();
        writer.window(&report).context("failed to write window report")?;
    }
    writer.flush().context("failed to flush output")?;

    counters.rejected = analyzer.rejected_total();
    counters.exhausted = analyzer.exhausted_total();
    counters.windows = analyzer.windows_closed();
    counters.cold_start_skipped = analyzer.skipped_cold_start();
    counters.noisy_skipped = analyzer.regression_noisy_skipped();
    Ok(counters)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = args
        .analyzer_config()
        .context("invalid configuration")?;
    let analyzer = Analyzer::new(config).context("failed to build analyzer")?;

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Box::new(io::stdin().lock()),
    };

    let mut writer = ReportWriter::new(BufWriter::new(io::stdout().lock()), args.format);
    let counters = replay(&analyzer, input, &mut writer)?;

    eprint!("{}", render_summary(&analyzer.anomaly_summary(), &counters));
    Ok(())
}
