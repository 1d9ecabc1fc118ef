#![no_main]

use libfuzzer_sys::fuzz_target;
use queryscope::config::{AnalyzerConfig, WindowSize};
use queryscope::engine::Analyzer;
use queryscope::record::ExecutionRecord;

fuzz_target!(|records: Vec<ExecutionRecord>| {
    let config = AnalyzerConfig {
        window: WindowSize::Records(8),
        min_samples: 2,
        ..AnalyzerConfig::default()
    };
    let Ok(analyzer) = Analyzer::new(config) else {
        return;
    };

    // Structured records (NaN durations, empty ids, huge timestamps) must
    // be rejected or analyzed, never panic
    for record in &records {
        let _ = analyzer.ingest(record);
    }
    let report = analyzer.close_window();
    assert!(report.ranking.entries.len() <= report.snapshot.len());
});
