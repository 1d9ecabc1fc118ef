#![no_main]

use libfuzzer_sys::fuzz_target;
use queryscope::aggregator::Aggregator;
use queryscope::record::ExecutionRecord;

fuzz_target!(|data: &[u8]| {
    // Arbitrary JSON-Lines input must never panic the parser or the aggregator
    if let Ok(input) = std::str::from_utf8(data) {
        let aggregator = Aggregator::new(4, 64);
        for line in input.lines() {
            if let Ok(record) = serde_json::from_str::<ExecutionRecord>(line) {
                let _ = aggregator.ingest(&record);
            }
        }
        let snapshot = aggregator.close_window();
        let _ = snapshot.totals();
    }
});
