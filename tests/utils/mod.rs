// Shared workload builders for integration tests

#![allow(dead_code)]

use queryscope::record::ExecutionRecord;

/// `count` executions of `query_id` with the same duration, 1ms apart
pub fn constant(query_id: &str, count: usize, start_ms: u64, duration_ms: f64) -> Vec<ExecutionRecord> {
    (0..count)
        .map(|i| ExecutionRecord::new(query_id, start_ms + i as u64, duration_ms))
        .collect()
}

/// `count` executions alternating between `mean - spread` and `mean + spread`
pub fn alternating(
    query_id: &str,
    count: usize,
    start_ms: u64,
    mean: f64,
    spread: f64,
) -> Vec<ExecutionRecord> {
    (0..count)
        .map(|i| {
            let d = if i % 2 == 0 { mean - spread } else { mean + spread };
            ExecutionRecord::new(query_id, start_ms + i as u64, d)
        })
        .collect()
}

/// Serialize records as JSON Lines
pub fn jsonl(records: &[ExecutionRecord]) -> String {
    records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect()
}
