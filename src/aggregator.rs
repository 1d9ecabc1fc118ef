//! Streaming per-query aggregation over windows
//!
//! Accumulators are sharded by an FNV hash of `query_id` so concurrent
//! ingestion for different queries rarely contends, while updates for the
//! same query are serialized by its shard mutex. The whole accumulator set
//! sits behind an `RwLock`: `ingest` holds it shared, `close_window` takes
//! it exclusively and swaps in a fresh set, so every in-flight record lands
//! either in the closing window or in the next one.

use crate::error::IngestError;
use crate::record::ExecutionRecord;
use crate::stats::{QueryStats, WindowSnapshot};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

/// Accumulators for the window currently open
#[derive(Debug)]
struct WindowAccumulator {
    window_index: u64,
    shards: Vec<Mutex<HashMap<String, QueryStats>>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    tracked: AtomicUsize,
}

impl WindowAccumulator {
    fn new(window_index: u64, shard_count: usize) -> Self {
        Self {
            window_index,
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            tracked: AtomicUsize::new(0),
        }
    }

    fn into_snapshot(self) -> WindowSnapshot {
        let mut stats = BTreeMap::new();
        for shard in self.shards {
            let shard = shard.into_inner().unwrap_or_else(PoisonError::into_inner);
            stats.extend(shard);
        }
        WindowSnapshot::new(self.window_index, self.rejected.into_inner(), stats)
    }
}

/// Sharded streaming aggregator
///
/// # Example
///
/// ```
/// use queryscope::aggregator::Aggregator;
/// use queryscope::record::ExecutionRecord;
///
/// let aggregator = Aggregator::new(8, 1_000);
/// aggregator.ingest(&ExecutionRecord::new("Q1", 0, 10.0)).unwrap();
/// aggregator.ingest(&ExecutionRecord::new("Q1", 1, 20.0)).unwrap();
///
/// let snapshot = aggregator.close_window();
/// assert_eq!(snapshot.get("Q1").unwrap().mean_duration_ms(), Some(15.0));
/// assert_eq!(aggregator.pending_records(), 0);
/// ```
#[derive(Debug)]
pub struct Aggregator {
    current: RwLock<WindowAccumulator>,
    shard_count: usize,
    max_tracked_queries: usize,
    rejected_total: AtomicU64,
    exhausted_total: AtomicU64,
}

impl Aggregator {
    /// Create an aggregator
    ///
    /// # Arguments
    /// * `shard_count` - Number of lock domains query_ids are hashed into (min 1)
    /// * `max_tracked_queries` - Distinct queries a single window may track
    pub fn new(shard_count: usize, max_tracked_queries: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            current: RwLock::new(WindowAccumulator::new(0, shard_count)),
            shard_count,
            max_tracked_queries,
            rejected_total: AtomicU64::new(0),
            exhausted_total: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, query_id: &str) -> usize {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(query_id.as_bytes());
        (hasher.finish() % self.shard_count as u64) as usize
    }

    /// Validate a record and merge it into the open window
    ///
    /// Invalid records are counted and never merged. `ResourceExhausted` is
    /// returned when a new query_id would exceed `max_tracked_queries`.
    pub fn ingest(&self, record: &ExecutionRecord) -> Result<(), IngestError> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = record.validate() {
            current.rejected.fetch_add(1, Ordering::Relaxed);
            self.rejected_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(field = e.field(), "rejected execution record: {}", e);
            return Err(e.into());
        }

        let shard_index = self.shard_for(&record.query_id);
        let mut shard = current.shards[shard_index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(stats) = shard.get_mut(&record.query_id) {
            stats.record(record);
        } else {
            let tracked = current.tracked.fetch_add(1, Ordering::Relaxed);
            if tracked >= self.max_tracked_queries {
                current.tracked.fetch_sub(1, Ordering::Relaxed);
                self.exhausted_total.fetch_add(1, Ordering::Relaxed);
                return Err(IngestError::ResourceExhausted {
                    limit: self.max_tracked_queries,
                });
            }
            let mut stats = QueryStats::new(record.query_id.clone());
            stats.record(record);
            shard.insert(record.query_id.clone(), stats);
        }

        current.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the open window and publish its snapshot
    ///
    /// The next window gets the following index.
    pub fn close_window(&self) -> WindowSnapshot {
        self.close_window_advancing(1)
    }

    /// Close the open window; the next window's index is `steps` higher
    ///
    /// Steps greater than one account for idle time windows that saw no
    /// records at all.
    pub fn close_window_advancing(&self, steps: u64) -> WindowSnapshot {
        let closed = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let next_index = current.window_index + steps.max(1);
            std::mem::replace(
                &mut *current,
                WindowAccumulator::new(next_index, self.shard_count),
            )
        };

        let snapshot = closed.into_snapshot();
        tracing::debug!(
            window = snapshot.window_index,
            queries = snapshot.len(),
            rejected = snapshot.rejected,
            "closed aggregation window"
        );
        snapshot
    }

    /// Records accepted into the open window so far
    pub fn pending_records(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .accepted
            .load(Ordering::Relaxed)
    }

    /// Index of the window currently accumulating
    pub fn current_window_index(&self) -> u64 {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .window_index
    }

    /// Records rejected by validation since creation
    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    /// Records refused because the tracked-query limit was reached
    pub fn exhausted_total(&self) -> u64 {
        self.exhausted_total.load(Ordering::Relaxed)
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }
}
