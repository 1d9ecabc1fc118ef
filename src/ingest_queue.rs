//! Bounded ingestion queue with a worker thread
//!
//! Producers only enqueue records into a lock-free `ArrayQueue`; a
//! dedicated worker drains it in batches into the `Analyzer` and forwards
//! what the analyzer produces on a channel.
//!
//! ```text
//! producers ── push() ──> ArrayQueue (bounded) ──> worker ──> Analyzer::ingest
//!                 │                                   │
//!                 └─ full: CapacityExceeded, counted   └─> channel: AnalysisEvent
//! ```
//!
//! Producers never block. When the queue is full the record is dropped,
//! counted, and the producer gets `IngestError::CapacityExceeded`.

use crate::anomaly::AnomalyEvent;
use crate::engine::{Analyzer, WindowReport};
use crate::error::IngestError;
use crate::record::ExecutionRecord;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BATCH_SIZE: usize = 256;
const IDLE_SLEEP_MS: u64 = 2;

/// Output of the worker thread
#[derive(Debug, Clone)]
pub enum AnalysisEvent {
    Anomaly(AnomalyEvent),
    WindowClosed(Box<WindowReport>),
    /// The analyzer refused a dequeued record
    Rejected(IngestError),
}

/// Queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub total_pushed: u64,
    pub total_dropped: u64,
    pub total_processed: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl QueueStats {
    /// Calculate drop rate (0.0 to 1.0)
    pub fn drop_rate(&self) -> f64 {
        if self.total_pushed == 0 {
            0.0
        } else {
            self.total_dropped as f64 / self.total_pushed as f64
        }
    }

    /// Calculate queue utilization (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.current_size as f64 / self.capacity as f64
    }
}

/// Lock-free ingestion front for an `Analyzer`
///
/// # Example
///
/// ```
/// use queryscope::config::AnalyzerConfig;
/// use queryscope::engine::Analyzer;
/// use queryscope::ingest_queue::IngestQueue;
/// use queryscope::record::ExecutionRecord;
/// use std::sync::Arc;
///
/// let analyzer = Arc::new(Analyzer::new(AnalyzerConfig::default()).unwrap());
/// let (queue, _events) = IngestQueue::new(Arc::clone(&analyzer));
///
/// queue.push(ExecutionRecord::new("Q1", 0, 3.5)).unwrap();
///
/// // Drains remaining records before returning
/// let stats = queue.shutdown();
/// assert_eq!(stats.total_processed, 1);
/// assert_eq!(analyzer.pending_records(), 1);
/// ```
pub struct IngestQueue {
    queue: Arc<ArrayQueue<ExecutionRecord>>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    total_pushed: AtomicU64,
    total_dropped: AtomicU64,
    total_processed: Arc<AtomicU64>,
}

impl IngestQueue {
    /// Create a queue sized by the analyzer's `ingest.queue_capacity`
    pub fn new(analyzer: Arc<Analyzer>) -> (Self, Receiver<AnalysisEvent>) {
        let capacity = analyzer.config().ingest.queue_capacity;
        Self::with_capacity(analyzer, capacity)
    }

    /// Create a queue holding at most `capacity` records (min 1)
    pub fn with_capacity(
        analyzer: Arc<Analyzer>,
        capacity: usize,
    ) -> (Self, Receiver<AnalysisEvent>) {
        let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
        let shutdown = Arc::new(AtomicBool::new(false));
        let total_processed = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = channel::unbounded();

        let worker = {
            let queue = Arc::clone(&queue);
            let shutdown = Arc::clone(&shutdown);
            let processed = Arc::clone(&total_processed);
            thread::spawn(move || Self::worker(queue, analyzer, sender, shutdown, processed))
        };

        (
            Self {
                queue,
                worker: Some(worker),
                shutdown,
                total_pushed: AtomicU64::new(0),
                total_dropped: AtomicU64::new(0),
                total_processed,
            },
            receiver,
        )
    }

    /// Enqueue a record without blocking
    pub fn push(&self, record: ExecutionRecord) -> Result<(), IngestError> {
        self.total_pushed.fetch_add(1, Ordering::Relaxed);

        if self.queue.push(record).is_err() {
            let dropped = self.total_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                capacity = self.queue.capacity(),
                dropped,
                "ingestion queue full, record dropped"
            );
            return Err(IngestError::CapacityExceeded {
                capacity: self.queue.capacity(),
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_processed: self.total_processed.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    /// Stop the worker after it drains every queued record
    pub fn shutdown(mut self) -> QueueStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("ingestion worker panicked");
            }
        }
    }

    fn worker(
        queue: Arc<ArrayQueue<ExecutionRecord>>,
        analyzer: Arc<Analyzer>,
        events: Sender<AnalysisEvent>,
        shutdown: Arc<AtomicBool>,
        processed: Arc<AtomicU64>,
    ) {
        loop {
            // Read the flag before draining so nothing pushed earlier is missed
            let stopping = shutdown.load(Ordering::SeqCst);

            let mut drained = 0;
            while let Some(record) = queue.pop() {
                Self::process(&analyzer, &events, &record);
                processed.fetch_add(1, Ordering::Relaxed);
                drained += 1;
                if drained >= BATCH_SIZE && !stopping {
                    break;
                }
            }

            if stopping && queue.is_empty() {
                break;
            }
            if drained == 0 {
                thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
            }
        }
        tracing::debug!(processed = processed.load(Ordering::Relaxed), "ingestion worker stopped");
    }

    fn process(analyzer: &Analyzer, events: &Sender<AnalysisEvent>, record: &ExecutionRecord) {
        // A dropped receiver only means nobody listens for events
        match analyzer.ingest(record) {
            Ok(outcome) => {
                if let Some(anomaly) = outcome.anomaly {
                    let _ = events.send(AnalysisEvent::Anomaly(anomaly));
                }
                if let Some(report) = outcome.closed {
                    let _ = events.send(AnalysisEvent::WindowClosed(Box::new(report)));
                }
            }
            Err(e) => {
                let _ = events.send(AnalysisEvent::Rejected(e));
            }
        }
    }
}

impl Drop for IngestQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
