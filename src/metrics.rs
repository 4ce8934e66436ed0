use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track active exchanges and targets
/// - Track request throughput and retries
/// - Track bar flow through normalize / validate / emit / store
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // High-level
    pub exchanges_active: AtomicUsize,
    pub exchanges_failed: AtomicUsize,
    pub targets_active: AtomicUsize,
    pub targets_failed: AtomicUsize,

    // Requests
    pub requests_sent: AtomicUsize,
    pub retries: AtomicUsize,

    // Bar flow
    pub bars_fetched: AtomicUsize,
    pub bars_emitted: AtomicUsize,
    pub bars_rejected: AtomicUsize,
    pub bars_stored: AtomicUsize,

    // Failures
    pub normalize_errors: AtomicUsize,
    pub fetch_errors: AtomicUsize,
    pub sink_errors: AtomicUsize,
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
