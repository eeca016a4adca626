//! Disjoint index-space partitioning and shared progress counters.
//!
//! Every parallel stage of the pipeline follows the same scheme: the
//! index space is divided up front into contiguous disjoint ranges, one
//! blocking worker thread is spawned per range, and the only shared
//! mutable state is a pair of atomic counters that an orchestrating layer
//! may poll while the stage runs.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Split `0..len` into at most `workers` contiguous ranges.
///
/// The returned ranges are disjoint and cover `0..len` exactly once; when
/// `len < workers`, fewer (single-element) ranges are returned rather
/// than empty ones.
pub fn partition_ranges(len: usize, workers: usize) -> Vec<Range<usize>> {
    if len == 0 || workers == 0 {
        return Vec::new();
    }
    let workers = workers.min(len);
    let base = len / workers;
    let remainder = len % workers;
    let mut ranges = Vec::with_capacity(workers);
    let mut start = 0;
    for index in 0..workers {
        let size = base + usize::from(index < remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// Shared progress state of one parallel stage.
///
/// The counters are advisory: they exist so that a caller may poll how
/// far along a stage is without blocking on its workers. Stage completion
/// itself is enforced by joining the workers, not by these counters.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicUsize,
    total: AtomicUsize,
    workers_remaining: AtomicUsize,
}

impl Progress {
    /// Create idle progress state.
    pub fn new() -> Self {
        Progress::default()
    }

    /// Reset the counters for a stage of `total` work units spread over
    /// `workers` workers.
    pub fn begin(&self, total: usize, workers: usize) {
        self.completed.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
        self.workers_remaining.store(workers, Ordering::Relaxed);
    }

    /// Record one completed work unit.
    pub fn unit_done(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one worker having finished its partition.
    pub fn worker_done(&self) {
        self.workers_remaining.fetch_sub(1, Ordering::Relaxed);
    }

    /// Completed work units so far.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Total work units of the current stage.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Workers that have not yet finished their partition.
    pub fn workers_remaining(&self) -> usize {
        self.workers_remaining.load(Ordering::Relaxed)
    }

    /// Completed fraction of the current stage, in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            self.completed() as f32 / total as f32
        }
    }

    /// Whether no workers are outstanding.
    pub fn is_idle(&self) -> bool {
        self.workers_remaining() == 0
    }
}
