//! Worker pool statistics tracking

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Statistics of one stream's worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers spawned over the run, including pre-allocated ones
    pub spawned: usize,

    /// Workers spawned before the clock started
    pub preallocated: usize,

    /// Highest number of simultaneously busy workers
    pub peak_busy: usize,

    /// Workers busy when the snapshot was taken
    pub busy: usize,

    /// Iterations that completed successfully
    pub completed: u64,

    /// Iterations that failed (including interrupted ones)
    pub failed: u64,

    /// Iterations force-terminated after the grace period
    pub interrupted: u64,
}

impl PoolStats {
    /// Get total number of served iterations (completed + failed)
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }

    /// Get success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.completed as f64 / self.total() as f64
        }
    }

    /// Get error rate (0.0 - 1.0)
    pub fn error_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.failed as f64 / self.total() as f64
        }
    }

    /// Fraction of spawned workers that are busy
    pub fn utilization(&self) -> f64 {
        if self.spawned == 0 {
            0.0
        } else {
            self.busy as f64 / self.spawned as f64
        }
    }

    /// Merge stats from another pool
    pub fn merge(&mut self, other: &PoolStats) {
        self.spawned += other.spawned;
        self.preallocated += other.preallocated;
        self.peak_busy += other.peak_busy;
        self.busy += other.busy;
        self.completed += other.completed;
        self.failed += other.failed;
        self.interrupted += other.interrupted;
    }
}

/// Live counters shared by the pool and its workers
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub spawned: AtomicUsize,
    pub preallocated: AtomicUsize,
    pub busy: AtomicUsize,
    pub peak_busy: AtomicUsize,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub interrupted: AtomicU64,
}

impl PoolCounters {
    /// Mark one more worker busy and track the peak
    pub fn acquire(&self) {
        let now = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_busy.fetch_max(now, Ordering::SeqCst);
    }

    /// Mark one worker idle again
    pub fn release(&self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }

    /// Reserve a worker slot below `max`, returning its index
    pub fn try_reserve(&self, max: usize) -> Option<usize> {
        self.spawned
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .ok()
    }

    pub fn record(&self, success: bool) {
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            spawned: self.spawned.load(Ordering::SeqCst),
            preallocated: self.preallocated.load(Ordering::SeqCst),
            peak_busy: self.peak_busy.load(Ordering::SeqCst),
            busy: self.busy.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
        }
    }
}
