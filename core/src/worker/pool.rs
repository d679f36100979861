//! Elastic pool of virtual workers

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PoolSizing;
use crate::metrics::MetricSink;
use crate::request::Iteration;
use crate::traits::{RequestExecutor, WorkerContext};

use super::executor::Worker;
use super::stats::{PoolCounters, PoolStats};

/// Result of handing an iteration to the pool
#[derive(Debug)]
pub enum SubmitOutcome {
    /// A worker took the iteration
    Accepted,
    /// Every worker was busy and the ceiling was reached
    Dropped(Iteration),
}

impl SubmitOutcome {
    /// True if a worker took the iteration
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

type Mailbox = mpsc::Sender<Iteration>;

/// State shared between the pool handle and its workers
pub(crate) struct PoolShared {
    pub stream: Arc<str>,
    pub executor: Arc<dyn RequestExecutor>,
    pub sink: Arc<MetricSink>,
    pub request_timeout: Option<Duration>,
    pub counters: PoolCounters,
    pub soft_stop: CancellationToken,
    pub hard_stop: CancellationToken,
    idle: Mutex<Vec<(usize, Mailbox)>>,
}

impl PoolShared {
    /// Return a worker's mailbox to the idle list
    pub fn release(&self, worker_id: usize, mailbox: Mailbox) {
        if !self.soft_stop.is_cancelled() {
            self.idle.lock().push((worker_id, mailbox));
        }
    }
}

/// Bounded, elastic set of workers for one stream
///
/// `submit` never waits: it hands the iteration to an idle worker, spawns a
/// new one while below `max_workers`, or returns it as dropped.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    sizing: PoolSizing,
    seed: u64,
    shard_offset: usize,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Spawn the pre-allocated workers
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn start(
        stream: Arc<str>,
        executor: Arc<dyn RequestExecutor>,
        sink: Arc<MetricSink>,
        sizing: PoolSizing,
        request_timeout: Option<Duration>,
        seed: u64,
        shard_offset: usize,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            stream,
            executor,
            sink,
            request_timeout,
            counters: PoolCounters::default(),
            soft_stop: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
            idle: Mutex::new(Vec::with_capacity(sizing.max_workers)),
        });
        let pool = Self {
            shared,
            sizing,
            seed,
            shard_offset,
            tracker: TaskTracker::new(),
        };

        for _ in 0..sizing.pre_allocated {
            if let Some((worker_id, mailbox)) = pool.spawn_worker() {
                pool.shared.idle.lock().push((worker_id, mailbox));
            }
        }
        pool.shared
            .counters
            .preallocated
            .store(sizing.pre_allocated, std::sync::atomic::Ordering::SeqCst);

        tracing::debug!(
            stream = %pool.shared.stream,
            pre_allocated = sizing.pre_allocated,
            max_workers = sizing.max_workers,
            "Worker pool started"
        );
        pool
    }

    fn spawn_worker(&self) -> Option<(usize, Mailbox)> {
        let worker_id = self.shared.counters.try_reserve(self.sizing.max_workers)?;
        let (mailbox, inbox) = mpsc::channel(1);
        let run_slot = self.shard_offset + worker_id;
        let ctx = WorkerContext::with_run_slot(
            worker_id,
            run_slot,
            Arc::clone(&self.shared.stream),
            self.seed,
        );
        let worker = Worker::new(
            ctx,
            run_slot,
            inbox,
            mailbox.clone(),
            Arc::clone(&self.shared),
        );
        self.tracker.spawn(worker.run());
        Some((worker_id, mailbox))
    }

    /// Hand `iteration` to a worker without waiting
    pub fn submit(&self, iteration: Iteration) -> SubmitOutcome {
        if self.shared.soft_stop.is_cancelled() {
            return SubmitOutcome::Dropped(iteration);
        }

        let idle = self.shared.idle.lock().pop();
        let (worker_id, mailbox) = match idle.or_else(|| self.spawn_worker()) {
            Some(worker) => worker,
            None => return SubmitOutcome::Dropped(iteration),
        };

        self.shared.counters.acquire();
        match mailbox.try_send(iteration) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(TrySendError::Full(iteration)) | Err(TrySendError::Closed(iteration)) => {
                tracing::debug!(
                    stream = %self.shared.stream,
                    worker_id,
                    "Worker mailbox unavailable"
                );
                self.shared.counters.release();
                SubmitOutcome::Dropped(iteration)
            }
        }
    }

    /// Stream this pool serves
    pub fn stream(&self) -> &str {
        &self.shared.stream
    }

    /// Pool bounds
    pub fn sizing(&self) -> PoolSizing {
        self.sizing
    }

    /// Busy workers right now
    pub fn busy(&self) -> usize {
        self.shared
            .counters
            .busy
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Busy over spawned workers (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        self.stats().utilization()
    }

    /// Current statistics
    pub fn stats(&self) -> PoolStats {
        self.shared.counters.snapshot()
    }

    /// Stop accepting work and wait for in-flight iterations
    ///
    /// Iterations still running after `grace` are interrupted and recorded
    /// as timeouts. Returns once every worker task has exited.
    pub async fn drain(&self, grace: Duration) -> PoolStats {
        self.shared.soft_stop.cancel();
        self.shared.idle.lock().clear();
        self.tracker.close();

        let in_flight = self.busy();
        if in_flight > 0 {
            tracing::info!(
                stream = %self.shared.stream,
                in_flight,
                grace_secs = grace.as_secs_f64(),
                "Draining in-flight iterations"
            );
        }

        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                stream = %self.shared.stream,
                in_flight = self.busy(),
                "Grace period elapsed, interrupting in-flight iterations"
            );
            self.shared.hard_stop.cancel();
            self.tracker.wait().await;
        }

        let stats = self.stats();
        tracing::debug!(
            stream = %self.shared.stream,
            completed = stats.completed,
            failed = stats.failed,
            interrupted = stats.interrupted,
            "Worker pool drained"
        );
        stats
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stream", &self.shared.stream)
            .field("executor", &self.shared.executor.name())
            .field("sizing", &self.sizing)
            .field("stats", &self.stats())
            .finish()
    }
}
