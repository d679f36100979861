//! Integration tests for the WorkerPool module

use super::*;
use crate::config::{DropPolicy, PoolSizing};
use crate::metrics::MetricSink;
use crate::request::{Iteration, TagSet};
use crate::response::ExecutionResult;
use crate::traits::{ExecutorError, RequestExecutor, WorkerContext};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Mock RequestExecutor
// ============================================================================

#[derive(Default)]
struct MockExecutor {
    delay: Option<Duration>,
    fail_every: Option<usize>,
    error: Option<fn() -> ExecutorError>,
    panic: bool,
    counter: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    workers_seen: Mutex<HashSet<usize>>,
    slots_seen: Mutex<HashSet<usize>>,
}

impl MockExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    fn with_error(mut self, error: fn() -> ExecutorError) -> Self {
        self.error = Some(error);
        self
    }

    fn with_panic(mut self) -> Self {
        self.panic = true;
        self
    }

    fn call_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute(
        &self,
        ctx: &mut WorkerContext,
        _iteration: &Iteration,
    ) -> Result<ExecutionResult, ExecutorError> {
        let count = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.workers_seen.lock().insert(ctx.worker_id);
        self.slots_seen.lock().insert(ctx.run_slot);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay.unwrap_or(Duration::from_millis(1));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic {
            panic!("mock executor panic");
        }
        if let Some(error) = self.error {
            return Err(error());
        }
        if let Some(n) = self.fail_every {
            if count % n == 0 {
                return Ok(ExecutionResult::from_status(500, &[200], delay));
            }
        }
        Ok(ExecutionResult::from_status(200, &[200], delay))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn iteration(sequence: u64) -> Iteration {
    Iteration::new(
        sequence,
        "stream".into(),
        None,
        Arc::new(TagSet::new().with("scenario", "stream")),
        Instant::now(),
    )
}

fn sink() -> Arc<MetricSink> {
    Arc::new(MetricSink::new(4, DropPolicy::Separate))
}

fn build_pool(
    executor: Arc<MockExecutor>,
    sink: Arc<MetricSink>,
    pre_allocated: usize,
    max_workers: usize,
) -> WorkerPool {
    PoolBuilder::new("stream")
        .executor(executor)
        .sink(sink)
        .sizing(PoolSizing::new(pre_allocated, max_workers))
        .seed(7)
        .build()
        .unwrap()
}

fn failures(sink: &MetricSink, reason: &str) -> u64 {
    sink.snapshot(&TagSet::new())
        .unwrap()
        .summary()
        .failures
        .get(reason)
        .copied()
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_builder_requires_fields() {
    assert!(PoolBuilder::new("s").build().is_err());
    assert!(PoolBuilder::new("s")
        .executor(Arc::new(MockExecutor::new()))
        .sink(sink())
        .build()
        .is_err());
    assert!(PoolBuilder::new("s")
        .executor(Arc::new(MockExecutor::new()))
        .sink(sink())
        .sizing(PoolSizing::new(5, 2))
        .build()
        .is_err());
}

#[tokio::test(start_paused = true)]
async fn test_preallocated_workers_start_idle() {
    let pool = build_pool(Arc::new(MockExecutor::new()), sink(), 3, 5);

    let stats = pool.stats();
    assert_eq!(stats.spawned, 3);
    assert_eq!(stats.preallocated, 3);
    assert_eq!(stats.busy, 0);
    assert_eq!(pool.utilization(), 0.0);

    let stats = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(stats.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_burst_never_exceeds_max_workers() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(100)));
    let sink = sink();
    let pool = build_pool(Arc::clone(&executor), Arc::clone(&sink), 1, 4);

    let outcomes: Vec<_> = (0..10).map(|seq| pool.submit(iteration(seq))).collect();
    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    assert_eq!(accepted, 4);
    assert_eq!(pool.busy(), 4);
    assert_eq!(pool.utilization(), 1.0);

    for outcome in &outcomes[4..] {
        match outcome {
            SubmitOutcome::Dropped(it) => assert!(it.started_at.is_none()),
            SubmitOutcome::Accepted => panic!("accepted beyond max_workers"),
        }
    }

    tokio::time::sleep(Duration::from_millis(250)).await;
    let stats = pool.drain(Duration::from_secs(1)).await;

    assert_eq!(stats.spawned, 4);
    assert_eq!(stats.peak_busy, 4);
    assert_eq!(stats.completed, 4);
    assert!(executor.max_in_flight() <= 4);
    assert_eq!(sink.snapshot(&TagSet::new()).unwrap().count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_idle_workers_are_reused() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(10)));
    let pool = build_pool(Arc::clone(&executor), sink(), 1, 4);

    for seq in 0..5 {
        assert!(pool.submit(iteration(seq)).is_accepted());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(stats.spawned, 1);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.peak_busy, 1);
}

#[tokio::test(start_paused = true)]
async fn test_workers_have_distinct_contexts() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(10)));
    let pool = build_pool(Arc::clone(&executor), sink(), 0, 3);

    for seq in 0..3 {
        assert!(pool.submit(iteration(seq)).is_accepted());
    }
    pool.drain(Duration::from_secs(1)).await;

    let seen = executor.workers_seen.lock().clone();
    assert_eq!(seen, HashSet::from([0, 1, 2]));
}

#[tokio::test(start_paused = true)]
async fn test_run_slots_start_at_shard_offset() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(10)));
    let pool = PoolBuilder::new("write")
        .executor(executor.clone())
        .sink(sink())
        .sizing(PoolSizing::new(0, 2))
        .seed(7)
        .shard_offset(10)
        .build()
        .unwrap();

    for seq in 0..2 {
        assert!(pool.submit(iteration(seq)).is_accepted());
    }
    pool.drain(Duration::from_secs(1)).await;

    assert_eq!(executor.workers_seen.lock().clone(), HashSet::from([0, 1]));
    assert_eq!(executor.slots_seen.lock().clone(), HashSet::from([10, 11]));
}

#[tokio::test(start_paused = true)]
async fn test_failures_are_recorded() {
    let executor = Arc::new(MockExecutor::new().with_fail_every(2));
    let sink = sink();
    let pool = build_pool(Arc::clone(&executor), Arc::clone(&sink), 1, 1);

    for seq in 0..10 {
        assert!(pool.submit(iteration(seq)).is_accepted());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = pool.drain(Duration::from_secs(1)).await;

    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 5);
    let snapshot = sink.snapshot(&TagSet::new()).unwrap();
    assert_eq!(snapshot.count(), 10);
    assert_eq!(snapshot.errors(), 5);
    assert_eq!(snapshot.summary().status_codes.get(&500), Some(&5));
}

#[tokio::test(start_paused = true)]
async fn test_executor_error_becomes_failure() {
    let executor = Arc::new(
        MockExecutor::new().with_error(|| ExecutorError::Connection("refused".into())),
    );
    let sink = sink();
    let pool = build_pool(executor, Arc::clone(&sink), 1, 1);

    assert!(pool.submit(iteration(0)).is_accepted());
    let stats = pool.drain(Duration::from_secs(1)).await;

    assert_eq!(stats.failed, 1);
    assert_eq!(failures(&sink, "connection"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_executor_panic_does_not_kill_worker() {
    let executor = Arc::new(MockExecutor::new().with_panic());
    let sink = sink();
    let pool = build_pool(Arc::clone(&executor), Arc::clone(&sink), 1, 1);

    for seq in 0..2 {
        assert!(pool.submit(iteration(seq)).is_accepted());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stats = pool.drain(Duration::from_secs(1)).await;

    assert_eq!(executor.call_count(), 2);
    assert_eq!(stats.spawned, 1);
    assert_eq!(stats.failed, 2);
    assert_eq!(failures(&sink, "other"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_records_timeout() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_secs(10)));
    let sink = sink();
    let pool = PoolBuilder::new("stream")
        .executor(executor)
        .sink(Arc::clone(&sink))
        .sizing(PoolSizing::new(1, 1))
        .request_timeout(Some(Duration::from_secs(1)))
        .build()
        .unwrap();

    assert!(pool.submit(iteration(0)).is_accepted());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pool.busy(), 0);

    let stats = pool.drain(Duration::from_secs(1)).await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.interrupted, 0);
    assert_eq!(failures(&sink, "timeout"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_in_flight() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_secs(1)));
    let pool = build_pool(executor, sink(), 2, 2);

    assert!(pool.submit(iteration(0)).is_accepted());
    assert!(pool.submit(iteration(1)).is_accepted());

    let started = Instant::now();
    let stats = pool.drain(Duration::from_secs(30)).await;

    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.interrupted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_interrupts_after_grace() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_secs(3600)));
    let sink = sink();
    let pool = build_pool(executor, Arc::clone(&sink), 3, 3);

    for seq in 0..3 {
        assert!(pool.submit(iteration(seq)).is_accepted());
    }

    let started = Instant::now();
    let stats = pool.drain(Duration::from_secs(5)).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    assert_eq!(stats.interrupted, 3);
    assert_eq!(stats.failed, 3);
    assert_eq!(stats.busy, 0);
    assert_eq!(failures(&sink, "timeout"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_submit_after_drain_is_dropped() {
    let pool = build_pool(Arc::new(MockExecutor::new()), sink(), 1, 1);
    pool.drain(Duration::from_secs(1)).await;

    assert!(matches!(
        pool.submit(iteration(0)),
        SubmitOutcome::Dropped(_)
    ));
}
