//! Worker execution loop

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::request::Iteration;
use crate::response::{ExecutionResult, FailureReason};
use crate::traits::{ExecutorError, WorkerContext};

use super::pool::PoolShared;

/// One virtual worker: wait for a job -> execute -> record -> go idle
///
/// A worker is a long-lived tokio task that owns its [`WorkerContext`].
/// Jobs arrive through a one-slot mailbox; the worker only sits in the
/// pool's idle list while its mailbox is empty.
pub(crate) struct Worker {
    ctx: WorkerContext,
    shard: usize,
    inbox: mpsc::Receiver<Iteration>,
    mailbox: mpsc::Sender<Iteration>,
    shared: Arc<PoolShared>,
    soft_stop: CancellationToken,
    hard_stop: CancellationToken,
}

impl Worker {
    pub(crate) fn new(
        ctx: WorkerContext,
        shard: usize,
        inbox: mpsc::Receiver<Iteration>,
        mailbox: mpsc::Sender<Iteration>,
        shared: Arc<PoolShared>,
    ) -> Self {
        let soft_stop = shared.soft_stop.clone();
        let hard_stop = shared.hard_stop.clone();
        Self {
            ctx,
            shard,
            inbox,
            mailbox,
            shared,
            soft_stop,
            hard_stop,
        }
    }

    /// Run until the pool drains
    pub(crate) async fn run(mut self) {
        tracing::trace!(
            worker_id = self.ctx.worker_id,
            stream = %self.ctx.stream,
            "Worker started"
        );

        loop {
            let iteration = tokio::select! {
                biased;

                // A queued job always wins over the stop signal
                job = self.inbox.recv() => match job {
                    Some(iteration) => iteration,
                    None => break,
                },
                _ = self.soft_stop.cancelled() => break,
            };

            self.serve(iteration).await;
            self.shared.counters.release();

            if self.hard_stop.is_cancelled() {
                break;
            }
            self.shared.release(self.ctx.worker_id, self.mailbox.clone());
        }

        tracing::trace!(
            worker_id = self.ctx.worker_id,
            stream = %self.ctx.stream,
            iterations = self.ctx.iterations_run,
            "Worker finished"
        );
    }

    /// Execute one iteration and record its outcome
    async fn serve(&mut self, mut iteration: Iteration) {
        let start = Instant::now();
        iteration.started_at = Some(start);

        let worker_id = self.ctx.worker_id;
        let executor = Arc::clone(&self.shared.executor);
        let request_timeout = self.shared.request_timeout;
        let ctx = &mut self.ctx;
        let job = &iteration;
        let call = async move {
            let fut = AssertUnwindSafe(executor.execute(ctx, job)).catch_unwind();
            let outcome = match request_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(outcome) => outcome,
                    Err(_) => Ok(Err(ExecutorError::Timeout(limit))),
                },
                None => fut.await,
            };
            outcome.unwrap_or_else(|_| Err(ExecutorError::Other("executor panicked".into())))
        };

        let result = tokio::select! {
            biased;

            outcome = call => match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::debug!(
                        worker_id,
                        stream = %self.shared.stream,
                        sequence = iteration.sequence,
                        error = %e,
                        "Request failed"
                    );
                    ExecutionResult::failure(e.to_failure_reason(), start.elapsed(), None)
                }
            },
            _ = self.hard_stop.cancelled() => {
                self.shared
                    .counters
                    .interrupted
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                ExecutionResult::failure(FailureReason::Timeout, start.elapsed(), None)
            }
        };

        iteration.ended_at = Some(Instant::now());
        self.ctx.iterations_run += 1;
        self.shared.counters.record(result.is_success());
        self.shared
            .sink
            .record_result(self.shard, &iteration.tags, &result);
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("worker_id", &self.ctx.worker_id)
            .field("stream", &self.ctx.stream)
            .field("shard", &self.shard)
            .field("iterations_run", &self.ctx.iterations_run)
            .finish()
    }
}
