//! Orchestrator execution logic

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::abort::{AbortCause, AbortController, Termination};
use crate::clock::{ArrivalClock, ClockStats};
use crate::config::{RunConfig, StreamConfig};
use crate::error::{BenchError, BenchResult};
use crate::metrics::MetricSink;
use crate::schedule::CompiledSchedule;
use crate::request::TagSet;
use crate::summary::RunSummary;
use crate::threshold::ThresholdEngine;
use crate::traits::RequestExecutor;
use crate::worker::{PoolBuilder, PoolStats, SubmitOutcome, WorkerPool};

use super::aggregator::{aggregate_run, StreamOutcome};

/// Everything needed to start one stream, fixed at build time
#[derive(Debug, Clone)]
pub(crate) struct StreamPlan {
    pub config: StreamConfig,
    pub schedule: Arc<CompiledSchedule>,
    pub tags: Arc<TagSet>,
    pub grace: Duration,
    pub shard_offset: usize,
}

/// Orchestrator manages the run lifecycle
///
/// Starts one arrival clock and worker pool per stream, the threshold
/// engine and the sink they share, then drains everything and produces
/// the [`RunSummary`].
pub struct Orchestrator {
    config: RunConfig,
    seed: u64,
    executor: Arc<dyn RequestExecutor>,
    plans: Vec<StreamPlan>,
    engine: ThresholdEngine,
    controller: Arc<AbortController>,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` to construct one from configuration.
    pub(crate) fn new(
        config: RunConfig,
        seed: u64,
        executor: Arc<dyn RequestExecutor>,
        plans: Vec<StreamPlan>,
        engine: ThresholdEngine,
    ) -> Self {
        Self {
            config,
            seed,
            executor,
            plans,
            engine,
            controller: Arc::new(AbortController::new()),
        }
    }

    /// Get the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Seed in effect for this run
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Controller that can abort the run from outside
    pub fn controller(&self) -> Arc<AbortController> {
        Arc::clone(&self.controller)
    }

    /// Run every stream to completion or abort
    ///
    /// Must be called from within a tokio runtime. An aggregation fault
    /// aborts the run and is returned once every pool has drained.
    pub async fn run(mut self) -> BenchResult<RunSummary> {
        let started_at = Utc::now();
        let started = Instant::now();
        let sink = Arc::new(MetricSink::new(
            self.config.resolved_metric_shards(),
            self.config.drop_policy,
        ));

        tracing::info!(
            run = %self.config.name,
            streams = self.plans.len(),
            thresholds = self.engine.len(),
            seed = self.seed,
            executor = self.executor.name(),
            "Starting run"
        );

        let mut pools = Vec::with_capacity(self.plans.len());
        for plan in &self.plans {
            let pool = PoolBuilder::new(plan.config.name.as_str())
                .executor(Arc::clone(&self.executor))
                .sink(Arc::clone(&sink))
                .sizing(plan.config.pool_sizing())
                .request_timeout(plan.config.request_timeout)
                .seed(self.seed)
                .shard_offset(plan.shard_offset)
                .build()?;
            pools.push(Arc::new(pool));
        }

        let done = CancellationToken::new();
        let mut engine = std::mem::replace(&mut self.engine, ThresholdEngine::new(Vec::new()));
        let engine_task = {
            let interval = self.config.evaluation_interval;
            let sink = Arc::clone(&sink);
            let controller = Arc::clone(&self.controller);
            let done = done.clone();
            tokio::spawn(async move {
                let result = engine.run(interval, started, sink, controller, done).await;
                (engine, result)
            })
        };

        let running_clocks = Arc::new(AtomicUsize::new(self.plans.len()));
        let handles: Vec<JoinHandle<(ClockStats, PoolStats)>> = self
            .plans
            .iter()
            .zip(&pools)
            .map(|(plan, pool)| {
                self.spawn_stream(
                    plan,
                    Arc::clone(pool),
                    Arc::clone(&sink),
                    Arc::clone(&running_clocks),
                    started,
                )
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        let mut failure = None;
        for (plan, handle) in self.plans.iter().zip(handles) {
            match handle.await {
                Ok((clock, pool)) => outcomes.push(StreamOutcome {
                    plan: plan.clone(),
                    clock,
                    pool,
                }),
                Err(e) => {
                    tracing::error!(stream = %plan.config.name, error = %e, "Stream task panicked");
                    self.controller.abort(AbortCause::Fault {
                        message: format!("stream '{}' panicked", plan.config.name),
                    });
                    failure.get_or_insert(BenchError::orchestration(format!(
                        "stream '{}' task failed: {e}",
                        plan.config.name
                    )));
                }
            }
        }

        self.controller.complete();
        done.cancel();
        let (mut engine, evaluation) = engine_task
            .await
            .map_err(|e| BenchError::orchestration(format!("threshold task failed: {e}")))?;
        evaluation?;
        if let Some(err) = failure {
            return Err(err);
        }

        let elapsed = started.elapsed();
        let thresholds = match engine.final_verdicts(elapsed, &sink) {
            Ok(reports) => reports,
            Err(e) => {
                self.controller.stop();
                return Err(e);
            }
        };
        let termination = self.controller.stop().unwrap_or(Termination::Completed);

        let summary = aggregate_run(
            &self.config,
            self.seed,
            started_at,
            Utc::now(),
            elapsed,
            termination,
            outcomes,
            &sink,
            thresholds,
        )?;

        tracing::info!(
            run = %summary.name,
            status = ?summary.status,
            elapsed_secs = summary.duration_secs,
            requests = summary.totals.count,
            errors = summary.totals.errors,
            dropped = summary.totals.dropped,
            "Run finished"
        );

        Ok(summary)
    }

    fn spawn_stream(
        &self,
        plan: &StreamPlan,
        pool: Arc<WorkerPool>,
        sink: Arc<MetricSink>,
        running_clocks: Arc<AtomicUsize>,
        started: Instant,
    ) -> JoinHandle<(ClockStats, PoolStats)> {
        let clock = ArrivalClock::new(
            plan.config.name.as_str().into(),
            plan.config.exec.as_deref().map(Into::into),
            Arc::clone(&plan.tags),
            Arc::clone(&plan.schedule),
            self.config.tick,
        );
        let controller = Arc::clone(&self.controller);
        let stop = controller.token();
        let grace = plan.grace;
        let drop_shard = plan.shard_offset;

        tokio::spawn(async move {
            let clock_stats = clock
                .run(started, stop, |iteration| match pool.submit(iteration) {
                    SubmitOutcome::Accepted => SubmitOutcome::Accepted,
                    SubmitOutcome::Dropped(iteration) => {
                        sink.record_drop(drop_shard, &iteration.tags);
                        SubmitOutcome::Dropped(iteration)
                    }
                })
                .await;

            // The last schedule to run out completes the run; thresholds
            // still evaluate during the drain but can no longer abort it
            if running_clocks.fetch_sub(1, Ordering::AcqRel) == 1
                && !clock_stats.stopped_early
                && controller.complete()
            {
                tracing::info!(grace_secs = grace.as_secs_f64(), "All schedules finished, draining");
            }

            if clock_stats.dropped > 0 {
                tracing::warn!(
                    stream = clock.stream(),
                    dropped = clock_stats.dropped,
                    max_workers = pool.sizing().max_workers,
                    "Iterations dropped: worker pool saturated"
                );
            }

            let pool_stats = pool.drain(grace).await;
            (clock_stats, pool_stats)
        })
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C aborts the run; in-flight iterations still get the grace period.
    pub async fn run_with_signal_handling(self) -> BenchResult<RunSummary> {
        let controller = Arc::clone(&self.controller);

        // Spawn signal handler task
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, stopping arrivals and draining...");
                    controller.abort(AbortCause::Interrupted);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;
        signal_handle.abort();
        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("run", &self.config.name)
            .field("seed", &self.seed)
            .field("executor", &self.executor.name())
            .field("streams", &self.plans.len())
            .field("thresholds", &self.engine.len())
            .finish()
    }
}
