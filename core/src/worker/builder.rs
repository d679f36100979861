//! Builder pattern for WorkerPool construction

use crate::config::PoolSizing;
use crate::error::{BenchError, BenchResult};
use crate::metrics::MetricSink;
use crate::traits::RequestExecutor;

use super::pool::WorkerPool;

use std::sync::Arc;
use std::time::Duration;

/// Builder for creating WorkerPool instances
///
/// Provides ergonomic construction with validation.
///
/// # Example
/// ```ignore
/// let pool = PoolBuilder::new("hp_write_telemetry")
///     .executor(executor)
///     .sink(sink)
///     .sizing(PoolSizing::new(50, 200))
///     .request_timeout(Some(Duration::from_secs(30)))
///     .seed(42)
///     .build()?;
/// ```
pub struct PoolBuilder {
    stream: Arc<str>,
    executor: Option<Arc<dyn RequestExecutor>>,
    sink: Option<Arc<MetricSink>>,
    sizing: Option<PoolSizing>,
    request_timeout: Option<Duration>,
    seed: u64,
    shard_offset: usize,
}

impl PoolBuilder {
    /// Create a new builder for the named stream
    pub fn new(stream: impl Into<Arc<str>>) -> Self {
        Self {
            stream: stream.into(),
            executor: None,
            sink: None,
            sizing: None,
            request_timeout: None,
            seed: 0,
            shard_offset: 0,
        }
    }

    /// Set the request executor
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the metric sink
    pub fn sink(mut self, sink: Arc<MetricSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the pool bounds
    pub fn sizing(mut self, sizing: PoolSizing) -> Self {
        self.sizing = Some(sizing);
        self
    }

    /// Set the per-request deadline
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the seed for worker random sources
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Offset added to worker ids when choosing a metric shard
    pub fn shard_offset(mut self, offset: usize) -> Self {
        self.shard_offset = offset;
        self
    }

    /// Build the pool and spawn its pre-allocated workers
    ///
    /// # Errors
    /// Returns an error if any required field is missing or the bounds are invalid.
    pub fn build(self) -> BenchResult<WorkerPool> {
        let executor = self
            .executor
            .ok_or(BenchError::missing_config("executor"))?;
        let sink = self.sink.ok_or(BenchError::missing_config("sink"))?;
        let sizing = self.sizing.ok_or(BenchError::missing_config("sizing"))?;
        sizing.validate()?;

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BenchError::config("request_timeout must be positive"));
        }

        Ok(WorkerPool::start(
            self.stream,
            executor,
            sink,
            sizing,
            self.request_timeout,
            self.seed,
            self.shard_offset,
        ))
    }
}

impl std::fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("stream", &self.stream)
            .field("executor", &self.executor.as_ref().map(|e| e.name().to_string()))
            .field("sizing", &self.sizing)
            .field("request_timeout", &self.request_timeout)
            .field("seed", &self.seed)
            .finish()
    }
}
