//! Builder pattern for Orchestrator construction

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::RunConfig;
use crate::error::{BenchError, BenchResult};
use crate::threshold::ThresholdEngine;
use crate::traits::RequestExecutor;

use super::executor::{Orchestrator, StreamPlan};

/// Builder for creating an Orchestrator from one immutable run configuration
///
/// Every configuration fault (schedule, pool bounds, threshold syntax,
/// unknown exec) surfaces from [`build`](Self::build), before any task runs.
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(RunConfig::load("hp-mixed.toml")?)
///     .executor(executor)
///     .build()?;
///
/// let summary = orchestrator.run_with_signal_handling().await?;
/// std::process::exit(summary.exit_code());
/// ```
pub struct OrchestratorBuilder {
    config: Option<RunConfig>,
    executor: Option<Arc<dyn RequestExecutor>>,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder
    pub fn new() -> Self {
        Self {
            config: None,
            executor: None,
        }
    }

    /// Set the run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the request executor
    pub fn executor(mut self, executor: Arc<dyn RequestExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Validate and compile the run
    ///
    /// # Errors
    ///
    /// Returns an error if config or executor are not set, or if any part
    /// of the configuration is invalid.
    pub fn build(self) -> BenchResult<Orchestrator> {
        let config = self.config.ok_or(BenchError::missing_config("config"))?;
        let executor = self
            .executor
            .ok_or(BenchError::missing_config("executor"))?;

        config.validate()?;
        let engine = ThresholdEngine::from_config(&config.thresholds)?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut plans = Vec::with_capacity(config.streams.len());
        let mut shard_offset = 0;
        for stream in &config.streams {
            executor
                .validate(stream.exec.as_deref())
                .map_err(|e| BenchError::config(format!("stream '{}': {e}", stream.name)))?;

            let schedule = stream
                .schedule(&mut rng)
                .and_then(|s| s.compile())
                .map_err(|e| match e {
                    BenchError::InvalidSchedule(msg) => {
                        BenchError::invalid_schedule(format!("stream '{}': {msg}", stream.name))
                    }
                    other => other,
                })?;

            let tags = config
                .tags
                .merged(&stream.tags)
                .merged(&executor.stream_tags(stream.exec.as_deref()))
                .with("scenario", stream.name.as_str());

            plans.push(StreamPlan {
                grace: config.graceful_stop_for(stream),
                config: stream.clone(),
                schedule: Arc::new(schedule),
                tags: Arc::new(tags),
                shard_offset,
            });
            shard_offset += stream.pool_sizing().max_workers;
        }

        Ok(Orchestrator::new(config, seed, executor, plans, engine))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
