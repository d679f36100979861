//! arrival-bench-core: Open-loop arrival-rate load generation
//!
//! This crate provides the engine shared by every arrival-bench component,
//! including:
//!
//! - Rate schedules and their closed-form arrival integral
//! - The arrival clock and bounded worker pools
//! - Tagged metric aggregation and threshold evaluation
//! - Run orchestration, abort handling and the end-of-run summary
//!
//! Transports plug in through the [`RequestExecutor`] trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod abort;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod schedule;
pub mod summary;
pub mod threshold;
pub mod traits;
pub mod worker;

pub use abort::{AbortCause, AbortController, RunPhase, Termination};
pub use clock::{arrivals_due, ArrivalClock, ClockStats};
pub use config::{
    DropPolicy, ExecutorKind, PoolSizing, RandomStages, RunConfig, StreamConfig, ThresholdConfig,
};
pub use error::{BenchError, BenchResult};
pub use metrics::{
    LatencyHistogram, LatencyPercentiles, MetricSink, WindowSnapshot, WindowSummary,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use request::{Iteration, TagSet};
pub use response::{ExecutionResult, FailureReason, Outcome};
pub use schedule::{CompiledSchedule, Schedule, Stage};
pub use summary::{
    GroupSummary, RunStatus, RunSummary, StreamSummary, EXIT_THRESHOLDS_FAILED,
};
pub use threshold::{ThresholdEngine, ThresholdReport, ThresholdSpec, Verdict};
pub use traits::{ExecutorError, RequestExecutor, WorkerContext};
pub use worker::{PoolBuilder, PoolStats, SubmitOutcome, WorkerPool};
