//! Orchestrator for run lifecycle management
//!
//! The Orchestrator coordinates a complete load run:
//! - Compiling every stream's schedule and pool bounds up front
//! - Driving one arrival clock and worker pool per stream
//! - Evaluating thresholds on a fixed interval against the shared sink
//! - Draining pools within the graceful-stop window and building the summary
//!
//! # Example
//!
//! ```ignore
//! use arrival_bench_core::{OrchestratorBuilder, RunConfig};
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(RunConfig::load("run.toml")?)
//!     .executor(executor)
//!     .build()?;
//!
//! let summary = orchestrator.run_with_signal_handling().await?;
//! ```

mod aggregator;
mod builder;
mod executor;

pub use builder::OrchestratorBuilder;
pub use executor::Orchestrator;
