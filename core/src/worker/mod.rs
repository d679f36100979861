//! Worker pool for executing iterations
//!
//! The pool is the only place where the load generator waits on the
//! system under test. Each stream owns one [`WorkerPool`]; its workers are
//! long-lived tokio tasks that loop: **wait for a job -> execute -> record ->
//! go idle**.
//!
//! The arrival clock never waits on the pool. [`WorkerPool::submit`] either
//! hands the iteration to a worker (reusing an idle one, or spawning one up
//! to `max_workers`) or returns it as [`SubmitOutcome::Dropped`]. Latency
//! therefore never slows down the arrival rate; it only shows up as more
//! busy workers and, at the ceiling, as dropped iterations.
//!
//! # Example
//!
//! ```ignore
//! use arrival_bench_core::worker::{PoolBuilder, SubmitOutcome};
//!
//! let pool = PoolBuilder::new("hp_read")
//!     .executor(executor)
//!     .sink(sink)
//!     .sizing(PoolSizing::new(10, 50))
//!     .build()?;
//!
//! if let SubmitOutcome::Dropped(iteration) = pool.submit(iteration) {
//!     sink.record_drop(0, &iteration.tags);
//! }
//! let stats = pool.drain(Duration::from_secs(30)).await;
//! ```

mod builder;
mod executor;
mod pool;
mod stats;

pub use builder::PoolBuilder;
pub use pool::{SubmitOutcome, WorkerPool};
pub use stats::PoolStats;

#[cfg(test)]
mod tests;
