//! Request executor trait and per-worker context
//!
//! The core is transport-agnostic: it only needs an executor that turns an
//! [`Iteration`] into an [`ExecutionResult`]. Implementations live outside
//! core (see the `arrival-bench-http` crate).

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

use crate::request::{Iteration, TagSet};
use crate::response::{ExecutionResult, FailureReason};

// ============================================================================
// Request Executor Trait
// ============================================================================

/// Executes one iteration against the system under test
///
/// Shared across all workers of a run via `Arc`. Any state that must not be
/// shared between workers belongs in the [`WorkerContext`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Executor identifier (e.g., "http")
    fn name(&self) -> &str;

    /// Static tags for every metric emitted by iterations of `exec`
    ///
    /// Merged into the stream's tag set once, before the clock starts, so
    /// that dropped arrivals carry them too.
    fn stream_tags(&self, _exec: Option<&str>) -> TagSet {
        TagSet::new()
    }

    /// Validate that this executor can serve `exec`
    fn validate(&self, _exec: Option<&str>) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Execute a single iteration
    ///
    /// Returning `Err` records the iteration as a request failure.
    async fn execute(
        &self,
        ctx: &mut WorkerContext,
        iteration: &Iteration,
    ) -> Result<ExecutionResult, ExecutorError>;
}

/// Executor-side errors
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Request timed out
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection failure
    #[error("connection error: {0}")]
    Connection(String),

    /// The executor does not know how to run this stream's `exec`
    #[error("unknown exec target: {0}")]
    UnknownExec(String),

    /// The executor has no per-worker resource to bind (e.g., an empty device list)
    #[error("worker resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ExecutorError {
    /// Map to the failure reason recorded in metrics
    pub fn to_failure_reason(&self) -> FailureReason {
        match self {
            ExecutorError::Timeout(_) => FailureReason::Timeout,
            ExecutorError::Connection(_) => FailureReason::Connection,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

// ============================================================================
// Worker Context
// ============================================================================

/// State owned by exactly one virtual worker
///
/// Passed mutably into every `execute` call so that executors never need
/// module-level shared state (e.g. a device bound per worker).
#[derive(Debug)]
pub struct WorkerContext {
    /// Worker identifier, unique within its pool
    pub worker_id: usize,

    /// Worker index unique across every pool of the run
    pub run_slot: usize,

    /// Stream the worker belongs to
    pub stream: Arc<str>,

    /// Iterations this worker has run so far
    pub iterations_run: u64,

    /// Random source seeded from the run seed and run slot
    pub rng: StdRng,
}

impl WorkerContext {
    /// Context for a worker of a single-pool run, where the run slot is
    /// the worker id
    pub fn new(worker_id: usize, stream: Arc<str>, seed: u64) -> Self {
        Self::with_run_slot(worker_id, worker_id, stream, seed)
    }

    /// Context for `worker_id` of `stream`, occupying `run_slot`
    pub fn with_run_slot(worker_id: usize, run_slot: usize, stream: Arc<str>, seed: u64) -> Self {
        Self {
            worker_id,
            run_slot,
            stream,
            iterations_run: 0,
            rng: worker_rng(seed, run_slot),
        }
    }
}

/// ChaCha key built from the run seed and the slot
fn worker_rng(seed: u64, run_slot: usize) -> StdRng {
    let mut key = <StdRng as SeedableRng>::Seed::default();
    key[..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&(run_slot as u64).to_le_bytes());
    StdRng::from_seed(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_executor_error_to_failure_reason() {
        assert_eq!(
            ExecutorError::Timeout(Duration::from_secs(1)).to_failure_reason(),
            FailureReason::Timeout
        );
        assert_eq!(
            ExecutorError::Connection("refused".into()).to_failure_reason(),
            FailureReason::Connection
        );
        assert!(matches!(
            ExecutorError::UnknownExec("nope".into()).to_failure_reason(),
            FailureReason::Other(msg) if msg.contains("nope")
        ));
    }

    #[test]
    fn test_worker_context_rng_is_reproducible() {
        let mut a = WorkerContext::new(3, "read".into(), 42);
        let mut b = WorkerContext::new(3, "read".into(), 42);
        let mut c = WorkerContext::new(4, "read".into(), 42);
        let mut d = WorkerContext::new(3, "read".into(), 43);

        let xa: u64 = a.rng.gen();
        let xb: u64 = b.rng.gen();
        let xc: u64 = c.rng.gen();
        let xd: u64 = d.rng.gen();
        assert_eq!(xa, xb);
        assert_ne!(xa, xc);
        assert_ne!(xa, xd);
    }

    #[test]
    fn test_run_slot_separates_pools() {
        let mut read = WorkerContext::with_run_slot(0, 0, "read".into(), 42);
        let mut write = WorkerContext::with_run_slot(0, 50, "write".into(), 42);
        assert_eq!(read.worker_id, write.worker_id);
        assert_eq!(write.run_slot, 50);

        let a: u64 = read.rng.gen();
        let b: u64 = write.rng.gen();
        assert_ne!(a, b);
    }
}
