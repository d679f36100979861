//! Open-loop arrival clock
//!
//! On every tick the clock asks the compiled schedule how many arrivals
//! should exist by now (`floor(expected_arrivals(elapsed))`), issues the
//! difference and hands each one to the pool. Dispatch never waits, so a
//! slow system under test cannot slow the arrival rate down.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::request::{Iteration, TagSet};
use crate::schedule::CompiledSchedule;
use crate::worker::SubmitOutcome;

// Absorbs float error in the integral at whole-number boundaries
const ARRIVAL_EPSILON: f64 = 1e-6;

/// Whole arrivals due for an expected (fractional) count
pub fn arrivals_due(expected: f64) -> u64 {
    (expected + ARRIVAL_EPSILON).floor().max(0.0) as u64
}

/// Counters reported by one clock run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockStats {
    /// Iterations created
    pub issued: u64,
    /// Iterations a worker accepted
    pub dispatched: u64,
    /// Iterations dropped on pool saturation
    pub dropped: u64,
    /// Whole arrivals the full schedule asks for
    pub expected_total: u64,
    /// True if the clock was stopped before the schedule ended
    pub stopped_early: bool,
}

/// Drives one stream's arrivals
#[derive(Debug, Clone)]
pub struct ArrivalClock {
    stream: Arc<str>,
    exec: Option<Arc<str>>,
    tags: Arc<TagSet>,
    schedule: Arc<CompiledSchedule>,
    tick: Duration,
}

impl ArrivalClock {
    /// Create a clock for `stream`
    ///
    /// A zero `tick` is raised to one millisecond.
    pub fn new(
        stream: Arc<str>,
        exec: Option<Arc<str>>,
        tags: Arc<TagSet>,
        schedule: Arc<CompiledSchedule>,
        tick: Duration,
    ) -> Self {
        Self {
            stream,
            exec,
            tags,
            schedule,
            tick: tick.max(Duration::from_millis(1)),
        }
    }

    /// Stream name
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Compiled schedule
    pub fn schedule(&self) -> &CompiledSchedule {
        &self.schedule
    }

    /// Issue arrivals from `started` until the schedule ends or `stop` fires
    ///
    /// `dispatch` must not block. A final tick is always taken at exactly
    /// the total duration, so a full run issues
    /// `arrivals_due(schedule.total_expected())` iterations.
    pub async fn run<F>(&self, started: Instant, stop: CancellationToken, mut dispatch: F) -> ClockStats
    where
        F: FnMut(Iteration) -> SubmitOutcome,
    {
        let total = self.schedule.total_duration();
        let deadline = started + total;
        let mut stats = ClockStats {
            expected_total: arrivals_due(self.schedule.total_expected()),
            ..Default::default()
        };
        let mut stage = 0;
        let mut next = started;

        debug!(
            stream = %self.stream,
            expected = stats.expected_total,
            total_secs = total.as_secs_f64(),
            "Arrival clock started"
        );

        while next < deadline {
            next = (next + self.tick).min(deadline);

            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    stats.stopped_early = true;
                    break;
                }
                _ = tokio::time::sleep_until(next) => {}
            }

            let elapsed = next.saturating_duration_since(started);
            let current = self.schedule.stage_index(elapsed);
            if current != stage && next < deadline {
                debug!(
                    stream = %self.stream,
                    stage = current,
                    rate = self.schedule.rate(elapsed),
                    "Stage transition"
                );
                stage = current;
            }

            let due = arrivals_due(self.schedule.expected_arrivals(elapsed))
                .min(stats.expected_total)
                .saturating_sub(stats.issued);
            for _ in 0..due {
                let mut iteration = Iteration::new(
                    stats.issued,
                    Arc::clone(&self.stream),
                    self.exec.clone(),
                    Arc::clone(&self.tags),
                    next,
                );
                iteration.dispatched_at = Instant::now();
                stats.issued += 1;

                match dispatch(iteration) {
                    SubmitOutcome::Accepted => stats.dispatched += 1,
                    SubmitOutcome::Dropped(_) => stats.dropped += 1,
                }
            }
        }

        debug!(
            stream = %self.stream,
            issued = stats.issued,
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            stopped_early = stats.stopped_early,
            "Arrival clock stopped"
        );
        stats
    }
}
