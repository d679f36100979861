//! End-of-run summary
//!
//! Everything a renderer needs is in [`RunSummary`]; renderers never touch
//! the live metric sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::abort::AbortCause;
use crate::clock::ClockStats;
use crate::metrics::WindowSummary;
use crate::request::TagSet;
use crate::threshold::{ThresholdReport, Verdict};
use crate::worker::PoolStats;

/// Process exit code when thresholds fail or abort the run
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every schedule ran to its end
    Completed,
    /// The run was cut short
    Aborted,
}

/// Per-stream results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSummary {
    /// Stream name
    pub name: String,
    /// Executor entry point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    /// Tags every metric of the stream carries
    pub tags: TagSet,
    /// Arrival clock counters
    pub clock: ClockStats,
    /// Worker pool counters
    pub pool: PoolStats,
    /// Merged metrics of the stream
    pub metrics: WindowSummary,
}

/// Metrics of one distinct tag set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Tag set
    pub tags: TagSet,
    /// Metrics recorded under exactly this tag set
    pub metrics: WindowSummary,
}

/// Structured result of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run name
    pub name: String,
    /// Completed or aborted
    pub status: RunStatus,
    /// Why the run was aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortCause>,
    /// Seed used for workers and random stages
    pub seed: u64,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub ended_at: DateTime<Utc>,
    /// Run duration in seconds
    pub duration_secs: f64,
    /// Metrics across every stream
    pub totals: WindowSummary,
    /// Per-stream results
    pub streams: Vec<StreamSummary>,
    /// Per-tag-set results
    pub groups: Vec<GroupSummary>,
    /// Threshold verdicts
    pub thresholds: Vec<ThresholdReport>,
}

impl RunSummary {
    /// True if the run was aborted by a threshold
    pub fn aborted_by_threshold(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortCause::is_threshold)
    }

    /// True if every threshold passed
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.verdict == Verdict::Pass)
    }

    /// Process exit code
    ///
    /// Non-zero when an abort-eligible threshold ended in `Fail` or a
    /// threshold aborted the run. Thresholds without `abort_on_fail` only
    /// affect the report.
    pub fn exit_code(&self) -> i32 {
        let failed = self.thresholds.iter().any(ThresholdReport::is_abort_failure);
        if failed || self.aborted_by_threshold() {
            EXIT_THRESHOLDS_FAILED
        } else {
            0
        }
    }

    /// Pool counters summed over every stream
    pub fn pool_totals(&self) -> PoolStats {
        self.streams.iter().fold(PoolStats::default(), |mut acc, s| {
            acc.merge(&s.pool);
            acc
        })
    }

    /// Clock counters summed over every stream
    pub fn clock_totals(&self) -> ClockStats {
        self.streams.iter().fold(ClockStats::default(), |mut acc, s| {
            acc.issued += s.clock.issued;
            acc.dispatched += s.clock.dispatched;
            acc.dropped += s.clock.dropped;
            acc.expected_total += s.clock.expected_total;
            acc.stopped_early |= s.clock.stopped_early;
            acc
        })
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a JSON summary
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
