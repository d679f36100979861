//! Metric aggregation and percentile estimation
//!
//! Workers record every outcome into a [`MetricSink`]. The sink is sharded:
//! each worker writes into its own shard (selected by worker id), so the hot
//! record path never contends on one global lock. Snapshots merge the
//! windows of every shard whose tag set matches a selector.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::DropPolicy;
use crate::error::{BenchError, BenchResult};
use crate::request::TagSet;
use crate::response::{ExecutionResult, FailureReason, Outcome};

/// Significant figures kept by the latency digest
pub const HISTOGRAM_SIGFIG: u8 = 3;

/// Relative error bound of any reported percentile (10^-sigfig)
pub const DIGEST_RELATIVE_ERROR: f64 = 0.001;

/// Highest trackable latency: one hour, in microseconds
const HISTOGRAM_MAX_MICROS: u64 = 3_600_000_000;

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

/// Bounded-memory latency digest
/// Uses HdrHistogram for memory-efficient storage of unbounded streams
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: hdrhistogram::Histogram<u64>,
    // Exact extremes; the histogram only knows their bucket
    min_micros: u64,
    max_micros: u64,
}

impl LatencyHistogram {
    /// Create a new histogram
    /// Configured for microsecond precision with max 1 hour latency
    pub fn new() -> Self {
        let histogram =
            hdrhistogram::Histogram::new_with_bounds(1, HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIG)
                .expect("static histogram bounds are valid");
        Self {
            histogram,
            min_micros: u64::MAX,
            max_micros: 0,
        }
    }

    /// Record a duration
    ///
    /// Values beyond one hour saturate at the highest bucket.
    pub fn record(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .clamp(1, HISTOGRAM_MAX_MICROS);
        self.histogram.saturating_record(micros);
        self.min_micros = self.min_micros.min(micros);
        self.max_micros = self.max_micros.max(micros);
    }

    /// Record a value in milliseconds
    pub fn record_ms(&mut self, ms: f64) {
        self.record(Duration::from_secs_f64(ms.max(0.0) / 1000.0));
    }

    /// Get the number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Check if the histogram is empty
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Value at quantile `q` (0.0..=1.0) in milliseconds, `None` when empty
    pub fn quantile_ms(&self, q: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let raw = self.histogram.value_at_quantile(q.clamp(0.0, 1.0));
        Some(raw.clamp(self.min_micros, self.max_micros) as f64 / 1000.0)
    }

    /// Mean in milliseconds, `None` when empty
    pub fn mean_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.histogram.mean() / 1000.0)
    }

    /// Exact minimum in milliseconds, `None` when empty
    pub fn min_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.min_micros as f64 / 1000.0)
    }

    /// Exact maximum in milliseconds, `None` when empty
    pub fn max_ms(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.max_micros as f64 / 1000.0)
    }

    /// Calculate percentiles from the histogram
    pub fn percentiles(&self) -> LatencyPercentiles {
        if self.histogram.is_empty() {
            return LatencyPercentiles::default();
        }
        let q = |p: f64| self.quantile_ms(p).unwrap_or_default();

        LatencyPercentiles {
            min: self.min_micros as f64 / 1000.0,
            p50: q(0.50),
            p75: q(0.75),
            p90: q(0.90),
            p95: q(0.95),
            p99: q(0.99),
            max: self.max_micros as f64 / 1000.0,
            mean: self.histogram.mean() / 1000.0,
            stddev: self.histogram.stdev() / 1000.0,
        }
    }

    /// Fold another histogram into this one
    pub fn merge(&mut self, other: &LatencyHistogram) -> BenchResult<()> {
        self.histogram
            .add(&other.histogram)
            .map_err(|e| BenchError::aggregation(format!("latency digest merge failed: {e:?}")))?;
        self.min_micros = self.min_micros.min(other.min_micros);
        self.max_micros = self.max_micros.max(other.max_micros);
        Ok(())
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates for one distinct tag set
#[derive(Debug, Clone, Default)]
pub struct MetricWindow {
    /// Requests counted (served, plus drops under `count_as_failure`)
    pub count: u64,
    /// Failed requests
    pub errors: u64,
    /// Arrivals dropped on pool saturation
    pub dropped: u64,
    /// Latency digest of served requests
    pub latency: LatencyHistogram,
    /// Responses per status code
    pub status_codes: BTreeMap<u16, u64>,
    /// Failures per reason
    pub failures: BTreeMap<String, u64>,
}

impl MetricWindow {
    fn record(&mut self, outcome: &Outcome, latency: Duration, status_code: Option<u16>) {
        self.count += 1;
        self.latency.record(latency);
        if let Some(code) = status_code {
            *self.status_codes.entry(code).or_default() += 1;
        }
        if let Outcome::Failure(reason) = outcome {
            self.record_failure(reason);
        }
    }

    fn record_failure(&mut self, reason: &FailureReason) {
        self.errors += 1;
        *self.failures.entry(failure_key(reason)).or_default() += 1;
    }

    fn merge(&mut self, other: &MetricWindow) -> BenchResult<()> {
        self.count += other.count;
        self.errors += other.errors;
        self.dropped += other.dropped;
        self.latency.merge(&other.latency)?;
        for (code, n) in &other.status_codes {
            *self.status_codes.entry(*code).or_default() += n;
        }
        for (reason, n) in &other.failures {
            *self.failures.entry(reason.clone()).or_default() += n;
        }
        Ok(())
    }
}

fn failure_key(reason: &FailureReason) -> String {
    match reason {
        FailureReason::UnexpectedStatus(_) => "unexpected_status".to_string(),
        FailureReason::Timeout => "timeout".to_string(),
        FailureReason::Connection => "connection".to_string(),
        FailureReason::Dropped => "dropped".to_string(),
        FailureReason::Other(_) => "other".to_string(),
    }
}

/// Point-in-time merge of every window matching a selector
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    window: MetricWindow,
}

impl WindowSnapshot {
    /// Number of requests
    pub fn count(&self) -> u64 {
        self.window.count
    }

    /// Number of failed requests
    pub fn errors(&self) -> u64 {
        self.window.errors
    }

    /// Number of dropped arrivals
    pub fn dropped(&self) -> u64 {
        self.window.dropped
    }

    /// Error rate (0.0 - 1.0), `None` when no requests were counted
    pub fn error_rate(&self) -> Option<f64> {
        (self.window.count > 0).then(|| self.window.errors as f64 / self.window.count as f64)
    }

    /// Success rate (0.0 - 1.0), `None` when no requests were counted
    pub fn success_rate(&self) -> Option<f64> {
        self.error_rate().map(|rate| 1.0 - rate)
    }

    /// Latency digest of the merged windows
    pub fn latency(&self) -> &LatencyHistogram {
        &self.window.latency
    }

    /// Serializable summary
    pub fn summary(&self) -> WindowSummary {
        WindowSummary {
            count: self.window.count,
            errors: self.window.errors,
            error_rate: self.error_rate().unwrap_or(0.0),
            dropped: self.window.dropped,
            latency: self.window.latency.percentiles(),
            status_codes: self.window.status_codes.clone(),
            failures: self.window.failures.clone(),
        }
    }
}

/// Aggregated metrics for one tag set, as reported
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WindowSummary {
    /// Number of requests
    pub count: u64,
    /// Number of failed requests
    pub errors: u64,
    /// Error rate (0.0 - 1.0)
    pub error_rate: f64,
    /// Arrivals dropped on pool saturation
    pub dropped: u64,
    /// Latency percentiles
    pub latency: LatencyPercentiles,
    /// Responses per status code
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_codes: BTreeMap<u16, u64>,
    /// Failures per reason
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, u64>,
}

type Windows = HashMap<Arc<TagSet>, MetricWindow>;

/// Thread-safe, sharded aggregator of iteration outcomes
#[derive(Debug)]
pub struct MetricSink {
    shards: Box<[Mutex<Windows>]>,
    drop_policy: DropPolicy,
}

impl MetricSink {
    /// Create a sink with `shards` independent shards (at least one)
    pub fn new(shards: usize, drop_policy: DropPolicy) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            drop_policy,
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Drop policy this sink applies
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    fn with_window<F>(&self, shard: usize, tags: &Arc<TagSet>, f: F)
    where
        F: FnOnce(&mut MetricWindow),
    {
        let mut windows = self.shards[shard % self.shards.len()].lock();
        match windows.get_mut(tags.as_ref()) {
            Some(window) => f(window),
            None => f(windows.entry(Arc::clone(tags)).or_default()),
        }
    }

    /// Record a completed request
    pub fn record(
        &self,
        shard: usize,
        tags: &Arc<TagSet>,
        outcome: &Outcome,
        latency: Duration,
        status_code: Option<u16>,
    ) {
        self.with_window(shard, tags, |w| w.record(outcome, latency, status_code));
    }

    /// Record an executor result
    pub fn record_result(&self, shard: usize, tags: &Arc<TagSet>, result: &ExecutionResult) {
        self.record(shard, tags, &result.outcome, result.latency, result.status_code);
    }

    /// Record an arrival the pool could not serve
    pub fn record_drop(&self, shard: usize, tags: &Arc<TagSet>) {
        let policy = self.drop_policy;
        self.with_window(shard, tags, |w| {
            w.dropped += 1;
            if policy == DropPolicy::CountAsFailure {
                w.count += 1;
                w.record_failure(&FailureReason::Dropped);
            }
        });
    }

    /// Merge every window whose tags include all of `selector`
    ///
    /// Reflects all records completed before the call.
    pub fn snapshot(&self, selector: &TagSet) -> BenchResult<WindowSnapshot> {
        let mut merged = MetricWindow::default();
        for shard in self.shards.iter() {
            let windows = shard.lock();
            for (tags, window) in windows.iter() {
                if tags.matches(selector) {
                    merged.merge(window)?;
                }
            }
        }
        check_window(&merged, selector)?;
        Ok(WindowSnapshot { window: merged })
    }

    /// Snapshot of every distinct tag set recorded so far, sorted by tags
    pub fn windows(&self) -> BenchResult<Vec<(TagSet, WindowSnapshot)>> {
        let mut merged: BTreeMap<TagSet, MetricWindow> = BTreeMap::new();
        for shard in self.shards.iter() {
            let windows = shard.lock();
            for (tags, window) in windows.iter() {
                let key: &TagSet = tags.borrow();
                match merged.get_mut(key) {
                    Some(existing) => existing.merge(window)?,
                    None => {
                        merged.insert(key.clone(), window.clone());
                    }
                }
            }
        }

        merged
            .into_iter()
            .map(|(tags, window)| {
                check_window(&window, &tags)?;
                Ok((tags, WindowSnapshot { window }))
            })
            .collect()
    }
}

fn check_window(window: &MetricWindow, tags: &TagSet) -> BenchResult<()> {
    if window.errors > window.count {
        return Err(BenchError::aggregation(format!(
            "window {tags} has {} errors for {} requests",
            window.errors, window.count
        )));
    }
    let served = window.latency.len();
    if served > window.count {
        return Err(BenchError::aggregation(format!(
            "window {tags} has {served} latency samples for {} requests",
            window.count
        )));
    }
    Ok(())
}
