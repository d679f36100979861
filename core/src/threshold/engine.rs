//! Periodic threshold evaluation with delayed abort

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Aggregation, MetricKind, ThresholdSpec};
use crate::abort::{AbortCause, AbortController};
use crate::config::ThresholdConfig;
use crate::error::BenchResult;
use crate::metrics::{MetricSink, WindowSnapshot};
use crate::request::TagSet;

/// Outcome of one threshold evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Expression held, or there was nothing to evaluate yet
    Pass,
    /// Expression did not hold
    Fail,
}

/// Final state of one threshold, as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdReport {
    /// Selector as configured
    pub metric: String,
    /// Expression as configured
    pub threshold: String,
    /// Abort eligibility
    pub abort_on_fail: bool,
    /// Abort delay
    #[serde(with = "humantime_serde")]
    pub delay_abort_eval: Duration,
    /// Final verdict
    pub verdict: Verdict,
    /// Last observed value, `None` when the selector matched no samples
    pub value: Option<f64>,
    /// Whether this threshold aborted the run
    pub triggered_abort: bool,
}

impl ThresholdReport {
    /// True if this threshold failed and could abort the run
    pub fn is_abort_failure(&self) -> bool {
        self.abort_on_fail && self.verdict == Verdict::Fail
    }
}

#[derive(Debug)]
struct Tracked {
    spec: ThresholdSpec,
    breach_since: Option<Duration>,
    value: Option<f64>,
    verdict: Verdict,
    triggered_abort: bool,
}

/// Evaluates every threshold of a run
#[derive(Debug)]
pub struct ThresholdEngine {
    tracked: Vec<Tracked>,
}

impl ThresholdEngine {
    /// Create an engine over normalized specs
    pub fn new(specs: Vec<ThresholdSpec>) -> Self {
        let tracked = specs
            .into_iter()
            .map(|spec| Tracked {
                spec,
                breach_since: None,
                value: None,
                verdict: Verdict::Pass,
                triggered_abort: false,
            })
            .collect();
        Self { tracked }
    }

    /// Parse a threshold table
    pub fn from_config(
        thresholds: &std::collections::BTreeMap<String, Vec<ThresholdConfig>>,
    ) -> BenchResult<Self> {
        Ok(Self::new(ThresholdSpec::from_config(thresholds)?))
    }

    /// Number of thresholds
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// True if there is nothing to evaluate
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Specs in evaluation order
    pub fn specs(&self) -> impl Iterator<Item = &ThresholdSpec> {
        self.tracked.iter().map(|t| &t.spec)
    }

    /// Evaluate every threshold at elapsed run time `now`
    ///
    /// A failing abort-eligible threshold signals `controller` once it has
    /// failed continuously for its delay; a pass in between restarts the
    /// countdown.
    pub fn evaluate(
        &mut self,
        now: Duration,
        sink: &MetricSink,
        controller: &AbortController,
    ) -> BenchResult<Vec<Verdict>> {
        self.refresh(now, sink)?;

        let mut pending = false;
        let mut verdicts = Vec::with_capacity(self.tracked.len());
        for tracked in &mut self.tracked {
            verdicts.push(tracked.verdict);
            match tracked.verdict {
                Verdict::Pass => {
                    if tracked.breach_since.take().is_some() {
                        info!(
                            metric = %tracked.spec.selector_text,
                            threshold = %tracked.spec.expression_text,
                            "threshold recovered"
                        );
                    }
                }
                Verdict::Fail => {
                    let since = *tracked.breach_since.get_or_insert_with(|| {
                        warn!(
                            metric = %tracked.spec.selector_text,
                            threshold = %tracked.spec.expression_text,
                            value = ?tracked.value,
                            elapsed_secs = now.as_secs_f64(),
                            "threshold breached"
                        );
                        now
                    });

                    if !tracked.spec.abort_on_fail || tracked.triggered_abort {
                        continue;
                    }
                    if now.saturating_sub(since) >= tracked.spec.delay_abort_eval {
                        let cause = AbortCause::Threshold {
                            metric: tracked.spec.selector_text.clone(),
                            threshold: tracked.spec.expression_text.clone(),
                            elapsed: now,
                        };
                        tracked.triggered_abort = controller.abort(cause);
                    } else {
                        pending = true;
                    }
                }
            }
        }

        controller.set_countdown_pending(pending);
        Ok(verdicts)
    }

    /// Evaluate on `interval` until `done` or an abort is signalled
    ///
    /// An aggregation fault aborts the run and is returned.
    pub async fn run(
        &mut self,
        interval: Duration,
        started: Instant,
        sink: Arc<MetricSink>,
        controller: Arc<AbortController>,
        done: CancellationToken,
    ) -> BenchResult<()> {
        if self.is_empty() {
            return Ok(());
        }

        let aborted = controller.token();
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = done.cancelled() => break,
                _ = aborted.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    if let Err(e) = self.evaluate(elapsed, &sink, &controller) {
                        controller.abort(AbortCause::Fault { message: e.to_string() });
                        return Err(e);
                    }
                    debug!(elapsed_secs = elapsed.as_secs_f64(), "thresholds evaluated");
                }
            }
        }
        Ok(())
    }

    /// Evaluate once more without signalling and report every threshold
    pub fn final_verdicts(
        &mut self,
        now: Duration,
        sink: &MetricSink,
    ) -> BenchResult<Vec<ThresholdReport>> {
        self.refresh(now, sink)?;
        Ok(self
            .tracked
            .iter()
            .map(|t| ThresholdReport {
                metric: t.spec.selector_text.clone(),
                threshold: t.spec.expression_text.clone(),
                abort_on_fail: t.spec.abort_on_fail,
                delay_abort_eval: t.spec.delay_abort_eval,
                verdict: if t.triggered_abort {
                    Verdict::Fail
                } else {
                    t.verdict
                },
                value: t.value,
                triggered_abort: t.triggered_abort,
            })
            .collect())
    }

    fn refresh(&mut self, now: Duration, sink: &MetricSink) -> BenchResult<()> {
        let mut snapshots: HashMap<TagSet, WindowSnapshot> = HashMap::new();
        for tracked in &mut self.tracked {
            let tags = &tracked.spec.selector.tags;
            if !snapshots.contains_key(tags) {
                snapshots.insert(tags.clone(), sink.snapshot(tags)?);
            }
            let value = snapshots
                .get(tags)
                .and_then(|snapshot| observe(&tracked.spec, snapshot, now));

            tracked.value = value;
            tracked.verdict = match value {
                Some(v) if !tracked.spec.expression.holds(v) => Verdict::Fail,
                _ => Verdict::Pass,
            };
        }
        Ok(())
    }
}

fn observe(spec: &ThresholdSpec, snapshot: &WindowSnapshot, now: Duration) -> Option<f64> {
    let secs = now.as_secs_f64();
    let per_second = |n: u64| (n > 0 && secs > 0.0).then(|| n as f64 / secs);
    let latency = snapshot.latency();
    let served = latency.len();

    match (spec.selector.metric, spec.expression.aggregation) {
        (MetricKind::HttpReqDuration, Aggregation::Percentile(p)) => latency.quantile_ms(p / 100.0),
        (MetricKind::HttpReqDuration, Aggregation::Med) => latency.quantile_ms(0.5),
        (MetricKind::HttpReqDuration, Aggregation::Avg) => latency.mean_ms(),
        (MetricKind::HttpReqDuration, Aggregation::Min) => latency.min_ms(),
        (MetricKind::HttpReqDuration, Aggregation::Max) => latency.max_ms(),
        (MetricKind::HttpReqFailed, Aggregation::Rate) => snapshot.error_rate(),
        (MetricKind::Checks, Aggregation::Rate) => snapshot.success_rate(),
        (MetricKind::HttpReqs, Aggregation::Count) => Some(snapshot.count() as f64),
        (MetricKind::HttpReqs, Aggregation::Rate) => per_second(snapshot.count()),
        (MetricKind::Iterations, Aggregation::Count) => Some(served as f64),
        (MetricKind::Iterations, Aggregation::Rate) => per_second(served),
        (MetricKind::DroppedIterations, Aggregation::Count) => Some(snapshot.dropped() as f64),
        (MetricKind::DroppedIterations, Aggregation::Rate) => per_second(snapshot.dropped()),
        _ => None,
    }
}
