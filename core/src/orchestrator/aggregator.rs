//! Result aggregation from streams and the metric sink

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::abort::Termination;
use crate::clock::ClockStats;
use crate::config::RunConfig;
use crate::error::BenchResult;
use crate::metrics::MetricSink;
use crate::request::TagSet;
use crate::summary::{GroupSummary, RunStatus, RunSummary, StreamSummary};
use crate::threshold::ThresholdReport;
use crate::worker::PoolStats;

use super::executor::StreamPlan;

/// What one stream task reported when it finished
#[derive(Debug, Clone)]
pub(crate) struct StreamOutcome {
    pub plan: StreamPlan,
    pub clock: ClockStats,
    pub pool: PoolStats,
}

/// Build the run summary from stream outcomes and the sink
#[allow(clippy::too_many_arguments)]
pub(crate) fn aggregate_run(
    config: &RunConfig,
    seed: u64,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    elapsed: Duration,
    termination: Termination,
    outcomes: Vec<StreamOutcome>,
    sink: &MetricSink,
    thresholds: Vec<ThresholdReport>,
) -> BenchResult<RunSummary> {
    let totals = sink.snapshot(&TagSet::new())?.summary();

    let mut streams = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        let selector = TagSet::new().with("scenario", outcome.plan.config.name.as_str());
        let metrics = sink.snapshot(&selector)?.summary();
        streams.push(StreamSummary {
            name: outcome.plan.config.name,
            exec: outcome.plan.config.exec,
            tags: (*outcome.plan.tags).clone(),
            clock: outcome.clock,
            pool: outcome.pool,
            metrics,
        });
    }

    let groups = sink
        .windows()?
        .into_iter()
        .map(|(tags, snapshot)| GroupSummary {
            tags,
            metrics: snapshot.summary(),
        })
        .collect();

    let (status, abort) = match termination {
        Termination::Completed => (RunStatus::Completed, None),
        Termination::Aborted(cause) => (RunStatus::Aborted, Some(cause)),
    };

    Ok(RunSummary {
        name: config.name.clone(),
        status,
        abort,
        seed,
        started_at,
        ended_at,
        duration_secs: elapsed.as_secs_f64(),
        totals,
        streams,
        groups,
        thresholds,
    })
}
