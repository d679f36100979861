//! Run configuration types
//!
//! A run is described by one immutable [`RunConfig`], normally loaded from a
//! TOML file. Field names follow snake_case; the k6 camelCase spellings
//! (`preAllocatedVUs`, `maxVUs`, `abortOnFail`, ...) are accepted as aliases.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::request::TagSet;
use crate::schedule::{Schedule, Stage};

/// Complete description of one load-test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run name, reported in the summary
    #[serde(default = "default_run_name")]
    pub name: String,

    /// Grace period for in-flight iterations once a stream stops
    #[serde(default = "default_graceful_stop", with = "humantime_serde", alias = "gracefulStop")]
    pub graceful_stop: Duration,

    /// Cadence of threshold evaluation
    #[serde(
        default = "default_evaluation_interval",
        with = "humantime_serde",
        alias = "evaluationInterval"
    )]
    pub evaluation_interval: Duration,

    /// Arrival clock tick
    #[serde(default = "default_tick", with = "humantime_serde")]
    pub tick: Duration,

    /// Seed for worker random sources and random stages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// How dropped arrivals enter the request counters
    #[serde(default, alias = "dropPolicy")]
    pub drop_policy: DropPolicy,

    /// Number of metric shards; defaults to the total worker budget
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "metricShards")]
    pub metric_shards: Option<usize>,

    /// Tags applied to every metric of the run
    #[serde(default)]
    pub tags: TagSet,

    /// Traffic streams, all started together
    #[serde(default, alias = "scenarios")]
    pub streams: Vec<StreamConfig>,

    /// Threshold expressions keyed by metric selector
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<ThresholdConfig>>,
}

fn default_run_name() -> String {
    "arrival-bench".to_string()
}

fn default_graceful_stop() -> Duration {
    Duration::from_secs(30)
}

fn default_evaluation_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_tick() -> Duration {
    Duration::from_millis(5)
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

fn default_pre_allocated() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            graceful_stop: default_graceful_stop(),
            evaluation_interval: default_evaluation_interval(),
            tick: default_tick(),
            seed: None,
            drop_policy: DropPolicy::default(),
            metric_shards: None,
            tags: TagSet::new(),
            streams: Vec::new(),
            thresholds: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Create an empty config with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> BenchResult<Self> {
        toml::from_str(text).map_err(|e| BenchError::config(format!("invalid run file: {e}")))
    }

    /// Load and validate a TOML run file
    pub fn load(path: impl AsRef<Path>) -> BenchResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| BenchError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Add a stream
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    /// Add a threshold for `selector`
    pub fn with_threshold(
        mut self,
        selector: impl Into<String>,
        threshold: ThresholdConfig,
    ) -> Self {
        self.thresholds
            .entry(selector.into())
            .or_default()
            .push(threshold);
        self
    }

    /// Set a global tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the run-wide grace period
    pub fn with_graceful_stop(mut self, grace: Duration) -> Self {
        self.graceful_stop = grace;
        self
    }

    /// Set the threshold evaluation cadence
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// Set the drop policy
    pub fn with_drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sum of every stream's worker ceiling
    pub fn total_max_workers(&self) -> usize {
        self.streams
            .iter()
            .map(|s| s.pool_sizing().max_workers)
            .sum()
    }

    /// Shard count for the metric sink
    pub fn resolved_metric_shards(&self) -> usize {
        self.metric_shards
            .unwrap_or_else(|| self.total_max_workers())
            .max(1)
    }

    /// Grace period that applies to `stream`
    pub fn graceful_stop_for(&self, stream: &StreamConfig) -> Duration {
        stream.graceful_stop.unwrap_or(self.graceful_stop)
    }

    /// Validate the configuration
    pub fn validate(&self) -> BenchResult<()> {
        if self.streams.is_empty() {
            return Err(BenchError::missing_config("streams"));
        }
        if self.tick.is_zero() {
            return Err(BenchError::config("tick must be positive"));
        }
        if self.evaluation_interval.is_zero() {
            return Err(BenchError::config("evaluation_interval must be positive"));
        }
        if self.metric_shards == Some(0) {
            return Err(BenchError::config("metric_shards must be at least 1"));
        }

        let mut names = HashSet::new();
        for stream in &self.streams {
            stream.validate()?;
            if !names.insert(stream.name.as_str()) {
                return Err(BenchError::config(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
        }

        for (selector, specs) in &self.thresholds {
            if selector.trim().is_empty() {
                return Err(BenchError::config("threshold selector must not be empty"));
            }
            for spec in specs {
                if spec.expression().trim().is_empty() {
                    return Err(BenchError::invalid_threshold(
                        selector.clone(),
                        "empty threshold expression",
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Arrival-rate executor of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Stages ramp linearly between targets
    #[default]
    RampingArrivalRate,
    /// One rate held for a fixed duration
    ConstantArrivalRate,
}

/// Parameters for generated stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomStages {
    /// Number of stages
    pub count: usize,

    /// Duration of each stage
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Lowest target (inclusive)
    #[serde(alias = "minRate")]
    pub min_rate: f64,

    /// Highest target (exclusive)
    #[serde(alias = "maxRate")]
    pub max_rate: f64,
}

/// One traffic stream (k6 scenario)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name; becomes the `scenario` tag
    pub name: String,

    /// Executor entry point (e.g. an endpoint name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,

    /// Arrival-rate executor
    #[serde(default)]
    pub executor: ExecutorKind,

    /// Rate at elapsed zero (ramping only)
    #[serde(default, alias = "startRate")]
    pub start_rate: f64,

    /// Period rates are expressed in
    #[serde(default = "default_time_unit", with = "humantime_serde", alias = "timeUnit")]
    pub time_unit: Duration,

    /// Explicit stages (ramping only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,

    /// Generated stages (ramping only)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "randomStages")]
    pub random_stages: Option<RandomStages>,

    /// Held rate (constant only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,

    /// Hold duration (constant only)
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub duration: Option<Duration>,

    /// Workers started before the clock
    #[serde(default = "default_pre_allocated", alias = "preAllocatedVUs")]
    pub pre_allocated: usize,

    /// Worker ceiling; defaults to `pre_allocated`
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "maxVUs")]
    pub max_workers: Option<usize>,

    /// Per-stream grace period override
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde",
        alias = "gracefulStop"
    )]
    pub graceful_stop: Option<Duration>,

    /// Per-request deadline
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "humantime_serde",
        alias = "requestTimeout"
    )]
    pub request_timeout: Option<Duration>,

    /// Stream tags
    #[serde(default)]
    pub tags: TagSet,
}

impl StreamConfig {
    /// A ramping stream over explicit stages
    pub fn ramping(name: impl Into<String>, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            exec: None,
            executor: ExecutorKind::RampingArrivalRate,
            start_rate: 0.0,
            time_unit: default_time_unit(),
            stages,
            random_stages: None,
            rate: None,
            duration: None,
            pre_allocated: default_pre_allocated(),
            max_workers: None,
            graceful_stop: None,
            request_timeout: None,
            tags: TagSet::new(),
        }
    }

    /// A constant-rate stream
    pub fn constant(name: impl Into<String>, rate: f64, duration: Duration) -> Self {
        Self {
            executor: ExecutorKind::ConstantArrivalRate,
            rate: Some(rate),
            duration: Some(duration),
            ..Self::ramping(name, Vec::new())
        }
    }

    /// Set the exec target
    pub fn with_exec(mut self, exec: impl Into<String>) -> Self {
        self.exec = Some(exec.into());
        self
    }

    /// Set the pool bounds
    pub fn with_workers(mut self, pre_allocated: usize, max_workers: usize) -> Self {
        self.pre_allocated = pre_allocated;
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the per-request deadline
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the grace period override
    pub fn with_graceful_stop(mut self, grace: Duration) -> Self {
        self.graceful_stop = Some(grace);
        self
    }

    /// Set a stream tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    /// Resolved pool bounds
    pub fn pool_sizing(&self) -> PoolSizing {
        PoolSizing {
            pre_allocated: self.pre_allocated,
            max_workers: self.max_workers.unwrap_or(self.pre_allocated),
        }
    }

    /// Validate the stream
    pub fn validate(&self) -> BenchResult<()> {
        if self.name.trim().is_empty() {
            return Err(BenchError::missing_config("streams.name"));
        }
        self.pool_sizing()
            .validate()
            .map_err(|e| BenchError::config(format!("stream '{}': {e}", self.name)))?;

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(BenchError::config(format!(
                "stream '{}': request_timeout must be positive",
                self.name
            )));
        }

        match self.executor {
            ExecutorKind::ConstantArrivalRate => {
                if self.rate.is_none() || self.duration.is_none() {
                    return Err(BenchError::config(format!(
                        "stream '{}': constant-arrival-rate needs rate and duration",
                        self.name
                    )));
                }
                if !self.stages.is_empty() || self.random_stages.is_some() {
                    return Err(BenchError::config(format!(
                        "stream '{}': constant-arrival-rate does not take stages",
                        self.name
                    )));
                }
            }
            ExecutorKind::RampingArrivalRate => {
                match (self.stages.is_empty(), self.random_stages.is_some()) {
                    (true, false) => return Err(BenchError::missing_config("streams.stages")),
                    (false, true) => {
                        return Err(BenchError::config(format!(
                            "stream '{}': stages and random_stages are mutually exclusive",
                            self.name
                        )))
                    }
                    _ => {}
                }
                if self.rate.is_some() || self.duration.is_some() {
                    return Err(BenchError::config(format!(
                        "stream '{}': rate and duration only apply to constant-arrival-rate",
                        self.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Build the stream's schedule
    ///
    /// `rng` only feeds `random_stages`; explicit stages ignore it.
    pub fn schedule<R: Rng + ?Sized>(&self, rng: &mut R) -> BenchResult<Schedule> {
        let schedule = match self.executor {
            ExecutorKind::ConstantArrivalRate => {
                let rate = self
                    .rate
                    .ok_or(BenchError::missing_config("streams.rate"))?;
                let duration = self
                    .duration
                    .ok_or(BenchError::missing_config("streams.duration"))?;
                Schedule::constant(rate, duration)
            }
            ExecutorKind::RampingArrivalRate => match &self.random_stages {
                Some(random) => Schedule::random(
                    rng,
                    random.count,
                    random.duration,
                    random.min_rate,
                    random.max_rate,
                )?
                .with_start_rate(self.start_rate),
                None => Schedule::new(self.stages.clone()).with_start_rate(self.start_rate),
            },
        };
        Ok(schedule.with_time_unit(self.time_unit))
    }
}

/// Worker pool bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizing {
    /// Workers started before the clock
    pub pre_allocated: usize,
    /// Ceiling the pool may grow to
    pub max_workers: usize,
}

impl PoolSizing {
    /// Create pool bounds
    pub fn new(pre_allocated: usize, max_workers: usize) -> Self {
        Self {
            pre_allocated,
            max_workers,
        }
    }

    /// Validate the bounds
    pub fn validate(&self) -> BenchResult<()> {
        if self.max_workers == 0 {
            return Err(BenchError::config("max_workers must be at least 1"));
        }
        if self.max_workers < self.pre_allocated {
            return Err(BenchError::config(format!(
                "max_workers ({}) must be >= pre_allocated ({})",
                self.max_workers, self.pre_allocated
            )));
        }
        Ok(())
    }
}

/// Accounting of arrivals dropped on pool saturation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Counted under `dropped_iterations` only
    #[default]
    Separate,
    /// Also counted as failed requests
    CountAsFailure,
}

/// One entry of a threshold list, in either accepted shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    /// Bare expression, e.g. `"p(95)<300"`
    Expression(String),
    /// Expression with abort settings
    Structured {
        /// Expression
        threshold: String,
        /// Abort the run when this threshold fails
        #[serde(default, alias = "abortOnFail")]
        abort_on_fail: bool,
        /// How long the failure must persist before aborting
        #[serde(default, with = "humantime_serde", alias = "delayAbortEval")]
        delay_abort_eval: Duration,
    },
}

impl ThresholdConfig {
    /// Bare expression
    pub fn expression_only(expr: impl Into<String>) -> Self {
        Self::Expression(expr.into())
    }

    /// Abort-eligible expression
    pub fn abort_on_fail(expr: impl Into<String>, delay: Duration) -> Self {
        Self::Structured {
            threshold: expr.into(),
            abort_on_fail: true,
            delay_abort_eval: delay,
        }
    }

    /// The expression text
    pub fn expression(&self) -> &str {
        match self {
            Self::Expression(expr) => expr,
            Self::Structured { threshold, .. } => threshold,
        }
    }

    /// Whether a failure aborts the run
    pub fn aborts(&self) -> bool {
        matches!(self, Self::Structured { abort_on_fail: true, .. })
    }

    /// Abort delay; zero for bare expressions
    pub fn delay(&self) -> Duration {
        match self {
            Self::Expression(_) => Duration::ZERO,
            Self::Structured {
                delay_abort_eval, ..
            } => *delay_abort_eval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    const SAMPLE: &str = r#"
name = "hp-mixed"
graceful_stop = "60s"
seed = 42

[tags]
solution = "Sol-Baseline"

[[streams]]
name = "hp_write_telemetry"
exec = "telemetry_post"
executor = "ramping-arrival-rate"
pre_allocated = 50
max_workers = 200
request_timeout = "30s"
tags = { role = "write" }
stages = [{ duration = "2m", target = 50 }, { duration = "1m", target = 0 }]

[[streams]]
name = "hp_read_latest"
exec = "telemetry_get_latest"
executor = "constant-arrival-rate"
rate = 20
duration = "90s"
preAllocatedVUs = 5
maxVUs = 10

[thresholds]
"http_req_failed{scenario:hp_write_telemetry}" = [
  { threshold = "rate<0.01", abortOnFail = true, delayAbortEval = "10s" },
]
"http_req_duration{endpoint:telemetry_post}" = ["p(95)<300", "p(99)<1000"]
"#;

    #[test]
    fn test_parse_sample_run_file() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.name, "hp-mixed");
        assert_eq!(config.graceful_stop, Duration::from_secs(60));
        assert_eq!(config.tick, Duration::from_millis(5));
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.drop_policy, DropPolicy::Separate);
        assert_eq!(config.tags.get("solution"), Some("Sol-Baseline"));
        assert_eq!(config.streams.len(), 2);

        let write = &config.streams[0];
        assert_eq!(write.pool_sizing(), PoolSizing::new(50, 200));
        assert_eq!(write.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(write.stages[0].duration, Duration::from_secs(120));

        let read = &config.streams[1];
        assert_eq!(read.executor, ExecutorKind::ConstantArrivalRate);
        assert_eq!(read.pool_sizing(), PoolSizing::new(5, 10));
        assert_eq!(config.total_max_workers(), 210);
        assert_eq!(config.resolved_metric_shards(), 210);
    }

    #[test]
    fn test_threshold_shapes_normalize() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();

        let failed = &config.thresholds["http_req_failed{scenario:hp_write_telemetry}"][0];
        assert_eq!(failed.expression(), "rate<0.01");
        assert!(failed.aborts());
        assert_eq!(failed.delay(), Duration::from_secs(10));

        let duration = &config.thresholds["http_req_duration{endpoint:telemetry_post}"];
        assert_eq!(duration.len(), 2);
        assert_eq!(duration[1].expression(), "p(99)<1000");
        assert!(!duration[1].aborts());
        assert_eq!(duration[1].delay(), Duration::ZERO);
    }

    #[test]
    fn test_structured_threshold_defaults() {
        let text = r#"
[[streams]]
name = "s"
stages = [{ duration = "10s", target = 5 }]

[thresholds]
"checks" = [{ threshold = "rate>0.9" }]
"#;
        let config = RunConfig::from_toml_str(text).unwrap();
        let spec = &config.thresholds["checks"][0];
        assert!(!spec.aborts());
        assert_eq!(spec.delay(), Duration::ZERO);
    }

    #[test]
    fn test_schedule_from_stream() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let write = config.streams[0].schedule(&mut rng).unwrap();
        assert_eq!(write.total_duration(), Duration::from_secs(180));

        let read = config.streams[1].schedule(&mut rng).unwrap();
        let compiled = read.compile().unwrap();
        assert_eq!(compiled.total_expected(), 1800.0);
    }

    #[test]
    fn test_random_stages_reproducible() {
        let stream = StreamConfig {
            random_stages: Some(RandomStages {
                count: 5,
                duration: Duration::from_secs(180),
                min_rate: 200.0,
                max_rate: 1500.0,
            }),
            ..StreamConfig::ramping("random", Vec::new())
        };
        stream.validate().unwrap();

        let a = stream.schedule(&mut StdRng::seed_from_u64(7)).unwrap();
        let b = stream.schedule(&mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.stages.len(), 5);
        assert!(a
            .stages
            .iter()
            .all(|s| (200.0..1500.0).contains(&s.target)));
    }

    #[test]
    fn test_validation_rejects_bad_streams() {
        assert!(RunConfig::new("empty").validate().is_err());

        let no_stages = RunConfig::new("x").with_stream(StreamConfig::ramping("s", Vec::new()));
        assert!(no_stages.validate().is_err());

        let stages = vec![Stage::new(Duration::from_secs(1), 1.0)];
        let bad_pool = RunConfig::new("x")
            .with_stream(StreamConfig::ramping("s", stages.clone()).with_workers(10, 5));
        assert!(bad_pool.validate().is_err());

        let dup = RunConfig::new("x")
            .with_stream(StreamConfig::ramping("s", stages.clone()))
            .with_stream(StreamConfig::ramping("s", stages.clone()));
        assert!(dup.validate().is_err());

        let mut mixed = StreamConfig::ramping("s", stages.clone());
        mixed.rate = Some(3.0);
        assert!(mixed.validate().is_err());

        let zero_timeout =
            StreamConfig::ramping("s", stages).with_request_timeout(Duration::ZERO);
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_empty_threshold() {
        let config = RunConfig::new("x")
            .with_stream(StreamConfig::constant("s", 1.0, Duration::from_secs(1)))
            .with_threshold("http_reqs", ThresholdConfig::expression_only("  "));
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_drop_policy_parsing() {
        let text = r#"
drop_policy = "count_as_failure"
[[streams]]
name = "s"
executor = "constant-arrival-rate"
rate = 1
duration = "1s"
"#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.drop_policy, DropPolicy::CountAsFailure);
        assert_eq!(config.streams[0].pool_sizing(), PoolSizing::new(1, 1));
    }

    #[test]
    fn test_graceful_stop_override() {
        let config = RunConfig::from_toml_str(SAMPLE).unwrap();
        let stream = config.streams[1].clone().with_graceful_stop(Duration::from_secs(5));
        assert_eq!(config.graceful_stop_for(&stream), Duration::from_secs(5));
        assert_eq!(config.graceful_stop_for(&config.streams[0]), Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.streams.len(), 2);

        let missing = RunConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(BenchError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = RunConfig::from_toml_str("streams = 3").unwrap_err();
        assert!(err.is_config_error());
    }
}
