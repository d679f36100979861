//! Arrival-rate schedules
//!
//! A [`Schedule`] is an ordered list of [`Stage`]s, each ramping linearly from
//! the previous stage's target (or the schedule's start rate) to its own
//! target over its duration. A hold stage simply repeats the previous target.
//!
//! Compiling a schedule produces a [`CompiledSchedule`]: an immutable,
//! piecewise-linear rate function together with its closed-form integral,
//! which the arrival clock uses to decide how many iterations are due.
//!
//! ```text
//! rate
//!  ^        ______
//!  |       /      \
//!  |  ____/        \
//!  | /              \____  (held after the end)
//!  +----------------------> elapsed
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};

/// One ramp or hold segment of a schedule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the ramp towards `target` lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Target rate at the end of the stage, in iterations per time unit
    pub target: f64,
}

impl Stage {
    /// Create a new stage
    pub fn new(duration: Duration, target: f64) -> Self {
        Self { duration, target }
    }
}

/// Ordered stage list plus the rate it starts from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Rate at elapsed zero
    #[serde(default)]
    pub start_rate: f64,

    /// Period the rates are expressed in (k6 `timeUnit`)
    #[serde(default = "default_time_unit", with = "humantime_serde")]
    pub time_unit: Duration,

    /// Stages in execution order
    pub stages: Vec<Stage>,
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

impl Schedule {
    /// Create a schedule starting from rate zero with a one-second time unit
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            start_rate: 0.0,
            time_unit: default_time_unit(),
            stages,
        }
    }

    /// A single hold stage at `rate` (k6 `constant-arrival-rate`)
    pub fn constant(rate: f64, duration: Duration) -> Self {
        Self {
            start_rate: rate,
            time_unit: default_time_unit(),
            stages: vec![Stage::new(duration, rate)],
        }
    }

    /// Generate `count` stages with targets drawn uniformly from
    /// `[min_rate, max_rate)`, floored to whole rates.
    ///
    /// The random source is supplied by the caller so that seeded runs
    /// reproduce the same stages.
    pub fn random<R: Rng + ?Sized>(
        rng: &mut R,
        count: usize,
        stage_duration: Duration,
        min_rate: f64,
        max_rate: f64,
    ) -> BenchResult<Self> {
        if count == 0 {
            return Err(BenchError::invalid_schedule(
                "random stage count must be at least 1",
            ));
        }
        if !(min_rate.is_finite() && max_rate.is_finite()) || min_rate < 0.0 || max_rate < min_rate
        {
            return Err(BenchError::invalid_schedule(format!(
                "random stage rates must satisfy 0 <= min_rate <= max_rate, got [{min_rate}, {max_rate}]"
            )));
        }

        let stages = (0..count)
            .map(|_| {
                let target = if max_rate > min_rate {
                    rng.gen_range(min_rate..max_rate).floor()
                } else {
                    min_rate
                };
                Stage::new(stage_duration, target)
            })
            .collect();

        Ok(Self::new(stages))
    }

    /// Set the starting rate
    pub fn with_start_rate(mut self, rate: f64) -> Self {
        self.start_rate = rate;
        self
    }

    /// Set the time unit rates are expressed in
    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        self.time_unit = unit;
        self
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Validate and compile into a queryable rate function
    pub fn compile(&self) -> BenchResult<CompiledSchedule> {
        CompiledSchedule::compile(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: f64,
    duration: f64,
    from: f64,
    to: f64,
    arrivals_before: f64,
}

impl Segment {
    fn end(&self) -> f64 {
        self.start + self.duration
    }

    fn rate_at(&self, offset: f64) -> f64 {
        let fraction = offset / self.duration;
        self.from + (self.to - self.from) * fraction
    }

    fn arrivals_at(&self, offset: f64) -> f64 {
        self.arrivals_before
            + self.from * offset
            + (self.to - self.from) * offset * offset / (2.0 * self.duration)
    }
}

/// Immutable piecewise-linear rate function, in iterations per second
#[derive(Debug, Clone)]
pub struct CompiledSchedule {
    segments: Vec<Segment>,
    total: Duration,
    total_secs: f64,
    final_rate: f64,
    total_arrivals: f64,
}

impl CompiledSchedule {
    /// Validate `schedule` and build its rate function
    pub fn compile(schedule: &Schedule) -> BenchResult<Self> {
        if schedule.stages.is_empty() {
            return Err(BenchError::invalid_schedule("schedule has no stages"));
        }
        if schedule.time_unit.is_zero() {
            return Err(BenchError::invalid_schedule("time unit must be positive"));
        }
        if !schedule.start_rate.is_finite() || schedule.start_rate < 0.0 {
            return Err(BenchError::invalid_schedule(format!(
                "start rate must be a non-negative number, got {}",
                schedule.start_rate
            )));
        }

        let unit = schedule.time_unit.as_secs_f64();
        let mut segments = Vec::with_capacity(schedule.stages.len());
        let mut start = 0.0;
        let mut from = schedule.start_rate / unit;
        let mut arrivals = 0.0;

        for (idx, stage) in schedule.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(BenchError::invalid_schedule(format!(
                    "stage {idx}: duration must be positive"
                )));
            }
            if !stage.target.is_finite() || stage.target < 0.0 {
                return Err(BenchError::invalid_schedule(format!(
                    "stage {idx}: target rate must be a non-negative number, got {}",
                    stage.target
                )));
            }

            let duration = stage.duration.as_secs_f64();
            let to = stage.target / unit;
            let segment = Segment {
                start,
                duration,
                from,
                to,
                arrivals_before: arrivals,
            };
            arrivals = segment.arrivals_at(duration);
            start = segment.end();
            from = to;
            segments.push(segment);
        }

        Ok(Self {
            segments,
            total: schedule.total_duration(),
            total_secs: start,
            final_rate: from,
            total_arrivals: arrivals,
        })
    }

    /// Index of the segment containing `t`, or `None` once the schedule is over
    fn segment_at(&self, t: f64) -> Option<usize> {
        if t >= self.total_secs {
            return None;
        }
        Some(self.segments.partition_point(|s| s.end() <= t))
    }

    /// Target rate (iterations per second) at `elapsed`
    pub fn rate(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        match self.segment_at(t) {
            Some(idx) => {
                let seg = &self.segments[idx];
                seg.rate_at(t - seg.start)
            }
            None => self.final_rate,
        }
    }

    /// Integral of the rate from zero to `elapsed`
    ///
    /// Past the end of the schedule the final rate keeps accumulating.
    pub fn expected_arrivals(&self, elapsed: Duration) -> f64 {
        let t = elapsed.as_secs_f64();
        match self.segment_at(t) {
            Some(idx) => {
                let seg = &self.segments[idx];
                seg.arrivals_at(t - seg.start)
            }
            None => self.total_arrivals + self.final_rate * (t - self.total_secs),
        }
    }

    /// Stage index active at `elapsed`; the last index once the schedule ends
    pub fn stage_index(&self, elapsed: Duration) -> usize {
        self.segment_at(elapsed.as_secs_f64())
            .unwrap_or(self.segments.len() - 1)
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.segments.len()
    }

    /// Total scheduled duration
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Expected arrivals over the full schedule
    pub fn total_expected(&self) -> f64 {
        self.total_arrivals
    }

    /// Highest instantaneous rate in the schedule
    pub fn peak_rate(&self) -> f64 {
        self.segments
            .iter()
            .flat_map(|s| [s.from, s.to])
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_single_ramp_interpolates_and_holds() {
        let compiled = Schedule::new(vec![Stage::new(secs(60), 100.0)])
            .compile()
            .unwrap();

        assert_eq!(compiled.rate(secs(30)), 50.0);
        assert_eq!(compiled.rate(secs(60)), 100.0);
        assert_eq!(compiled.rate(secs(90)), 100.0);
        assert_eq!(compiled.rate(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_expected_arrivals_trapezoid() {
        // Ramp 0 -> 100 over 60s, then hold 100 for 60s
        let compiled = Schedule::new(vec![
            Stage::new(secs(60), 100.0),
            Stage::new(secs(60), 100.0),
        ])
        .compile()
        .unwrap();

        assert!((compiled.expected_arrivals(secs(60)) - 3000.0).abs() < 1e-9);
        assert!((compiled.expected_arrivals(secs(90)) - 6000.0).abs() < 1e-9);
        assert!((compiled.total_expected() - 9000.0).abs() < 1e-9);
        // Held past the end
        assert!((compiled.expected_arrivals(secs(130)) - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_rate_and_ramp_down() {
        let compiled = Schedule::new(vec![Stage::new(secs(10), 0.0)])
            .with_start_rate(20.0)
            .compile()
            .unwrap();

        assert_eq!(compiled.rate(Duration::ZERO), 20.0);
        assert_eq!(compiled.rate(secs(5)), 10.0);
        assert!((compiled.total_expected() - 100.0).abs() < 1e-9);
        assert_eq!(compiled.rate(secs(20)), 0.0);
    }

    #[test]
    fn test_time_unit_normalizes_to_per_second() {
        let compiled = Schedule::constant(120.0, secs(60))
            .with_time_unit(secs(60))
            .compile()
            .unwrap();

        assert_eq!(compiled.rate(secs(10)), 2.0);
        assert!((compiled.total_expected() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_stage_index_and_boundaries() {
        let compiled = Schedule::new(vec![
            Stage::new(secs(10), 50.0),
            Stage::new(secs(10), 50.0),
            Stage::new(secs(10), 0.0),
        ])
        .compile()
        .unwrap();

        assert_eq!(compiled.stage_count(), 3);
        assert_eq!(compiled.stage_index(secs(0)), 0);
        assert_eq!(compiled.stage_index(secs(10)), 1);
        assert_eq!(compiled.stage_index(secs(25)), 2);
        assert_eq!(compiled.stage_index(secs(99)), 2);
        assert_eq!(compiled.rate(secs(10)), 50.0);
        assert_eq!(compiled.peak_rate(), 50.0);
        assert_eq!(compiled.total_duration(), secs(30));
    }

    #[test]
    fn test_invalid_schedules_rejected() {
        assert!(matches!(
            Schedule::new(vec![]).compile(),
            Err(BenchError::InvalidSchedule(_))
        ));
        assert!(Schedule::new(vec![Stage::new(Duration::ZERO, 10.0)])
            .compile()
            .is_err());
        assert!(Schedule::new(vec![Stage::new(secs(1), -1.0)])
            .compile()
            .is_err());
        assert!(Schedule::new(vec![Stage::new(secs(1), f64::NAN)])
            .compile()
            .is_err());
        assert!(Schedule::new(vec![Stage::new(secs(1), 1.0)])
            .with_start_rate(-5.0)
            .compile()
            .is_err());
        assert!(Schedule::new(vec![Stage::new(secs(1), 1.0)])
            .with_time_unit(Duration::ZERO)
            .compile()
            .is_err());
    }

    #[test]
    fn test_invalid_stage_reports_index() {
        let err = Schedule::new(vec![Stage::new(secs(1), 1.0), Stage::new(secs(1), -3.0)])
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("stage 1"));
    }

    #[test]
    fn test_random_stages_reproducible_with_seed() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);

        let first = Schedule::random(&mut a, 5, secs(180), 200.0, 1500.0).unwrap();
        let second = Schedule::random(&mut b, 5, secs(180), 200.0, 1500.0).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.stages.len(), 5);
        for stage in &first.stages {
            assert!(stage.target >= 200.0 && stage.target < 1500.0);
            assert_eq!(stage.target, stage.target.floor());
            assert_eq!(stage.duration, secs(180));
        }
    }

    #[test]
    fn test_random_stages_validation() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Schedule::random(&mut rng, 0, secs(1), 1.0, 2.0).is_err());
        assert!(Schedule::random(&mut rng, 3, secs(1), 5.0, 2.0).is_err());

        let flat = Schedule::random(&mut rng, 2, secs(1), 30.0, 30.0).unwrap();
        assert!(flat.stages.iter().all(|s| s.target == 30.0));
    }
}
