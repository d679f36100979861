//! SLO thresholds
//!
//! A [`ThresholdSpec`] pairs a metric selector with a comparison expression
//! and optional abort settings. The [`ThresholdEngine`] evaluates every spec
//! against [`MetricSink`](crate::metrics::MetricSink) snapshots on its own
//! cadence and signals the [`AbortController`](crate::abort::AbortController)
//! once an abort-eligible breach has persisted past its delay.

mod engine;
mod parse;

pub use engine::{ThresholdEngine, ThresholdReport, Verdict};
pub use parse::{
    parse_expression, parse_selector, parse_threshold, Aggregation, Expression, MetricKind,
    MetricSelector, Operator,
};

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ThresholdConfig;
use crate::error::BenchResult;

/// One normalized threshold
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    /// Selector as written in configuration
    pub selector_text: String,
    /// Expression as written in configuration
    pub expression_text: String,
    /// Parsed selector
    pub selector: MetricSelector,
    /// Parsed expression
    pub expression: Expression,
    /// Whether a sustained failure aborts the run
    pub abort_on_fail: bool,
    /// How long a failure must persist before aborting
    pub delay_abort_eval: Duration,
}

impl ThresholdSpec {
    /// Parse and normalize one configuration entry
    pub fn new(selector: &str, config: &ThresholdConfig) -> BenchResult<Self> {
        let (parsed_selector, expression) = parse_threshold(selector, config.expression())?;
        Ok(Self {
            selector_text: selector.trim().to_string(),
            expression_text: config.expression().trim().to_string(),
            selector: parsed_selector,
            expression,
            abort_on_fail: config.aborts(),
            delay_abort_eval: config.delay(),
        })
    }

    /// Normalize every threshold of a run
    pub fn from_config(thresholds: &BTreeMap<String, Vec<ThresholdConfig>>) -> BenchResult<Vec<Self>> {
        thresholds
            .iter()
            .flat_map(|(selector, entries)| entries.iter().map(move |entry| Self::new(selector, entry)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_shapes_normalize() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "http_req_duration{scenario:read}".to_string(),
            vec![
                ThresholdConfig::expression_only("p(95)<300"),
                ThresholdConfig::abort_on_fail("p(99)<1000", Duration::from_secs(10)),
            ],
        );

        let specs = ThresholdSpec::from_config(&thresholds).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(!specs[0].abort_on_fail);
        assert_eq!(specs[0].delay_abort_eval, Duration::ZERO);
        assert!(specs[1].abort_on_fail);
        assert_eq!(specs[1].delay_abort_eval, Duration::from_secs(10));
        assert_eq!(specs[1].selector.tags.get("scenario"), Some("read"));
    }

    #[test]
    fn test_invalid_entry_fails_whole_set() {
        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "http_req_failed".to_string(),
            vec![
                ThresholdConfig::expression_only("rate<0.01"),
                ThresholdConfig::expression_only("rate<<0.01"),
            ],
        );
        assert!(ThresholdSpec::from_config(&thresholds).is_err());
    }
}
