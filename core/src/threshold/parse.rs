//! Selector and expression grammar
//!
//! ```text
//! selector   := metric [ "{" [ tag ( "," tag )* ] "}" ]
//! tag        := key ":" value
//! expression := aggregation op number
//! aggregation:= "p(" N ")" | "p" N | avg | min | max | med | rate | count
//! op         := "<" | "<=" | ">" | ">=" | "==" | "!="
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult};
use crate::request::TagSet;

/// Built-in metrics a threshold can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Request latency trend, milliseconds
    HttpReqDuration,
    /// Fraction of failed requests
    HttpReqFailed,
    /// Requests counted
    HttpReqs,
    /// Iterations served
    Iterations,
    /// Arrivals dropped on pool saturation
    DroppedIterations,
    /// Fraction of successful requests
    Checks,
}

impl MetricKind {
    /// Name as written in selectors
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqFailed => "http_req_failed",
            Self::HttpReqs => "http_reqs",
            Self::Iterations => "iterations",
            Self::DroppedIterations => "dropped_iterations",
            Self::Checks => "checks",
        }
    }

    fn supports(&self, aggregation: Aggregation) -> bool {
        match self {
            Self::HttpReqDuration => matches!(
                aggregation,
                Aggregation::Percentile(_)
                    | Aggregation::Avg
                    | Aggregation::Min
                    | Aggregation::Max
                    | Aggregation::Med
            ),
            Self::HttpReqFailed | Self::Checks => aggregation == Aggregation::Rate,
            Self::HttpReqs | Self::Iterations | Self::DroppedIterations => {
                matches!(aggregation, Aggregation::Count | Aggregation::Rate)
            }
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http_req_duration" => Ok(Self::HttpReqDuration),
            "http_req_failed" => Ok(Self::HttpReqFailed),
            "http_reqs" => Ok(Self::HttpReqs),
            "iterations" => Ok(Self::Iterations),
            "dropped_iterations" => Ok(Self::DroppedIterations),
            "checks" => Ok(Self::Checks),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric name plus the tags its windows must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    /// Target metric
    pub metric: MetricKind,
    /// Required tags
    pub tags: TagSet,
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}", self.metric)
        } else {
            write!(f, "{}{}", self.metric, self.tags)
        }
    }
}

/// Parse `metric{key:value,...}`
pub fn parse_selector(text: &str) -> BenchResult<MetricSelector> {
    let trimmed = text.trim();
    let invalid = |reason: String| BenchError::invalid_threshold(text, reason);

    let (name, tag_body) = match trimmed.find('{') {
        Some(open) => {
            let body = trimmed[open + 1..]
                .strip_suffix('}')
                .ok_or_else(|| invalid("unclosed tag list".into()))?;
            (&trimmed[..open], Some(body))
        }
        None => (trimmed, None),
    };

    let metric = name.trim().parse::<MetricKind>().map_err(invalid)?;

    let mut tags = TagSet::new();
    if let Some(body) = tag_body.filter(|b| !b.trim().is_empty()) {
        for pair in body.split(',') {
            let (key, value) = pair
                .split_once(':')
                .ok_or_else(|| invalid(format!("tag '{}' is not key:value", pair.trim())))?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(invalid(format!("tag '{}' is not key:value", pair.trim())));
            }
            tags.insert(key, value);
        }
    }

    Ok(MetricSelector { metric, tags })
}

/// How a metric is reduced to one number
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Percentile in 0..=100
    Percentile(f64),
    /// Mean
    Avg,
    /// Minimum
    Min,
    /// Maximum
    Max,
    /// Median
    Med,
    /// Fraction (rate metrics) or per-second rate (counters)
    Rate,
    /// Total
    Count,
}

impl Aggregation {
    fn parse(text: &str) -> Result<Self, String> {
        match text {
            "avg" => return Ok(Self::Avg),
            "min" => return Ok(Self::Min),
            "max" => return Ok(Self::Max),
            "med" => return Ok(Self::Med),
            "rate" => return Ok(Self::Rate),
            "count" => return Ok(Self::Count),
            _ => {}
        }

        let number = text
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| text.strip_prefix('p'))
            .ok_or_else(|| format!("unknown aggregation '{text}'"))?;
        let percentile: f64 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid percentile '{text}'"))?;
        if !(0.0..=100.0).contains(&percentile) {
            return Err(format!("percentile {percentile} outside 0..=100"));
        }
        Ok(Self::Percentile(percentile))
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
            Self::Rate => f.write_str("rate"),
            Self::Count => f.write_str("count"),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl Operator {
    /// Apply to `lhs <op> rhs`
    pub fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Parsed `aggregation op literal`
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    /// Left-hand side
    pub aggregation: Aggregation,
    /// Operator
    pub op: Operator,
    /// Right-hand literal
    pub value: f64,
}

impl Expression {
    /// True if `observed` satisfies the expression
    pub fn holds(&self, observed: f64) -> bool {
        self.op.holds(observed, self.value)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.op.as_str(), self.value)
    }
}

/// Parse an expression such as `p(95)<300` or `rate < 0.01`
pub fn parse_expression(text: &str) -> BenchResult<Expression> {
    let invalid = |reason: String| BenchError::invalid_threshold(text, reason);

    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let at = compact
        .find(['<', '>', '=', '!'])
        .ok_or_else(|| invalid("missing comparison operator".into()))?;
    let (lhs, rest) = compact.split_at(at);

    let (op, literal) = if let Some(lit) = rest.strip_prefix("<=") {
        (Operator::Le, lit)
    } else if let Some(lit) = rest.strip_prefix(">=") {
        (Operator::Ge, lit)
    } else if let Some(lit) = rest.strip_prefix("==") {
        (Operator::Eq, lit)
    } else if let Some(lit) = rest.strip_prefix("!=") {
        (Operator::Ne, lit)
    } else if let Some(lit) = rest.strip_prefix('<') {
        (Operator::Lt, lit)
    } else if let Some(lit) = rest.strip_prefix('>') {
        (Operator::Gt, lit)
    } else {
        return Err(invalid(format!("unknown operator in '{rest}'")));
    };

    let aggregation = Aggregation::parse(lhs).map_err(invalid)?;
    let value: f64 = literal
        .parse()
        .map_err(|_| invalid(format!("'{literal}' is not a number")))?;
    if !value.is_finite() {
        return Err(invalid(format!("'{literal}' is not finite")));
    }

    Ok(Expression {
        aggregation,
        op,
        value,
    })
}

/// Parse a selector and expression and check they fit together
pub fn parse_threshold(selector: &str, expression: &str) -> BenchResult<(MetricSelector, Expression)> {
    let selector_parsed = parse_selector(selector)?;
    let expression_parsed = parse_expression(expression)?;
    if !selector_parsed.metric.supports(expression_parsed.aggregation) {
        return Err(BenchError::invalid_threshold(
            expression,
            format!(
                "{} does not support {}",
                selector_parsed.metric, expression_parsed.aggregation
            ),
        ));
    }
    Ok((selector_parsed, expression_parsed))
}
