//! Execution outcomes reported by request executors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why an iteration did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// The service answered with a status outside the expected set
    UnexpectedStatus(u16),
    /// Request deadline exceeded, or the job was force-terminated after the grace period
    Timeout,
    /// Connection could not be established or was reset
    Connection,
    /// The pool was saturated and the arrival was never served
    Dropped,
    /// Anything else the executor reports
    Other(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedStatus(code) => write!(f, "unexpected status {code}"),
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection error"),
            Self::Dropped => write!(f, "dropped"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Iteration outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Request completed with an expected status
    Success,
    /// Request failed
    Failure(FailureReason),
}

impl Outcome {
    /// Check if this outcome indicates success
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// The failure reason, if any
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(reason) => Some(reason),
        }
    }
}

/// What a single `RequestExecutor::execute` call produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Success or failure classification
    pub outcome: Outcome,

    /// Wall-clock latency of the request
    pub latency: Duration,

    /// Transport status code, when one was received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ExecutionResult {
    /// Successful result
    pub fn success(latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            outcome: Outcome::Success,
            latency,
            status_code,
        }
    }

    /// Failed result
    pub fn failure(reason: FailureReason, latency: Duration, status_code: Option<u16>) -> Self {
        Self {
            outcome: Outcome::Failure(reason),
            latency,
            status_code,
        }
    }

    /// Classify `status` against the set of statuses the caller expects
    pub fn from_status(status: u16, expected: &[u16], latency: Duration) -> Self {
        if expected.contains(&status) {
            Self::success(latency, Some(status))
        } else {
            Self::failure(FailureReason::UnexpectedStatus(status), latency, Some(status))
        }
    }

    /// Check if the result was successful
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        let ok = ExecutionResult::from_status(404, &[200, 404], Duration::from_millis(5));
        assert!(ok.is_success());
        assert_eq!(ok.status_code, Some(404));

        let bad = ExecutionResult::from_status(500, &[201], Duration::from_millis(5));
        assert_eq!(
            bad.outcome,
            Outcome::Failure(FailureReason::UnexpectedStatus(500))
        );
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(
            FailureReason::UnexpectedStatus(503).to_string(),
            "unexpected status 503"
        );
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
        assert_eq!(Outcome::Success.failure(), None);
    }

    #[test]
    fn test_failure_reason_json_format() {
        let json = serde_json::to_string(&FailureReason::UnexpectedStatus(500)).unwrap();
        assert_eq!(json, r#"{"kind":"unexpected_status","detail":500}"#);
        let json = serde_json::to_string(&FailureReason::Timeout).unwrap();
        assert_eq!(json, r#"{"kind":"timeout"}"#);
    }
}
