//! Error types for arrival-bench-core

use thiserror::Error;

/// Core error type
///
/// Configuration-class errors are raised before a run starts. Only
/// [`BenchError::AggregationFault`] can surface once the run is underway.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Malformed stage list
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Threshold selector or expression could not be parsed
    #[error("invalid threshold `{source_text}`: {reason}")]
    InvalidThreshold {
        /// The text as it appeared in configuration
        source_text: String,
        /// Why it was rejected
        reason: String,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required builder field was not provided
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    /// Internal invariant violation in the metric sink
    #[error("aggregation fault: {0}")]
    AggregationFault(String),

    /// Orchestration failure (task panicked, join error)
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create an invalid schedule error
    pub fn invalid_schedule(msg: impl Into<String>) -> Self {
        Self::InvalidSchedule(msg.into())
    }

    /// Create an invalid threshold error
    pub fn invalid_threshold(source_text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            source_text: source_text.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing configuration error
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Create an aggregation fault
    pub fn aggregation(msg: impl Into<String>) -> Self {
        Self::AggregationFault(msg.into())
    }

    /// Create an orchestration error
    pub fn orchestration(msg: impl Into<String>) -> Self {
        Self::Orchestration(msg.into())
    }

    /// True for errors detected before the run begins
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSchedule(_)
                | Self::InvalidThreshold { .. }
                | Self::Config(_)
                | Self::MissingConfig(_)
        )
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;
