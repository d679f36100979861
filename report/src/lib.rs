//! Report generation for run summaries
//!
//! This crate renders a [`RunSummary`](arrival_bench_core::RunSummary) as:
//!
//! - JSON (the summary itself, pretty-printed)
//! - CSV (one row per scope: totals, streams and tag groups)
//! - A console text table

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod csv_export;
pub mod json_export;
pub mod text;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use arrival_bench_core::RunSummary;
use thiserror::Error;

pub use csv_export::CsvExporter;
pub use json_export::JsonExporter;
pub use text::render_text;

/// Report errors
#[derive(Debug, Error)]
pub enum ReportError {
    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV encoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Report result type
pub type ReportResult<T> = Result<T, ReportError>;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Console table
    #[default]
    Text,
    /// CSV rows
    Csv,
    /// Pretty JSON
    Json,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => f.write_str("text"),
            ReportFormat::Csv => f.write_str("csv"),
            ReportFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

/// Render `summary` in `format`
pub fn render(summary: &RunSummary, format: ReportFormat) -> ReportResult<String> {
    match format {
        ReportFormat::Text => Ok(render_text(summary)),
        ReportFormat::Csv => CsvExporter::to_string(summary),
        ReportFormat::Json => JsonExporter::to_string(summary),
    }
}

/// Read a summary previously written as JSON
pub fn load_summary(path: impl AsRef<Path>) -> ReportResult<RunSummary> {
    let text = std::fs::read_to_string(path)?;
    Ok(RunSummary::from_json(&text)?)
}
