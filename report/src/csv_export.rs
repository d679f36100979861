//! CSV export functionality

use std::fs::File;
use std::io::Write;
use std::path::Path;

use arrival_bench_core::{RunSummary, TagSet, WindowSummary};
use csv::Writer;

use crate::ReportResult;

const METRIC_HEADERS: [&str; 15] = [
    "scope",
    "name",
    "tags",
    "count",
    "errors",
    "error_rate",
    "dropped",
    "min_ms",
    "mean_ms",
    "p50_ms",
    "p90_ms",
    "p95_ms",
    "p99_ms",
    "max_ms",
    "stddev_ms",
];

const THRESHOLD_HEADERS: [&str; 7] = [
    "metric",
    "threshold",
    "verdict",
    "value",
    "abort_on_fail",
    "delay_abort_eval",
    "triggered_abort",
];

/// Writes summary tables as CSV
pub struct CsvExporter;

impl CsvExporter {
    /// Export the metric rows to a CSV file
    pub fn export(summary: &RunSummary, path: impl AsRef<Path>) -> ReportResult<()> {
        Self::write_metrics(summary, File::create(path)?)
    }

    /// Export the threshold rows to a CSV file
    pub fn export_thresholds(summary: &RunSummary, path: impl AsRef<Path>) -> ReportResult<()> {
        Self::write_thresholds(summary, File::create(path)?)
    }

    /// Render the metric rows as a string
    pub fn to_string(summary: &RunSummary) -> ReportResult<String> {
        let mut buf = Vec::new();
        Self::write_metrics(summary, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// One row for the totals, each stream and each tag group
    pub fn write_metrics<W: Write>(summary: &RunSummary, writer: W) -> ReportResult<()> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(METRIC_HEADERS)?;

        wtr.write_record(metric_row("total", &summary.name, &TagSet::new(), &summary.totals))?;
        for stream in &summary.streams {
            wtr.write_record(metric_row("stream", &stream.name, &stream.tags, &stream.metrics))?;
        }
        for group in &summary.groups {
            let name = group.tags.get("scenario").unwrap_or_default();
            wtr.write_record(metric_row("group", name, &group.tags, &group.metrics))?;
        }

        wtr.flush()?;
        Ok(())
    }

    /// One row per threshold
    pub fn write_thresholds<W: Write>(summary: &RunSummary, writer: W) -> ReportResult<()> {
        let mut wtr = Writer::from_writer(writer);
        wtr.write_record(THRESHOLD_HEADERS)?;

        for report in &summary.thresholds {
            wtr.write_record([
                report.metric.clone(),
                report.threshold.clone(),
                format!("{:?}", report.verdict).to_lowercase(),
                report.value.map(|v| format!("{v:.4}")).unwrap_or_default(),
                report.abort_on_fail.to_string(),
                humantime::format_duration(report.delay_abort_eval).to_string(),
                report.triggered_abort.to_string(),
            ])?;
        }

        wtr.flush()?;
        Ok(())
    }
}

fn metric_row(scope: &str, name: &str, tags: &TagSet, metrics: &WindowSummary) -> Vec<String> {
    let latency = &metrics.latency;
    vec![
        scope.to_string(),
        name.to_string(),
        tags.to_string(),
        metrics.count.to_string(),
        metrics.errors.to_string(),
        format!("{:.4}", metrics.error_rate),
        metrics.dropped.to_string(),
        format!("{:.2}", latency.min),
        format!("{:.2}", latency.mean),
        format!("{:.2}", latency.p50),
        format!("{:.2}", latency.p90),
        format!("{:.2}", latency.p95),
        format!("{:.2}", latency.p99),
        format!("{:.2}", latency.max),
        format!("{:.2}", latency.stddev),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_metric_rows() {
        let text = CsvExporter::to_string(&fixtures::summary()).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());

        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), METRIC_HEADERS.len());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "total");
        assert_eq!(&rows[0][3], "1000");
        assert_eq!(&rows[0][5], "0.0200");
        assert_eq!(&rows[1][0], "stream");
        assert_eq!(&rows[1][2], "{endpoint:telemetry_post,scenario:writes}");
        assert_eq!(&rows[2][1], "writes");
        assert_eq!(&rows[2][11], "55.00");
    }

    #[test]
    fn test_threshold_rows_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        CsvExporter::export_thresholds(&fixtures::summary(), file.path()).unwrap();

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "fail");
        assert_eq!(&rows[0][5], "10s");
        assert_eq!(&rows[0][6], "true");
        assert_eq!(&rows[1][5], "0s");
    }
}
