//! JSON export functionality

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use arrival_bench_core::RunSummary;

use crate::ReportResult;

/// Writes the summary as pretty JSON
pub struct JsonExporter;

impl JsonExporter {
    /// Export the summary to a JSON file
    pub fn export(summary: &RunSummary, path: impl AsRef<Path>) -> ReportResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, summary)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Render the summary as a JSON string
    pub fn to_string(summary: &RunSummary) -> ReportResult<String> {
        Ok(summary.to_json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_json_keeps_threshold_verdicts() {
        let json = JsonExporter::to_string(&fixtures::summary()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["status"], "aborted");
        assert_eq!(value["abort"]["kind"], "threshold");
        assert_eq!(value["abort"]["elapsed"], "42s");
        assert_eq!(value["thresholds"][0]["verdict"], "fail");
        assert_eq!(value["thresholds"][0]["delay_abort_eval"], "10s");
        assert_eq!(value["streams"][0]["clock"]["dropped"], 3);
    }
}
