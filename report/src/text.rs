//! Console summary table

use std::fmt::Write;
use std::time::Duration;

use arrival_bench_core::{RunStatus, RunSummary, Verdict, WindowSummary};

/// Render a human-readable summary
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write_summary(&mut out, summary);
    out
}

fn write_summary(out: &mut String, summary: &RunSummary) -> std::fmt::Result {
    let status = match summary.status {
        RunStatus::Completed => "completed",
        RunStatus::Aborted => "aborted",
    };
    let duration = Duration::from_millis((summary.duration_secs * 1000.0).round() as u64);

    writeln!(out, "run: {}  status: {}  seed: {}", summary.name, status, summary.seed)?;
    writeln!(
        out,
        "duration: {}  started: {}",
        humantime::format_duration(duration),
        summary.started_at.to_rfc3339()
    )?;
    if let Some(cause) = &summary.abort {
        writeln!(out, "abort: {cause}")?;
    }

    let clock = summary.clock_totals();
    let pool = summary.pool_totals();
    writeln!(
        out,
        "arrivals: {} issued, {} dispatched, {} dropped (schedule {})",
        clock.issued, clock.dispatched, clock.dropped, clock.expected_total
    )?;
    writeln!(
        out,
        "workers: {} spawned, {} peak busy, {} interrupted",
        pool.spawned, pool.peak_busy, pool.interrupted
    )?;

    writeln!(out)?;
    writeln!(
        out,
        "{:<40} {:>9} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9}",
        "scope", "reqs", "fail%", "dropped", "avg ms", "p90 ms", "p95 ms", "p99 ms"
    )?;
    metric_line(out, "total", &summary.totals)?;
    for stream in &summary.streams {
        metric_line(out, &format!("  {}", stream.name), &stream.metrics)?;
    }
    for group in &summary.groups {
        metric_line(out, &format!("  {}", group.tags), &group.metrics)?;
    }

    if !summary.thresholds.is_empty() {
        writeln!(out)?;
        writeln!(out, "thresholds:")?;
        for report in &summary.thresholds {
            let mark = match report.verdict {
                Verdict::Pass => "ok  ",
                Verdict::Fail => "FAIL",
            };
            let value = report
                .value
                .map(|v| format!("{v:.3}"))
                .unwrap_or_else(|| "-".to_string());
            let abort = if report.triggered_abort { "  (aborted run)" } else { "" };
            writeln!(
                out,
                "  {mark} {} {}  value={value}{abort}",
                report.metric, report.threshold
            )?;
        }
    }

    writeln!(out)?;
    writeln!(out, "exit code: {}", summary.exit_code())
}

fn metric_line(out: &mut String, scope: &str, metrics: &WindowSummary) -> std::fmt::Result {
    writeln!(
        out,
        "{:<40} {:>9} {:>7.2}% {:>8} {:>9.2} {:>9.2} {:>9.2} {:>9.2}",
        truncate(scope, 40),
        metrics.count,
        metrics.error_rate * 100.0,
        metrics.dropped,
        metrics.latency.mean,
        metrics.latency.p90,
        metrics.latency.p95,
        metrics.latency.p99
    )
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width - 1).collect();
        format!("{kept}~")
    }
}
