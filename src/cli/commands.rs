//! Command implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrival_bench_core::{arrivals_due, OrchestratorBuilder, RunConfig};
use arrival_bench_http::{DeviceRegistry, HttpConfig, TelemetryExecutor};
use arrival_bench_report::{load_summary, render, render_text, CsvExporter, JsonExporter};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{Cli, Commands, RunArgs};

/// Run the selected command, returning the process exit code
pub fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the async runtime")?;
            runtime.block_on(run(args))
        }
        Commands::Validate { config, seed } => validate(&config, seed),
        Commands::Report { input, format } => {
            let summary = load_summary(&input)
                .with_context(|| format!("failed to read summary {}", input.display()))?;
            print!("{}", render(&summary, format.into())?);
            Ok(summary.exit_code())
        }
    }
}

async fn run(args: RunArgs) -> Result<i32> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("invalid configuration {}", args.config.display()))?;

    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(solution) = &args.solution_id {
        config.tags.insert("solution", solution.as_str());
    }
    for (key, value) in &args.tags {
        config.tags.insert(key.as_str(), value.as_str());
    }

    let devices = match &args.devices {
        Some(path) => DeviceRegistry::from_path(path)?,
        None => DeviceRegistry::default(),
    };
    let http = HttpConfig::for_workers(config.total_max_workers());
    let executor = TelemetryExecutor::new(args.base_url.as_str(), &http, devices)
        .context("failed to build the HTTP client")?;

    tracing::info!(
        base_url = executor.base_url(),
        devices = executor.devices().len(),
        "Target configured"
    );

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .executor(Arc::new(executor))
        .build()?;
    let summary = orchestrator.run_with_signal_handling().await?;

    if let Some(path) = &args.summary_json {
        JsonExporter::export(&summary, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Summary written");
    }
    if let Some(path) = &args.summary_csv {
        CsvExporter::export(&summary, path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Summary written");
    }
    if !args.quiet {
        print!("{}", render_text(&summary));
    }

    Ok(summary.exit_code())
}

fn validate(path: &Path, seed: Option<u64>) -> Result<i32> {
    let mut config = RunConfig::load(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    if let Some(seed) = seed {
        config.seed = Some(seed);
    }
    let engine = arrival_bench_core::ThresholdEngine::from_config(&config.thresholds)?;

    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or_default());
    println!("{}: {} stream(s), {} threshold(s)", config.name, config.streams.len(), engine.len());
    if let Some(note) = unseeded_preview_note(&config) {
        println!("  note: {note}");
    }
    for stream in &config.streams {
        let schedule = stream.schedule(&mut rng)?.compile()?;
        let total = Duration::from_secs_f64(schedule.total_duration().as_secs_f64().round());
        println!(
            "  {:<30} {:>6} stage(s) {:>10} {:>10} arrivals  peak {:.1}/s  workers {}..{}",
            stream.name,
            schedule.stage_count(),
            humantime::format_duration(total).to_string(),
            arrivals_due(schedule.total_expected()),
            schedule.peak_rate(),
            stream.pool_sizing().pre_allocated,
            stream.pool_sizing().max_workers,
        );
    }
    for spec in engine.specs() {
        println!(
            "  threshold {} {}{}",
            spec.selector_text,
            spec.expression_text,
            if spec.abort_on_fail { "  (abort)" } else { "" }
        );
    }
    Ok(0)
}

/// Warning for random stages previewed without a seed
///
/// A run without a seed draws a fresh one, so its stages differ from the
/// seed-0 preview.
fn unseeded_preview_note(config: &RunConfig) -> Option<String> {
    if config.seed.is_some() {
        return None;
    }
    let streams: Vec<&str> = config
        .streams
        .iter()
        .filter(|s| s.random_stages.is_some())
        .map(|s| s.name.as_str())
        .collect();
    if streams.is_empty() {
        return None;
    }
    Some(format!(
        "random stages of {} previewed with seed 0; an unseeded run draws different stages (set `seed` or pass --seed)",
        streams.join(", ")
    ))
}
