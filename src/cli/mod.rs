//! CLI argument parsing and command dispatch

mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub use commands::dispatch;

#[derive(Parser)]
#[command(name = "arrival-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load test
    Run(RunArgs),
    /// Generate a report from a JSON summary
    Report {
        /// Path to summary file
        #[arg(short, long)]
        input: PathBuf,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Seed for previewing random stages, as `run --seed`
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Base URL of the service under test
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Solution variant, recorded as the `solution` tag
    #[arg(long, env = "SOLUTION_ID")]
    pub solution_id: Option<String>,

    /// CSV file of `device_uuid,api_key` rows
    #[arg(long, env = "DEVICES_CSV")]
    pub devices: Option<PathBuf>,

    /// Extra global tag, `key=value` (repeatable)
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Seed for worker random sources and random stages
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the summary as JSON
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Write the summary metrics as CSV
    #[arg(long)]
    pub summary_csv: Option<PathBuf>,

    /// Do not print the summary table
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Text,
    Csv,
    Json,
}

impl From<FormatArg> for arrival_bench_report::ReportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => Self::Text,
            FormatArg::Csv => Self::Csv,
            FormatArg::Json => Self::Json,
        }
    }
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("tag '{raw}' is not key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("tag '{raw}' has an empty key"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
