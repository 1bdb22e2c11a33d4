//! compat-soak command-line interface
//!
//! ## Commands
//!
//! - `run`: start the shared server and run one soak scenario
//! - `plan`: print the default workload plan as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use soak_env::{VersionTag, WaitPolicy};
use soak_harness::{builtin_resolver, HarnessConfig, SoakHarness, SoakReport, WorkloadPlan};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "soak")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-version interoperability soak harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the shared server and run one soak scenario
    Run(RunArgs),

    /// Print the default workload plan as JSON
    Plan,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Workload plan file (JSON); the builtin three-version plan if omitted
    #[arg(long, env = "SOAK_PLAN")]
    plan: Option<PathBuf>,

    /// Only run these versions from the plan (comma-separated)
    #[arg(long, env = "SOAK_VERSIONS", value_delimiter = ',')]
    versions: Vec<String>,

    /// Server working directory (cleared before start)
    #[arg(long, env = "SOAK_SERVER_DIR")]
    server_dir: Option<PathBuf>,

    /// Version hosting the shared server
    #[arg(long, env = "SOAK_SERVER_VERSION", default_value = "current")]
    server_version: String,

    /// Retain broker data in a journal under the server directory
    #[arg(long, env = "SOAK_PERSISTENT")]
    persistent: bool,

    /// Producer completion timeout (milliseconds)
    #[arg(long, env = "SOAK_PRODUCER_TIMEOUT_MS", default_value_t = 300_000)]
    producer_timeout_ms: u64,

    /// Consumer drain and server readiness timeout (milliseconds)
    #[arg(long, env = "SOAK_DRAIN_TIMEOUT_MS", default_value_t = 30_000)]
    drain_timeout_ms: u64,

    /// Poll interval for every bounded wait (milliseconds)
    #[arg(long, env = "SOAK_POLL_INTERVAL_MS")]
    poll_interval_ms: Option<u64>,

    /// Worker threads per version environment
    #[arg(long, env = "SOAK_WORKER_THREADS", default_value_t = 4)]
    worker_threads: usize,

    /// Write the run report (JSON) to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    soak_harness::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Plan => cmd_plan(),
    }
}

fn cmd_plan() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&WorkloadPlan::default())?);
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let plan = load_plan(args.plan.as_deref(), &args.versions)?;
    let config = harness_config(&args)?;

    let mut harness = SoakHarness::setup(config, Arc::new(builtin_resolver()), &plan)
        .await
        .context("Soak setup failed")?;

    let outcome = harness.execute(&plan).await;
    harness.teardown().await;

    let report = outcome.context("Soak scenario failed")?;
    print_summary(&report);
    if let Some(path) = &args.report {
        write_report(path, &report)?;
    }

    report.into_result()?;
    info!("soak passed");
    Ok(())
}

fn load_plan(path: Option<&Path>, versions: &[String]) -> Result<WorkloadPlan> {
    let plan = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read plan {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse plan {}", path.display()))?
        }
        None => WorkloadPlan::default(),
    };

    if versions.is_empty() {
        return Ok(plan);
    }
    let tags = versions
        .iter()
        .map(|v| VersionTag::new(v.trim()))
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --versions")?;
    let restricted = plan.restricted_to(&tags);
    if restricted.versions.is_empty() {
        bail!("None of the requested versions are in the plan");
    }
    Ok(restricted)
}

fn harness_config(args: &RunArgs) -> Result<HarnessConfig> {
    let defaults = HarnessConfig::default();
    let poll = |preset: WaitPolicy| args.poll_interval_ms.unwrap_or(preset.poll_interval_ms);
    let producer_wait = WaitPolicy::new(
        Duration::from_millis(args.producer_timeout_ms),
        Duration::from_millis(poll(WaitPolicy::producer())),
    );
    let drain_wait = WaitPolicy::new(
        Duration::from_millis(args.drain_timeout_ms),
        Duration::from_millis(poll(WaitPolicy::drain())),
    );

    Ok(HarnessConfig {
        server_dir: args.server_dir.clone().unwrap_or(defaults.server_dir.clone()),
        server_version: VersionTag::new(&args.server_version)
            .context("Invalid --server-version")?,
        persistent: args.persistent,
        worker_threads: args.worker_threads,
        producer_wait,
        drain_wait,
        readiness_wait: drain_wait,
        ..defaults
    })
}

fn print_summary(report: &SoakReport) {
    println!(
        "run {}  total/queue={}  listeners={}  duration={}ms",
        report.run_id, report.total_messages_per_queue, report.multiply_factor, report.duration_ms
    );
    for outcome in &report.outcomes {
        println!(
            "  {:<16} {:<9} units={:<3} settled={} after {}ms",
            outcome.version.as_str(),
            outcome.phase.to_string(),
            outcome.units,
            outcome.settled_at,
            outcome.wait_ms
        );
    }
    for tally in &report.tallies {
        println!(
            "  {:<16} {:<15} {}",
            tally.version.as_str(),
            tally.phase.tally_name(),
            tally.errors
        );
    }
    println!("{}", if report.passed { "PASSED" } else { "FAILED" });
}

fn write_report(path: &Path, report: &SoakReport) -> Result<()> {
    let json = report.to_json_pretty()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    info!(path = %path.display(), "report written");
    Ok(())
}
