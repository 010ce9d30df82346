//! paramsweep - run a tool over every point of its parameter space
//!
//! ## Commands
//!
//! - `validate`: Load a tool definition and report its sweep
//! - `run`: Execute the sweep on ephemeral compute
//! - `report`: Print a summary written by `run --report`

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use paramsweep_core::{load_tool_spec, Stage, ToolSpec, LOCAL_PROVIDER};
use paramsweep_run::{
    CancelHandle, ComputeProvisioner, LocalConfig, LocalProvisioner, RetryPolicy, RunnerConfig,
    SweepRunner, SweepSummary,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};

/// `--max-wait` value substituted for negative inputs.
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser)]
#[command(name = "paramsweep")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a tool across its parameter space on ephemeral compute", long_about = None)]
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
    /// Load a tool definition, compile its templates and size its sweep
    Validate {
        /// Tool definition (.yaml, .yml or .json)
        config: PathBuf,
    },

    /// Execute every run of the sweep
    Run(RunArgs),

    /// Print a sweep summary written by `run --report`
    Report {
        /// Summary JSON file
        summary: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Tool definition (.yaml, .yml or .json)
    config: PathBuf,

    /// Maximum number of runs holding compute at once
    #[arg(long, env = "PARAMSWEEP_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-stage deadline in seconds (0 = none)
    #[arg(long, env = "PARAMSWEEP_STAGE_TIMEOUT")]
    stage_timeout: Option<u64>,

    /// Render every run and print its scripts without provisioning anything
    #[arg(long)]
    dry_run: bool,

    /// Cancel the remaining runs after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Re-run a failed run from scratch up to this many extra times
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Overall deadline in minutes (0 = unlimited, negative = 24 hours)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    max_wait: i64,

    /// Run on this host regardless of the configured compute provider
    #[arg(long)]
    local: bool,

    /// Shell used to interpret scripts on the local provisioner
    #[arg(long, default_value = "bash")]
    shell: PathBuf,

    /// Keep per-run stage logs and artifacts under this directory
    #[arg(long)]
    outputs: Option<PathBuf>,

    /// Write the sweep summary as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    paramsweep_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Run(args) => cmd_run(args).await,
        Commands::Report { summary } => cmd_report(&summary),
    }
}

fn load(path: &Path) -> Result<ToolSpec> {
    load_tool_spec(path).with_context(|| format!("Failed to load tool definition {:?}", path))
}

fn cmd_validate(path: &Path) -> Result<()> {
    let spec = load(path)?;
    print!("{}", describe_spec(&spec));
    Ok(())
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let spec = load(&args.config)?;

    if args.dry_run {
        print!("{}", render_dry_run(&spec)?);
        return Ok(());
    }

    let provisioner = select_provisioner(&spec, &args)?;
    let config = RunnerConfig {
        max_concurrency: args.concurrency.max(1),
        stage_timeout: args
            .stage_timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
        fail_fast: args.fail_fast,
        retry: RetryPolicy::with_retries(args.retries),
        deadline: sweep_deadline(args.max_wait),
    };
    info!(
        tool = %spec.name(),
        runs = spec.sweep().len(),
        concurrency = config.max_concurrency,
        "starting sweep"
    );

    let cancel = CancelHandle::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling sweep");
                cancel.cancel();
            }
        })
    };

    let summary = SweepRunner::new(provisioner, config)
        .run(&spec, cancel.signal())
        .await;
    interrupt.abort();
    let summary = summary.context("Sweep aborted")?;

    print!("{}", render_summary(&summary));

    if let Some(path) = &args.report {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        println!("Report written to {:?}", path);
    }

    if !summary.all_succeeded() {
        anyhow::bail!(
            "{} of {} runs failed",
            summary.counts.failed(),
            summary.counts.total
        );
    }
    Ok(())
}

fn cmd_report(path: &Path) -> Result<()> {
    let summary = SweepSummary::read_json(path)
        .with_context(|| format!("Failed to read sweep summary {:?}", path))?;
    print!("{}", render_summary(&summary));
    Ok(())
}

/// Map `--max-wait` minutes to an overall sweep deadline.
fn sweep_deadline(minutes: i64) -> Option<Duration> {
    match minutes {
        0 => None,
        m if m < 0 => Some(DEFAULT_MAX_WAIT),
        m => Some(Duration::from_secs((m as u64).saturating_mul(60))),
    }
}

fn select_provisioner(spec: &ToolSpec, args: &RunArgs) -> Result<Arc<dyn ComputeProvisioner>> {
    let provider = spec.compute().provider.as_str();
    if provider != LOCAL_PROVIDER && !args.local {
        anyhow::bail!(
            "No built-in provisioner for compute provider '{}'; pass --local to run on this host",
            provider
        );
    }
    if provider != LOCAL_PROVIDER {
        warn!(provider = %provider, "running on this host instead of the configured provider");
    }
    Ok(Arc::new(LocalProvisioner::new(LocalConfig {
        shell: args.shell.clone(),
        output_root: args.outputs.clone(),
    })))
}

fn describe_spec(spec: &ToolSpec) -> String {
    let mut out = String::new();
    out.push_str(&format!("Tool:        {}\n", spec.name()));
    out.push_str(&format!("Compute:     {}\n", spec.compute().provider));
    out.push_str("Parameters:\n");
    if spec.parameters().is_empty() {
        out.push_str("  (none)\n");
    }
    for p in spec.parameters() {
        out.push_str(&format!("  {:<12} {}\n", p.name, p.domain.describe()));
    }
    out.push_str(&format!("Sweep size:  {}\n", spec.sweep().len()));
    out.push_str(&format!("Spec digest: {}\n", spec.digest()));
    out
}

fn render_dry_run(spec: &ToolSpec) -> Result<String> {
    let mut out = String::new();
    for run in spec.rendered_runs() {
        let run = run.context("Failed to render run")?;
        out.push_str(&format!("=== run {}: {}\n", run.index(), run.assignment));
        for stage in Stage::ALL {
            out.push_str(&format!("--- {}\n{}\n", stage, run.script(stage).body));
        }
    }
    Ok(out)
}

fn render_summary(summary: &SweepSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Sweep {} of '{}' (spec {})\n",
        summary.sweep_id,
        summary.tool_name,
        summary.spec_digest.short()
    ));
    for r in &summary.results {
        out.push_str(&format!(
            "  #{:<4} {:<40} {}\n",
            r.index(),
            r.assignment.to_string(),
            r.state
        ));
        if let Some(stage) = r.failed_stage() {
            if let Some(record) = r.stages.iter().find(|s| s.stage == stage) {
                let stderr = record.stderr.trim();
                if !stderr.is_empty() {
                    out.push_str(&format!("        stderr: {}\n", stderr));
                }
            }
        }
        if let Some(error) = &r.error {
            out.push_str(&format!("        error: {}\n", error));
        }
        if let Some(error) = &r.release_error {
            out.push_str(&format!("        release: {}\n", error));
        }
    }

    let counts = &summary.counts;
    let by_stage = counts
        .failed_by_stage
        .iter()
        .map(|(stage, n)| format!("{}: {}", stage, n))
        .collect::<Vec<_>>()
        .join(", ");
    out.push_str(&format!(
        "{} runs: {} succeeded, {} failed{}, {} provision failed, {} cancelled ({} ms)\n",
        counts.total,
        counts.succeeded,
        counts.failed_by_stage.values().sum::<usize>(),
        if by_stage.is_empty() {
            String::new()
        } else {
            format!(" ({})", by_stage)
        },
        counts.provision_failed,
        counts.cancelled,
        summary.duration_ms(),
    ));
    out
}
