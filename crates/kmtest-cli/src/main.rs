//! kmtest - kernel-module test runner
//!
//! The `run-tests` command discovers test projects under a base directory and,
//! for each one, cross-compiles it, links it into a kernel module and runs
//! its tests against that module.
//!
//! Every flag is optional. With none, the current directory is scanned using
//! `kmtest.json` if present, otherwise the modern pipeline preset.
//!
//! Exit status is 0 when every project passes, otherwise the exit code of the
//! first failing child process.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use kmtest_ci::{
    BuildProfile, FailurePolicy, Generation, HarnessConfig, Pipeline, PipelineResult,
    ProcessRunner, TargetSpec,
};

#[derive(Parser, Debug)]
#[command(name = "run-tests")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cross-compile, link and run kernel-module test projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Directory containing the test projects
    #[arg(long, env = "KMTEST_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Config file (default: kmtest.json in the base directory, if present)
    #[arg(long, env = "KMTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Preset used when no config file is found (legacy, modern)
    #[arg(long, default_value = "modern")]
    generation: Generation,

    /// Target name or path to a target-description file
    #[arg(long)]
    target: Option<String>,

    /// Build the archive with the release profile
    #[arg(long)]
    release: bool,

    /// Keep going after a project fails
    #[arg(long)]
    continue_on_failure: bool,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, env = "KMTEST_STAGE_TIMEOUT")]
    timeout: Option<u64>,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not log command lines before running them
    #[arg(long)]
    quiet_commands: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    kmtest_ci::init_tracing(cli.json, level);

    let code = run(&cli).await?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

/// Resolve configuration, run the pipeline and report. Returns the exit code.
async fn run(cli: &Cli) -> Result<i32> {
    let base = std::fs::canonicalize(&cli.base_dir)
        .with_context(|| format!("Base directory {:?} not found", cli.base_dir))?;

    let mut config = load_config(cli, &base)?;
    apply_overrides(cli, &mut config);

    let runner = Arc::new(
        ProcessRunner::new()
            .with_timeout(config.stage_timeout())
            .with_echo(config.echo_commands),
    );
    let pipeline =
        Pipeline::new(&base, &config, runner).context("Invalid harness configuration")?;

    info!(base = %base.display(), execution = ?config.execution, "running kernel-module tests");
    let result = pipeline.run().await.context("Test pipeline failed to run")?;

    print_summary(&result);
    if let Some(path) = &cli.report {
        result
            .write_report(path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        println!("Report written to {}", path.display());
    }

    Ok(result.exit_code())
}

fn load_config(cli: &Cli, base: &Path) -> Result<HarnessConfig> {
    match &cli.config {
        Some(path) => HarnessConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path)),
        None => HarnessConfig::discover(base, cli.generation)
            .context("Failed to load kmtest.json"),
    }
}

fn apply_overrides(cli: &Cli, config: &mut HarnessConfig) {
    if let Some(target) = &cli.target {
        config.target = TargetSpec::parse(target);
    }
    if cli.release {
        config.profile = BuildProfile::Release;
    }
    if cli.continue_on_failure {
        config.failure_policy = FailurePolicy::ContinueOnFailure;
    }
    if let Some(secs) = cli.timeout {
        config.stage_timeout_secs = secs;
    }
    if cli.quiet_commands {
        config.echo_commands = false;
    }
}

fn print_summary(result: &PipelineResult) {
    println!();
    println!("Run ID: {}", result.run_id);
    println!("Status: {}", if result.success() { "✓ PASSED" } else { "✗ FAILED" });
    println!("Duration: {}ms", result.duration_ms);
    println!();

    if result.projects.is_empty() {
        println!("No test projects found in {}", result.base_dir.display());
        return;
    }

    for outcome in &result.projects {
        match &outcome.failure {
            None => println!("  ✓ {}", outcome.project),
            Some(failure) => println!("  ✗ {} ({})", outcome.project, failure),
        }
    }

    println!();
    println!(
        "Summary: {}/{} projects passed{}",
        result.passed_count(),
        result.projects.len(),
        if result.aborted { " (run aborted)" } else { "" }
    );
}
