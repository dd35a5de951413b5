// Numan Thabit 2025
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use humantime::format_duration;
use load_sweep::{
    config::{RunArgs, SweepConfig},
    report::{log_results, SweepReport},
    store::{self, ResultsStore},
    LoadLevelRunner, ResourceSampler, SweepController,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Load-level sweep harness: drives a load generator and records server resource cost",
    rename_all = "kebab-case"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workloads level by level, checkpointing after each level.
    Run(RunArgs),
    /// Print a persisted results file.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Results file to read.
    #[arg(long, value_name = "PATH", conflicts_with = "workload")]
    file: Option<PathBuf>,

    /// Workload whose `results_<name>.json` should be read.
    #[arg(long)]
    workload: Option<String>,

    /// Directory holding the results files.
    #[arg(long, value_name = "DIR", default_value = ".")]
    results_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Show(args) => show(args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = SweepConfig::from_args(&args)?;

    if config.dry_run {
        log_dry_run(&config);
        return Ok(());
    }

    if config.runner.server_pid.is_none() {
        warn!("no server pid configured; cpu utilization will be recorded as unavailable");
    }

    let runner = LoadLevelRunner::new(
        config.runner.clone(),
        ResourceSampler::new(config.sampler.clone()),
    );
    let store = ResultsStore::new(&config.results_dir);
    let mut sweep = SweepController::new(runner, store, config.cooldown);

    for plan in &config.workloads {
        let outcome = if config.resume {
            sweep.resume(plan).await
        } else {
            sweep.run(plan).await
        };
        let run = outcome.with_context(|| {
            format!(
                "workload '{}' aborted; completed levels remain in {}",
                plan.name,
                sweep.store().path_for(&plan.name).display()
            )
        })?;

        if let Some(report) = SweepReport::from_results(run.results()) {
            report.log(run.workload());
        }
    }

    info!(workloads = config.workloads.len(), "all workloads complete");
    Ok(())
}

fn show(args: ShowArgs) -> Result<()> {
    let path = match (args.file, args.workload) {
        (Some(path), _) => path,
        (None, Some(workload)) => ResultsStore::new(&args.results_dir).path_for(&workload),
        (None, None) => bail!("pass --file or --workload"),
    };

    let results = store::load_file(&path)
        .with_context(|| format!("failed to load results from {}", path.display()))?;
    info!(path = %path.display(), entries = results.len(), "loaded results");

    log_results(&results);
    match SweepReport::from_results(&results) {
        Some(report) => {
            let workload = results
                .first()
                .map(|r| r.workload.as_str())
                .unwrap_or_default();
            report.log(workload);
        }
        None => warn!(path = %path.display(), "results file is empty"),
    }
    Ok(())
}

fn log_dry_run(config: &SweepConfig) {
    for plan in &config.workloads {
        info!(
            workload = %plan.name,
            mode = plan.mode,
            levels = plan.levels.len(),
            level_duration = %format_duration(plan.level_duration),
            estimated_minimum = %format_duration(config.estimated_wall_clock(plan)),
            results = %ResultsStore::new(&config.results_dir).path_for(&plan.name).display(),
            resume = config.resume,
            "dry run: would run workload"
        );
        for (idx, level) in plan.levels.iter().enumerate() {
            info!(
                level = idx + 1,
                command = %format!(
                    "{} {} {} {} {}",
                    config.runner.generator_bin.display(),
                    config.runner.target_url,
                    level.threads,
                    level.requests_per_thread,
                    plan.mode
                ),
                "dry run: would execute generator"
            );
        }
    }
}
