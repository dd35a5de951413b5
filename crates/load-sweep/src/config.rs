// Numan Thabit 2025
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use humantime::format_duration;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use tracing::info;

use crate::{
    model::LoadLevel,
    runner::RunnerConfig,
    sampler::{SamplerConfig, DEFAULT_IO_TIMEOUT_SLACK, DEFAULT_SAMPLE_WINDOW},
    store::ResultsStore,
    sweep::WorkloadPlan,
};

const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_GENERATOR: &str = "./loadgen";
const DEFAULT_RESULTS_DIR: &str = ".";
const DEFAULT_IOSTAT: &str = "iostat";
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);
const DEFAULT_LEVEL_DURATION: Duration = Duration::from_secs(300);
const DEFAULT_ADHOC_NAME: &str = "adhoc";
const DEFAULT_ADHOC_MODE: u8 = 3;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Path to a TOML sweep configuration.
    #[arg(long, value_name = "PATH", env = "LOAD_SWEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Only run the named workloads from the configuration (repeatable).
    #[arg(long = "workload", value_name = "NAME", action = clap::ArgAction::Append)]
    pub workloads: Vec<String>,

    /// Base URL of the server under test, passed to the generator.
    #[arg(long)]
    pub target: Option<String>,

    /// Load generator executable.
    #[arg(long, value_name = "PATH")]
    pub generator: Option<PathBuf>,

    /// PID of the server under test, for CPU sampling.
    #[arg(long)]
    pub server_pid: Option<u32>,

    /// Server log to mine for `latency=<n> us` lines.
    #[arg(long, value_name = "PATH")]
    pub server_log: Option<PathBuf>,

    /// Directory receiving `results_<workload>.json` checkpoints.
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    /// Pause between load levels.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub cooldown: Option<Duration>,

    /// Window over which CPU and I/O utilization are averaged.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub sample_window: Option<Duration>,

    /// I/O statistics tool invoked as `<tool> -x <secs> 2`.
    #[arg(long, value_name = "PATH")]
    pub iostat: Option<PathBuf>,

    /// Skip I/O sampling entirely.
    #[arg(long, default_value_t = false)]
    pub no_io: bool,

    /// Ad-hoc workload level as THREADSxREQUESTS (repeatable). Replaces the
    /// workloads from the configuration file.
    #[arg(long = "level", value_name = "THREADSxREQUESTS", value_parser = parse_level, action = clap::ArgAction::Append)]
    pub levels: Vec<LoadLevel>,

    /// Name of the ad-hoc workload.
    #[arg(long)]
    pub name: Option<String>,

    /// Mode of the ad-hoc workload.
    #[arg(long)]
    pub mode: Option<u8>,

    /// Nominal duration of each ad-hoc level.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub level_duration: Option<Duration>,

    /// Continue from existing checkpoints instead of overwriting them.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Print the plan without running anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

pub fn parse_level(raw: &str) -> Result<LoadLevel> {
    let (threads, requests) = raw
        .split_once(|ch: char| ch == 'x' || ch == 'X')
        .ok_or_else(|| anyhow!("expected THREADSxREQUESTS, got '{raw}'"))?;
    let threads = threads
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid thread count in '{raw}'"))?;
    let requests = requests
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid request count in '{raw}'"))?;
    Ok(LoadLevel::new(threads, requests))
}

#[serde_as]
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    target_url: Option<String>,
    generator: Option<PathBuf>,
    server_pid: Option<u32>,
    server_log: Option<PathBuf>,
    results_dir: Option<PathBuf>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    cooldown: Option<humantime::Duration>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    sample_window: Option<humantime::Duration>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    io_timeout_slack: Option<humantime::Duration>,
    /// Empty string disables I/O sampling.
    iostat: Option<String>,
    #[serde(default)]
    workloads: Vec<FileWorkload>,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileWorkload {
    name: String,
    mode: u8,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    level_duration: Option<humantime::Duration>,
    levels: Vec<(u32, u32)>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse {} as TOML", path.display()))
    }
}

/// Fully resolved settings for a `run`.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub runner: RunnerConfig,
    pub sampler: SamplerConfig,
    pub results_dir: PathBuf,
    pub cooldown: Duration,
    pub workloads: Vec<WorkloadPlan>,
    pub resume: bool,
    pub dry_run: bool,
    pub config_path: Option<PathBuf>,
}

impl SweepConfig {
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        let file_cfg = match &args.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };
        let config = merge(args, file_cfg.unwrap_or_default())?;
        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workloads.is_empty() {
            bail!("no workloads configured; pass --config or at least one --level");
        }
        if self.sampler.window.is_zero() {
            bail!("sample_window must be greater than 0");
        }
        if self.runner.target_url.trim().is_empty() {
            bail!("target url must not be empty");
        }
        for plan in &self.workloads {
            if plan.name.trim().is_empty() {
                bail!("workload names must not be empty");
            }
            if plan.levels.is_empty() {
                bail!("workload '{}' has no load levels", plan.name);
            }
            for (idx, level) in plan.levels.iter().enumerate() {
                if level.threads == 0 || level.requests_per_thread == 0 {
                    bail!(
                        "workload '{}' level {} ({}) must have positive threads and requests",
                        plan.name,
                        idx + 1,
                        level
                    );
                }
            }
        }
        let store = ResultsStore::new(&self.results_dir);
        let mut files: HashMap<PathBuf, &str> = HashMap::new();
        for plan in &self.workloads {
            let path = store.path_for(&plan.name);
            if let Some(other) = files.insert(path.clone(), plan.name.as_str()) {
                if other == plan.name {
                    bail!("workload '{}' is defined more than once", plan.name);
                }
                bail!(
                    "workloads '{}' and '{}' would share results file {}",
                    other,
                    plan.name,
                    path.display()
                );
            }
        }
        Ok(())
    }

    /// Lower bound on a workload's wall-clock time: nominal level time,
    /// sampling after every level, and the cooldowns in between.
    pub fn estimated_wall_clock(&self, plan: &WorkloadPlan) -> Duration {
        let levels = u32::try_from(plan.levels.len()).unwrap_or(u32::MAX);
        let mut per_level = plan.level_duration;
        if self.runner.server_pid.is_some() {
            per_level = per_level.saturating_add(self.sampler.window);
        }
        if self.sampler.iostat_bin.is_some() {
            per_level = per_level.saturating_add(self.sampler.window);
        }
        let running = per_level.checked_mul(levels).unwrap_or(Duration::MAX);
        let cooling = self
            .cooldown
            .checked_mul(levels.saturating_sub(1))
            .unwrap_or(Duration::MAX);
        running.saturating_add(cooling)
    }

    fn log_summary(&self) {
        info!(
            config = ?self.config_path,
            target = %self.runner.target_url,
            generator = %self.runner.generator_bin.display(),
            server_pid = ?self.runner.server_pid,
            server_log = ?self.runner.server_log,
            results_dir = %self.results_dir.display(),
            cooldown = %format_duration(self.cooldown),
            sample_window = %format_duration(self.sampler.window),
            iostat = ?self.sampler.iostat_bin,
            workloads = self.workloads.len(),
            resume = self.resume,
            "load-sweep configuration"
        );
    }
}

fn merge(args: &RunArgs, file_cfg: FileConfig) -> Result<SweepConfig> {
    let target_url = pick(
        args.target.clone(),
        file_cfg.target_url,
        DEFAULT_TARGET_URL.to_string(),
    );
    let generator_bin = pick(
        args.generator.clone(),
        file_cfg.generator,
        PathBuf::from(DEFAULT_GENERATOR),
    );
    let server_pid = args.server_pid.or(file_cfg.server_pid);
    let server_log = args.server_log.clone().or(file_cfg.server_log);
    let results_dir = pick(
        args.results_dir.clone(),
        file_cfg.results_dir,
        PathBuf::from(DEFAULT_RESULTS_DIR),
    );
    let cooldown = pick(
        args.cooldown,
        file_cfg.cooldown.map(Into::into),
        DEFAULT_COOLDOWN,
    );
    let window = pick(
        args.sample_window,
        file_cfg.sample_window.map(Into::into),
        DEFAULT_SAMPLE_WINDOW,
    );
    let io_timeout_slack = file_cfg
        .io_timeout_slack
        .map(Into::into)
        .unwrap_or(DEFAULT_IO_TIMEOUT_SLACK);

    let iostat_bin = if args.no_io {
        None
    } else {
        match (args.iostat.clone(), file_cfg.iostat) {
            (Some(cli), _) => Some(cli),
            (None, Some(file)) if file.trim().is_empty() => None,
            (None, Some(file)) => Some(PathBuf::from(file)),
            (None, None) => Some(PathBuf::from(DEFAULT_IOSTAT)),
        }
    };

    let mut workloads = if args.levels.is_empty() {
        file_cfg
            .workloads
            .into_iter()
            .map(|workload| WorkloadPlan {
                name: workload.name,
                mode: workload.mode,
                levels: workload
                    .levels
                    .into_iter()
                    .map(|(threads, requests)| LoadLevel::new(threads, requests))
                    .collect(),
                level_duration: workload
                    .level_duration
                    .map(Into::into)
                    .unwrap_or(DEFAULT_LEVEL_DURATION),
            })
            .collect()
    } else {
        vec![WorkloadPlan {
            name: args
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_ADHOC_NAME.to_string()),
            mode: args.mode.unwrap_or(DEFAULT_ADHOC_MODE),
            levels: args.levels.clone(),
            level_duration: args.level_duration.unwrap_or(DEFAULT_LEVEL_DURATION),
        }]
    };

    if !args.workloads.is_empty() {
        if let Some(missing) = args
            .workloads
            .iter()
            .find(|name| !workloads.iter().any(|plan| &plan.name == *name))
        {
            bail!("workload '{missing}' is not defined");
        }
        workloads.retain(|plan| args.workloads.contains(&plan.name));
    }

    Ok(SweepConfig {
        runner: RunnerConfig {
            generator_bin,
            target_url,
            server_pid,
            server_log,
        },
        sampler: SamplerConfig {
            window,
            iostat_bin,
            io_timeout_slack,
        },
        results_dir,
        cooldown,
        workloads,
        resume: args.resume,
        dry_run: args.dry_run,
        config_path: args.config.clone(),
    })
}

fn pick<T>(cli: Option<T>, file: Option<T>, default: T) -> T {
    cli.or(file).unwrap_or(default)
}
