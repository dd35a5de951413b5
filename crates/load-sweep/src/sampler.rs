// Numan Thabit 2025
use std::{
    path::PathBuf,
    process::Stdio,
    time::Duration,
};

use humantime::format_duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tokio::{
    process::Command,
    time::{sleep, timeout},
};
use tracing::{debug, warn};

/// Header token that marks the start of an iostat device table.
const IOSTAT_HEADER_TOKEN: &str = "Device";
/// Device rows sit this many lines below their header.
const IOSTAT_ROW_OFFSET: usize = 2;
/// Extended-stats rows carry at least this many columns; `%util` is last.
const IOSTAT_MIN_COLUMNS: usize = 14;

pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_IO_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Best-effort resource readings for one level. `None` means the reading
/// was unavailable, which is different from a measured 0%.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub io_percent: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Window over which CPU and I/O utilization are averaged.
    pub window: Duration,
    /// I/O statistics tool. `None` disables I/O sampling.
    pub iostat_bin: Option<PathBuf>,
    /// Extra time granted to the I/O tool beyond its sampling window.
    pub io_timeout_slack: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_SAMPLE_WINDOW,
            iostat_bin: Some(PathBuf::from("iostat")),
            io_timeout_slack: DEFAULT_IO_TIMEOUT_SLACK,
        }
    }
}

pub struct ResourceSampler {
    config: SamplerConfig,
    system: System,
}

impl ResourceSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self {
            config,
            system: System::new(),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Samples CPU of `pid`, then host I/O, one after the other.
    pub async fn sample(&mut self, pid: Option<u32>) -> ResourceUsage {
        let window = self.config.window;
        let cpu_percent = self.cpu_percent(pid, window).await;
        let io_percent = self.io_percent(window).await;
        ResourceUsage {
            cpu_percent,
            io_percent,
        }
    }

    /// CPU utilization of `pid` averaged over `window`, capped at 100%.
    ///
    /// Blocks for the full window when the process exists. Returns `None`
    /// without waiting when no pid was given or the process is not found.
    pub async fn cpu_percent(&mut self, pid: Option<u32>, window: Duration) -> Option<f64> {
        let pid = Pid::from_u32(pid?);
        let refresh = ProcessRefreshKind::new().with_cpu();

        self.system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        if self.system.process(pid).is_none() {
            warn!(%pid, "server process not found; cpu utilization unavailable");
            return None;
        }

        sleep(window.max(MINIMUM_CPU_UPDATE_INTERVAL)).await;

        self.system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        match self.system.process(pid) {
            Some(process) => {
                let usage = f64::from(process.cpu_usage());
                debug!(%pid, usage, window = %format_duration(window), "cpu sample");
                Some(usage.clamp(0.0, 100.0))
            }
            None => {
                warn!(%pid, "server process exited during cpu sampling");
                None
            }
        }
    }

    /// Host device utilization from the second of two iostat intervals.
    pub async fn io_percent(&self, window: Duration) -> Option<f64> {
        let bin = self.config.iostat_bin.as_ref()?;
        let interval_secs = window.as_secs().max(1);

        let mut cmd = Command::new(bin);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.arg("-x").arg(interval_secs.to_string()).arg("2");

        let limit = Duration::from_secs(interval_secs) + self.config.io_timeout_slack;
        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(bin = %bin.display(), %err, "failed to run i/o statistics tool");
                return None;
            }
            Err(_) => {
                warn!(
                    bin = %bin.display(),
                    timeout = %format_duration(limit),
                    "i/o statistics tool timed out"
                );
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let util = parse_iostat_util(&stdout);
        if util.is_none() {
            warn!(
                bin = %bin.display(),
                status = ?output.status,
                "could not parse device utilization from i/o statistics output"
            );
        }
        util
    }
}

/// Extracts `%util` from the second report of `iostat -x <secs> 2`.
///
/// The first report holds since-boot averages and is skipped.
pub fn parse_iostat_util(output: &str) -> Option<f64> {
    let lines: Vec<&str> = output.trim().lines().collect();
    let header = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(IOSTAT_HEADER_TOKEN))
        .map(|(idx, _)| idx)
        .nth(1)?;

    let row: Vec<&str> = lines
        .get(header + IOSTAT_ROW_OFFSET)?
        .split_whitespace()
        .collect();
    if row.len() < IOSTAT_MIN_COLUMNS {
        return None;
    }

    let util = row.last()?.parse::<f64>().ok()?;
    util.is_finite().then(|| util.clamp(0.0, 100.0))
}
