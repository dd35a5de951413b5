// Numan Thabit 2025
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use humantime::format_duration;
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
    process::Command,
};
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SweepError},
    latency::LatencyStats,
    model::{LevelMeasurements, LoadLevel, TestResult},
    sampler::{ResourceSampler, ResourceUsage},
    summary::GeneratorSummary,
};

/// Outcome of one generator invocation.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRun {
    pub summary: GeneratorSummary,
    pub exit_code: Option<i32>,
    pub server_latency: Option<LatencyStats>,
}

impl GeneratorRun {
    pub fn into_measurements(self, resources: ResourceUsage) -> LevelMeasurements {
        LevelMeasurements {
            summary: self.summary,
            resources,
            server_latency: self.server_latency,
            exit_code: self.exit_code,
        }
    }
}

/// The two phases of a load level, driven separately by the sweep so each
/// one is visible as its own state.
#[allow(async_fn_in_trait)]
pub trait LevelExecutor {
    /// Runs the load generator to completion. Only a failure to start it is
    /// an error; a degraded summary is not.
    async fn generate(&mut self, level: LoadLevel, mode: u8) -> Result<GeneratorRun>;

    /// Samples resource usage after the generator finished. Never fails.
    async fn sample(&mut self) -> ResourceUsage;
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub generator_bin: PathBuf,
    pub target_url: String,
    /// Server under test. Observed only, never controlled.
    pub server_pid: Option<u32>,
    /// Server log to mine for `latency=<n> us` lines.
    pub server_log: Option<PathBuf>,
}

pub struct LoadLevelRunner {
    config: RunnerConfig,
    sampler: ResourceSampler,
}

impl LoadLevelRunner {
    pub fn new(config: RunnerConfig, sampler: ResourceSampler) -> Self {
        Self { config, sampler }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Generator run plus resource sample, folded into one result.
    pub async fn run_level(
        &mut self,
        workload: &str,
        level: LoadLevel,
        mode: u8,
    ) -> Result<TestResult> {
        let run = self.generate(level, mode).await?;
        let resources = self.sample().await;
        Ok(TestResult::from_measurements(
            workload,
            mode,
            level,
            run.into_measurements(resources),
        ))
    }

    fn command(&self, level: LoadLevel, mode: u8) -> Command {
        let mut cmd = Command::new(&self.config.generator_bin);
        cmd.kill_on_drop(true);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.arg(&self.config.target_url)
            .arg(level.threads.to_string())
            .arg(level.requests_per_thread.to_string())
            .arg(mode.to_string());
        cmd
    }
}

impl LevelExecutor for LoadLevelRunner {
    async fn generate(&mut self, level: LoadLevel, mode: u8) -> Result<GeneratorRun> {
        let bin = &self.config.generator_bin;
        let log_offset = match &self.config.server_log {
            Some(path) => Some(log_len(path).await),
            None => None,
        };

        info!(
            bin = %bin.display(),
            target = %self.config.target_url,
            threads = level.threads,
            requests_per_thread = level.requests_per_thread,
            mode,
            "starting load generator"
        );

        let start = Instant::now();
        let child = self
            .command(level, mode)
            .spawn()
            .map_err(|source| SweepError::GeneratorLaunch {
                bin: bin.clone(),
                source,
            })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(SweepError::GeneratorIo)?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.stderr.is_empty() {
            text.push('\n');
            text.push_str(&String::from_utf8_lossy(&output.stderr));
        }
        debug!(output = %text, "load generator output");

        if !output.status.success() {
            warn!(
                status = %output.status,
                level = %level,
                "load generator exited unsuccessfully; parsing whatever it printed"
            );
        }

        let summary = GeneratorSummary::parse(&text);
        for issue in summary.issues() {
            warn!(?issue, level = %level, "load generator summary field unusable");
        }

        let server_latency = match (&self.config.server_log, log_offset) {
            (Some(path), Some(offset)) => read_log_tail(path, offset)
                .await
                .and_then(|tail| LatencyStats::extract(&tail)),
            _ => None,
        };

        info!(
            level = %level,
            wall_clock = %format_duration(start.elapsed()),
            "load generator finished"
        );

        Ok(GeneratorRun {
            summary,
            exit_code: output.status.code(),
            server_latency,
        })
    }

    async fn sample(&mut self) -> ResourceUsage {
        let usage = self.sampler.sample(self.config.server_pid).await;
        debug!(?usage, "resource sample");
        usage
    }
}

async fn log_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|meta| meta.len()).unwrap_or(0)
}

/// Text appended to `path` since `offset`. Starts over from the beginning
/// when the file shrank, which happens after a truncate or rotation.
async fn read_log_tail(path: &Path, offset: u64) -> Option<String> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to open server log");
            return None;
        }
    };
    let len = file.metadata().await.map(|meta| meta.len()).unwrap_or(0);
    let start = if len < offset { 0 } else { offset };

    let mut buf = Vec::new();
    let read = async {
        file.seek(SeekFrom::Start(start)).await?;
        file.read_to_end(&mut buf).await
    };
    if let Err(err) = read.await {
        warn!(path = %path.display(), %err, "failed to read server log");
        return None;
    }
    Some(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::SamplerConfig;
    use std::time::Duration;

    fn quiet_sampler() -> ResourceSampler {
        ResourceSampler::new(SamplerConfig {
            window: Duration::from_millis(1),
            iostat_bin: None,
            io_timeout_slack: Duration::ZERO,
        })
    }

    fn runner(bin: impl Into<PathBuf>, server_log: Option<PathBuf>) -> LoadLevelRunner {
        LoadLevelRunner::new(
            RunnerConfig {
                generator_bin: bin.into(),
                target_url: "http://127.0.0.1:8080".into(),
                server_pid: None,
                server_log,
            },
            quiet_sampler(),
        )
    }

    #[tokio::test]
    async fn missing_generator_is_fatal() {
        let mut runner = runner("/nonexistent/loadgen-for-tests", None);
        let err = runner
            .run_level("w", LoadLevel::new(1, 1), 2)
            .await
            .expect_err("launch must fail");
        assert!(matches!(err, SweepError::GeneratorLaunch { .. }));
    }

    #[tokio::test]
    async fn log_tail_reads_only_new_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.log");
        std::fs::write(&path, "latency=9000 us\n").expect("seed log");
        let offset = log_len(&path).await;

        let mut appended = std::fs::read_to_string(&path).expect("read");
        appended.push_str("latency=1000 us\nlatency=3000 us\n");
        std::fs::write(&path, appended).expect("append");

        let tail = read_log_tail(&path, offset).await.expect("tail");
        let stats = LatencyStats::extract(&tail).expect("stats");
        assert_eq!(stats.samples, 2);
        assert!((stats.mean_ms - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn truncated_log_is_read_from_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("server.log");
        std::fs::write(&path, "latency=5 us\n").expect("write");
        let tail = read_log_tail(&path, 10_000).await.expect("tail");
        assert_eq!(tail, "latency=5 us\n");
    }

    #[tokio::test]
    async fn missing_log_has_no_latency() {
        assert_eq!(log_len(Path::new("/nonexistent/server.log")).await, 0);
        assert_eq!(read_log_tail(Path::new("/nonexistent/server.log"), 0).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parses_generator_summary_and_arguments() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("loadgen");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo \"args: $1 $2 $3 $4\" >&2\n\
             echo \"Total HTTP requests: $(($2 * $3))\"\n\
             echo \"Elapsed: 10.00 seconds\"\n\
             echo \"Throughput: 800.00 req/sec\"\n",
        )
        .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let mut runner = runner(&script, None);
        let result = runner
            .run_level("w", LoadLevel::new(16, 500), 3)
            .await
            .expect("level runs");
        assert_eq!(result.total_requests, 8000.0);
        assert_eq!(result.elapsed, 10.0);
        assert_eq!(result.throughput, 800.0);
        assert_eq!(result.offered_load, 800.0);
        assert_eq!(result.mode, 3);
        assert_eq!(result.generator_exit_code, Some(0));
        assert!(result.summary_issues.is_empty());
        assert_eq!(result.cpu_utilization, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_generator_still_yields_degraded_result() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let script = dir.path().join("loadgen");
        std::fs::write(&script, "#!/bin/sh\necho \"Throughput: 12 req/sec\"\nexit 3\n")
            .expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");

        let mut runner = runner(&script, None);
        let result = runner
            .run_level("w", LoadLevel::new(2, 5), 2)
            .await
            .expect("non-zero exit is not fatal");
        assert_eq!(result.throughput, 12.0);
        assert_eq!(result.generator_exit_code, Some(3));
        assert_eq!(result.summary_issues.len(), 2);
        assert_eq!(result.offered_load, 10.0);
    }
}
