// Numan Thabit 2025
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SweepError},
    latency::LatencyStats,
    sampler::ResourceUsage,
    summary::{FieldIssue, GeneratorSummary},
};

/// One (threads, requests-per-thread) point of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLevel {
    pub threads: u32,
    pub requests_per_thread: u32,
}

impl LoadLevel {
    pub const fn new(threads: u32, requests_per_thread: u32) -> Self {
        Self {
            threads,
            requests_per_thread,
        }
    }

    /// Requests the generator is asked to issue across all threads.
    pub fn attempted_requests(&self) -> u64 {
        u64::from(self.threads) * u64::from(self.requests_per_thread)
    }

    /// Approximate attempted request rate. Elapsed time is floored at one
    /// second so a missing or sub-second reading cannot blow the rate up.
    pub fn offered_load(&self, elapsed_secs: f64) -> f64 {
        self.attempted_requests() as f64 / elapsed_secs.max(1.0)
    }
}

impl fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.threads, self.requests_per_thread)
    }
}

/// Measurement captured for a single completed load level.
///
/// Field names match the JSON layout the results files have always used, so
/// older checkpoints stay loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(flatten)]
    pub level: LoadLevel,
    pub workload: String,
    pub mode: u8,
    pub throughput: f64,
    pub offered_load: f64,
    pub total_requests: f64,
    pub elapsed: f64,
    /// `None` when the server process could not be observed.
    #[serde(default)]
    pub cpu_utilization: Option<f64>,
    /// `None` when the I/O statistics tool failed or was disabled.
    #[serde(default)]
    pub io_utilization: Option<f64>,
    /// Wall-clock milliseconds per request. Coarse; see `server_latency`
    /// for percentiles taken from the server's own log.
    pub latency_avg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_latency: Option<LatencyStats>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summary_issues: Vec<FieldIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_exit_code: Option<i32>,
}

/// Everything gathered while a level ran, before it is folded into a
/// [`TestResult`].
#[derive(Debug, Clone, Default)]
pub struct LevelMeasurements {
    pub summary: GeneratorSummary,
    pub resources: ResourceUsage,
    pub server_latency: Option<LatencyStats>,
    pub exit_code: Option<i32>,
}

impl TestResult {
    pub fn from_measurements(
        workload: &str,
        mode: u8,
        level: LoadLevel,
        measurements: LevelMeasurements,
    ) -> Self {
        let LevelMeasurements {
            summary,
            resources,
            server_latency,
            exit_code,
        } = measurements;

        let total_requests = summary.total_requests.value_or_zero();
        let elapsed = summary.elapsed_secs.value_or_zero();
        let throughput = summary.throughput.value_or_zero();
        let latency_avg = if total_requests > 0.0 {
            elapsed * 1000.0 / total_requests
        } else {
            0.0
        };

        Self {
            level,
            workload: workload.to_string(),
            mode,
            throughput,
            offered_load: level.offered_load(elapsed),
            total_requests,
            elapsed,
            cpu_utilization: resources.cpu_percent,
            io_utilization: resources.io_percent,
            latency_avg,
            server_latency,
            summary_issues: summary.issues(),
            generator_exit_code: exit_code,
        }
    }

    pub fn cpu_percent_or_zero(&self) -> f64 {
        self.cpu_utilization.unwrap_or_default()
    }

    pub fn io_percent_or_zero(&self) -> f64 {
        self.io_utilization.unwrap_or_default()
    }

    pub fn is_degraded(&self) -> bool {
        !self.summary_issues.is_empty()
            || self.cpu_utilization.is_none()
            || self.io_utilization.is_none()
    }
}

/// Ordered results of one workload. Grows by exactly one entry per completed
/// level and never reorders or drops entries.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadRun {
    workload: String,
    mode: u8,
    results: Vec<TestResult>,
}

impl WorkloadRun {
    pub fn new(workload: impl Into<String>, mode: u8) -> Self {
        Self {
            workload: workload.into(),
            mode,
            results: Vec::new(),
        }
    }

    /// Rebuilds a run from previously persisted results.
    pub fn restore(
        workload: impl Into<String>,
        mode: u8,
        results: Vec<TestResult>,
    ) -> Result<Self> {
        let mut run = Self::new(workload, mode);
        for result in results {
            run.push(result)?;
        }
        Ok(run)
    }

    pub fn push(&mut self, result: TestResult) -> Result<()> {
        if result.workload != self.workload || result.mode != self.mode {
            return Err(SweepError::ForeignResult {
                expected: format!("{} (mode {})", self.workload, self.mode),
                found: format!("{} (mode {})", result.workload, result.mode),
            });
        }
        self.results.push(result);
        Ok(())
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_results(self) -> Vec<TestResult> {
        self.results
    }
}
