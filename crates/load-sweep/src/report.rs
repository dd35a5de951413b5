// Numan Thabit 2025
use tracing::{info, warn};

use crate::model::{LoadLevel, TestResult};

/// Aggregate view over a workload's results.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub levels: usize,
    pub degraded_levels: usize,
    pub peak_throughput: f64,
    pub peak_level: LoadLevel,
    pub peak_offered_load: f64,
    pub max_cpu_percent: Option<f64>,
    pub max_io_percent: Option<f64>,
}

impl SweepReport {
    pub fn from_results(results: &[TestResult]) -> Option<Self> {
        let peak = results
            .iter()
            .max_by(|a, b| a.throughput.total_cmp(&b.throughput))?;

        Some(Self {
            levels: results.len(),
            degraded_levels: results.iter().filter(|r| r.is_degraded()).count(),
            peak_throughput: peak.throughput,
            peak_level: peak.level,
            peak_offered_load: peak.offered_load,
            max_cpu_percent: max_present(results.iter().map(|r| r.cpu_utilization)),
            max_io_percent: max_present(results.iter().map(|r| r.io_utilization)),
        })
    }

    pub fn log(&self, workload: &str) {
        info!(
            workload,
            levels = self.levels,
            peak_throughput = self.peak_throughput,
            peak_level = %self.peak_level,
            peak_offered_load = self.peak_offered_load,
            max_cpu_percent = ?self.max_cpu_percent,
            max_io_percent = ?self.max_io_percent,
            "sweep summary"
        );
        if self.degraded_levels > 0 {
            warn!(
                workload,
                degraded = self.degraded_levels,
                "some levels carry incomplete measurements"
            );
        }
    }
}

fn max_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().max_by(f64::total_cmp)
}

/// One log line per persisted level, in sweep order.
pub fn log_results(results: &[TestResult]) {
    for (idx, result) in results.iter().enumerate() {
        info!(
            level = idx + 1,
            threads = result.level.threads,
            requests_per_thread = result.level.requests_per_thread,
            throughput = result.throughput,
            offered_load = result.offered_load,
            avg_latency_ms = result.latency_avg,
            server_p99_ms = ?result.server_latency.map(|l| l.p99_ms),
            cpu_percent = ?result.cpu_utilization,
            io_percent = ?result.io_utilization,
            "result"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::LevelMeasurements,
        sampler::ResourceUsage,
        summary::{GeneratorSummary, SummaryField},
    };

    fn result(threads: u32, throughput: f64, cpu: Option<f64>) -> TestResult {
        TestResult::from_measurements(
            "w",
            3,
            LoadLevel::new(threads, 1000),
            LevelMeasurements {
                summary: GeneratorSummary {
                    total_requests: SummaryField::Present(1000.0),
                    elapsed_secs: SummaryField::Present(2.0),
                    throughput: SummaryField::Present(throughput),
                },
                resources: ResourceUsage {
                    cpu_percent: cpu,
                    io_percent: Some(5.0),
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn empty_results_have_no_report() {
        assert_eq!(SweepReport::from_results(&[]), None);
    }

    #[test]
    fn finds_peak_and_maxima() {
        let results = [
            result(16, 900.0, Some(40.0)),
            result(32, 1500.0, None),
            result(64, 1200.0, Some(97.5)),
        ];
        let report = SweepReport::from_results(&results).expect("report");
        assert_eq!(report.levels, 3);
        assert_eq!(report.peak_level, LoadLevel::new(32, 1000));
        assert_eq!(report.peak_throughput, 1500.0);
        assert_eq!(report.max_cpu_percent, Some(97.5));
        assert_eq!(report.max_io_percent, Some(5.0));
        assert_eq!(report.degraded_levels, 1);
    }
}
