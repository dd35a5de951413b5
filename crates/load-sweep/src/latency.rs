// Numan Thabit 2025
use serde::{Deserialize, Serialize};
use tracing::debug;

const LATENCY_KEY: &str = "latency=";
const MICROS_SUFFIX: &str = " us";

/// Latency distribution, in milliseconds, taken from server log lines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Scans `log` for `latency=<integer> us` and summarises the matches.
    ///
    /// Returns `None` when no line matched. That is "no data", not a
    /// zero-latency reading.
    pub fn extract(log: &str) -> Option<Self> {
        let samples: Vec<f64> = log
            .lines()
            .filter_map(parse_latency_micros)
            .map(|micros| micros as f64 / 1000.0)
            .collect();
        Self::from_samples_ms(samples)
    }

    pub fn from_samples_ms(mut samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        samples.sort_by(f64::total_cmp);
        let mean_ms = samples.iter().sum::<f64>() / samples.len() as f64;
        Some(Self {
            samples: samples.len(),
            mean_ms,
            p50_ms: percentile(&samples, 50.0),
            p95_ms: percentile(&samples, 95.0),
            p99_ms: percentile(&samples, 99.0),
        })
    }
}

/// First `latency=<digits> us` on the line, in microseconds.
fn parse_latency_micros(line: &str) -> Option<u64> {
    let mut rest = line;
    while let Some(idx) = rest.find(LATENCY_KEY) {
        let tail = &rest[idx + LATENCY_KEY.len()..];
        let digits_end = tail
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(tail.len());
        if digits_end > 0 && tail[digits_end..].starts_with(MICROS_SUFFIX) {
            let digits = &tail[..digits_end];
            match digits.parse::<u64>() {
                Ok(value) => return Some(value),
                Err(err) => debug!(token = digits, %err, "skipping unparsable latency sample"),
            }
        }
        rest = tail;
    }
    None
}

/// Linear interpolation between closest ranks over sorted input.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len() as f64;
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - (lo as f64);
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
