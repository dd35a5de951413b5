// Numan Thabit 2025
//! Parser for the summary block the load generator prints on exit.
//!
//! Each field is anchored on a fixed label anywhere in the output and takes
//! the first whitespace-separated token after it:
//!
//! ```text
//! Total HTTP requests: 16000
//! Elapsed: 12.50 seconds
//! Throughput: 1280.00 req/sec
//! ```
//!
//! A label that never appears is reported as [`SummaryField::Absent`]; a
//! label followed by something that is not a number is
//! [`SummaryField::Malformed`]. Both read as zero downstream, but stay
//! distinguishable in the persisted result.

use serde::{Deserialize, Serialize};

pub const TOTAL_REQUESTS_LABEL: &str = "Total HTTP requests:";
pub const ELAPSED_LABEL: &str = "Elapsed:";
pub const THROUGHPUT_LABEL: &str = "Throughput:";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SummaryField {
    Present(f64),
    #[default]
    Absent,
    Malformed(String),
}

impl SummaryField {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Present(value) => Some(*value),
            _ => None,
        }
    }

    pub fn value_or_zero(&self) -> f64 {
        self.value().unwrap_or_default()
    }

    fn issue(&self, field: SummaryFieldName) -> Option<FieldIssue> {
        match self {
            Self::Present(_) => None,
            Self::Absent => Some(FieldIssue::Absent { field }),
            Self::Malformed(token) => Some(FieldIssue::Malformed {
                field,
                token: token.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryFieldName {
    TotalRequests,
    Elapsed,
    Throughput,
}

/// Why a summary field did not yield a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldIssue {
    Absent { field: SummaryFieldName },
    Malformed { field: SummaryFieldName, token: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratorSummary {
    pub total_requests: SummaryField,
    pub elapsed_secs: SummaryField,
    pub throughput: SummaryField,
}

impl GeneratorSummary {
    pub fn parse(output: &str) -> Self {
        let mut summary = Self::default();

        // Later occurrences of a label override earlier ones.
        for line in output.lines() {
            if let Some(field) = parse_labeled(line, TOTAL_REQUESTS_LABEL) {
                summary.total_requests = field;
            } else if let Some(field) = parse_labeled(line, ELAPSED_LABEL) {
                summary.elapsed_secs = field;
            } else if let Some(field) = parse_labeled(line, THROUGHPUT_LABEL) {
                summary.throughput = field;
            }
        }

        summary
    }

    pub fn issues(&self) -> Vec<FieldIssue> {
        [
            self.total_requests.issue(SummaryFieldName::TotalRequests),
            self.elapsed_secs.issue(SummaryFieldName::Elapsed),
            self.throughput.issue(SummaryFieldName::Throughput),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.issues().is_empty()
    }
}

fn parse_labeled(line: &str, label: &str) -> Option<SummaryField> {
    let (_, rest) = line.split_once(label)?;
    let field = match rest.split_whitespace().next() {
        None => SummaryField::Malformed(String::new()),
        Some(token) => match token.parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => SummaryField::Present(value),
            _ => SummaryField::Malformed(token.to_string()),
        },
    };
    Some(field)
}
