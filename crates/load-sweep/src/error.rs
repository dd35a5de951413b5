// Numan Thabit 2025
use std::{io, path::PathBuf};

use thiserror::Error;

use crate::sweep::SweepState;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to launch load generator {bin}: {source}")]
    GeneratorLaunch {
        bin: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed collecting load generator output: {0}")]
    GeneratorIo(#[source] io::Error),
    #[error("failed to checkpoint results to {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read results from {path}: {source}")]
    LoadIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode results in {path}: {source}")]
    LoadDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot resume workload '{workload}': {reason}")]
    ResumeMismatch { workload: String, reason: String },
    #[error("result for workload '{found}' does not belong to run '{expected}'")]
    ForeignResult { expected: String, found: String },
    #[error("invalid sweep transition {from:?} -> {to:?}")]
    InvalidTransition { from: SweepState, to: SweepState },
}

pub type Result<T> = std::result::Result<T, SweepError>;
