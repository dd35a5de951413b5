// Numan Thabit 2025
//! load-sweep: drives an external load generator through increasing load
//! levels, samples the server's resource cost at each level, and checkpoints
//! every completed level to disk.

pub mod config;
pub mod error;
pub mod latency;
pub mod model;
pub mod report;
pub mod runner;
pub mod sampler;
pub mod store;
pub mod summary;
pub mod sweep;

pub use error::{Result, SweepError};
pub use latency::LatencyStats;
pub use model::{LoadLevel, TestResult, WorkloadRun};
pub use runner::{LevelExecutor, LoadLevelRunner};
pub use sampler::ResourceSampler;
pub use store::ResultsStore;
pub use sweep::{SweepController, SweepState, WorkloadPlan};
