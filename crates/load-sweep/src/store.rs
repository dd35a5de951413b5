// Numan Thabit 2025
use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    error::{Result, SweepError},
    model::{TestResult, WorkloadRun},
};

/// Persists each workload's results as a JSON array in `results_<name>.json`.
///
/// Every checkpoint replaces the whole file. The new content is written to a
/// sibling temp file, synced, then renamed over the old one, so a crash
/// leaves either the previous checkpoint or the new one.
#[derive(Debug, Clone)]
pub struct ResultsStore {
    dir: PathBuf,
}

impl ResultsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, workload: &str) -> PathBuf {
        self.dir.join(format!("results_{}.json", file_stem(workload)))
    }

    /// Writes the full run, returning once the data is on disk.
    pub fn persist(&self, run: &WorkloadRun) -> Result<PathBuf> {
        let path = self.path_for(run.workload());
        write_atomically(&path, run.results()).map_err(|source| SweepError::Checkpoint {
            path: path.clone(),
            source,
        })?;
        info!(
            path = %path.display(),
            entries = run.len(),
            "checkpointed results"
        );
        Ok(path)
    }

    pub fn load(&self, workload: &str) -> Result<Vec<TestResult>> {
        load_file(&self.path_for(workload))
    }

    /// Like [`load`](Self::load) but treats a missing file as an empty run.
    pub fn load_existing(&self, workload: &str) -> Result<Vec<TestResult>> {
        let path = self.path_for(workload);
        if !path.exists() {
            return Ok(Vec::new());
        }
        load_file(&path)
    }
}

pub fn load_file(path: &Path) -> Result<Vec<TestResult>> {
    let file = File::open(path).map_err(|source| SweepError::LoadIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| SweepError::LoadDecode {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomically(path: &Path, results: &[TestResult]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, results)?;
    writer.write_all(b"\n")?;
    let file = writer.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

/// Workload names are free text; keep them out of path syntax.
fn file_stem(workload: &str) -> String {
    workload
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' => '_',
            ch if ch.is_whitespace() => '_',
            ch => ch,
        })
        .collect()
}
