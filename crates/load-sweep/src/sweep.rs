// Numan Thabit 2025
use std::time::Duration;

use humantime::format_duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    error::{Result, SweepError},
    model::{LoadLevel, TestResult, WorkloadRun},
    runner::LevelExecutor,
    store::ResultsStore,
};

/// Where a sweep is. Level-scoped states carry the zero-based level index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    RunningLevel(usize),
    Sampling(usize),
    Checkpointing(usize),
    Cooldown(usize),
    Done,
    Aborted,
}

impl SweepState {
    fn phase(self) -> u8 {
        match self {
            Self::RunningLevel(_) => 0,
            Self::Sampling(_) => 1,
            Self::Checkpointing(_) => 2,
            Self::Cooldown(_) => 3,
            Self::Done | Self::Aborted => 4,
        }
    }

    fn level(self) -> Option<usize> {
        match self {
            Self::RunningLevel(idx)
            | Self::Sampling(idx)
            | Self::Checkpointing(idx)
            | Self::Cooldown(idx) => Some(idx),
            Self::Done | Self::Aborted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    /// Only forward moves are allowed: the phases of one level in order,
    /// cooldown into the next level, the last checkpoint into `Done`, and
    /// any live state into `Aborted`.
    pub fn can_advance_to(self, next: SweepState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Aborted => true,
            Self::Done => matches!(self, Self::Checkpointing(_)),
            _ => match (self.level(), next.level()) {
                (Some(cur), Some(nxt)) if cur == nxt => next.phase() == self.phase() + 1,
                (Some(cur), Some(nxt)) => {
                    matches!((self, next), (Self::Cooldown(_), Self::RunningLevel(_)))
                        && nxt == cur + 1
                }
                _ => false,
            },
        }
    }
}

/// Forward-only record of the states a sweep passed through.
#[derive(Debug, Clone, Default)]
pub struct StateLog {
    states: Vec<SweepState>,
}

impl StateLog {
    pub fn current(&self) -> Option<SweepState> {
        self.states.last().copied()
    }

    pub fn states(&self) -> &[SweepState] {
        &self.states
    }

    fn start(&mut self, first: SweepState) -> Result<()> {
        if let Some(from) = self.current() {
            return Err(SweepError::InvalidTransition { from, to: first });
        }
        self.states.push(first);
        Ok(())
    }

    fn advance(&mut self, to: SweepState) -> Result<()> {
        match self.current() {
            None => self.start(to),
            Some(from) if from.can_advance_to(to) => {
                self.states.push(to);
                Ok(())
            }
            Some(from) => Err(SweepError::InvalidTransition { from, to }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkloadPlan {
    pub name: String,
    pub mode: u8,
    pub levels: Vec<LoadLevel>,
    /// Nominal time budget of one level. The generator decides how long it
    /// actually runs.
    pub level_duration: Duration,
}

/// Drives a workload's levels strictly one after another, checkpointing
/// after each.
pub struct SweepController<E> {
    executor: E,
    store: ResultsStore,
    cooldown: Duration,
    log: StateLog,
}

impl<E: LevelExecutor> SweepController<E> {
    pub fn new(executor: E, store: ResultsStore, cooldown: Duration) -> Self {
        Self {
            executor,
            store,
            cooldown,
            log: StateLog::default(),
        }
    }

    pub fn state_log(&self) -> &StateLog {
        &self.log
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Runs every level of `plan` from scratch.
    pub async fn run(&mut self, plan: &WorkloadPlan) -> Result<WorkloadRun> {
        let run = WorkloadRun::new(plan.name.clone(), plan.mode);
        self.run_from(plan, run).await
    }

    /// Continues a sweep whose earlier levels are already on disk.
    pub async fn resume(&mut self, plan: &WorkloadPlan) -> Result<WorkloadRun> {
        let persisted = self.store.load_existing(&plan.name)?;
        let run = resume_point(plan, persisted)?;
        if !run.is_empty() {
            info!(
                workload = %plan.name,
                completed = run.len(),
                total = plan.levels.len(),
                "resuming from checkpoint"
            );
        }
        self.run_from(plan, run).await
    }

    async fn run_from(
        &mut self,
        plan: &WorkloadPlan,
        mut run: WorkloadRun,
    ) -> Result<WorkloadRun> {
        self.log = StateLog::default();
        let total = plan.levels.len();
        let first = run.len();

        info!(
            workload = %plan.name,
            mode = plan.mode,
            levels = total,
            level_duration = %format_duration(plan.level_duration),
            "starting workload"
        );

        for (idx, level) in plan.levels.iter().copied().enumerate().skip(first) {
            if let Err(err) = self.run_level(plan, &mut run, idx, level).await {
                error!(
                    workload = %plan.name,
                    level = idx + 1,
                    total,
                    completed = run.len(),
                    %err,
                    "sweep aborted"
                );
                let _ = self.log.advance(SweepState::Aborted);
                return Err(err);
            }

            if idx + 1 < total {
                self.log.advance(SweepState::Cooldown(idx))?;
                if !self.cooldown.is_zero() {
                    info!(
                        cooldown = %format_duration(self.cooldown),
                        "cooling down before next level"
                    );
                    sleep(self.cooldown).await;
                }
            }
        }

        self.log.advance(SweepState::Done)?;
        info!(workload = %plan.name, results = run.len(), "workload complete");
        Ok(run)
    }

    async fn run_level(
        &mut self,
        plan: &WorkloadPlan,
        run: &mut WorkloadRun,
        idx: usize,
        level: LoadLevel,
    ) -> Result<()> {
        info!(
            level = idx + 1,
            total = plan.levels.len(),
            threads = level.threads,
            requests_per_thread = level.requests_per_thread,
            "load level"
        );

        self.log.advance(SweepState::RunningLevel(idx))?;
        let generated = self.executor.generate(level, plan.mode).await?;

        self.log.advance(SweepState::Sampling(idx))?;
        let resources = self.executor.sample().await;

        let result = TestResult::from_measurements(
            &plan.name,
            plan.mode,
            level,
            generated.into_measurements(resources),
        );
        log_level_result(&result);
        run.push(result)?;

        self.log.advance(SweepState::Checkpointing(idx))?;
        self.store.persist(run)?;
        Ok(())
    }
}

/// Validates that `persisted` is a prefix of `plan` and rebuilds the run.
pub fn resume_point(plan: &WorkloadPlan, persisted: Vec<TestResult>) -> Result<WorkloadRun> {
    let mismatch = |reason: String| SweepError::ResumeMismatch {
        workload: plan.name.clone(),
        reason,
    };

    if persisted.len() > plan.levels.len() {
        return Err(mismatch(format!(
            "checkpoint holds {} results but only {} levels are configured",
            persisted.len(),
            plan.levels.len()
        )));
    }
    for (idx, (result, level)) in persisted.iter().zip(&plan.levels).enumerate() {
        if result.level != *level {
            return Err(mismatch(format!(
                "level {} was {} in the checkpoint but is {} now",
                idx + 1,
                result.level,
                level
            )));
        }
        if result.mode != plan.mode {
            return Err(mismatch(format!(
                "level {} ran in mode {} but mode {} is configured",
                idx + 1,
                result.mode,
                plan.mode
            )));
        }
    }

    WorkloadRun::restore(plan.name.clone(), plan.mode, persisted)
        .map_err(|err| mismatch(err.to_string()))
}

fn log_level_result(result: &TestResult) {
    let cpu = result
        .cpu_utilization
        .map(|v| format!("{v:.2}%"))
        .unwrap_or_else(|| "<n/a>".to_string());
    let io = result
        .io_utilization
        .map(|v| format!("{v:.2}%"))
        .unwrap_or_else(|| "<n/a>".to_string());

    info!(
        level = %result.level,
        throughput = result.throughput,
        offered_load = result.offered_load,
        avg_latency_ms = result.latency_avg,
        cpu = %cpu,
        io = %io,
        "level results"
    );
    if !result.summary_issues.is_empty() {
        warn!(
            level = %result.level,
            issues = result.summary_issues.len(),
            "level recorded with degraded generator summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runner::GeneratorRun,
        sampler::ResourceUsage,
        summary::{GeneratorSummary, SummaryField},
    };

    #[derive(Default)]
    struct FakeExecutor {
        calls: Vec<&'static str>,
        fail_at: Option<usize>,
        generated: usize,
        store_dir: Option<std::path::PathBuf>,
        persisted_before_generate: Vec<usize>,
    }

    impl LevelExecutor for FakeExecutor {
        async fn generate(&mut self, level: LoadLevel, _mode: u8) -> Result<GeneratorRun> {
            if let Some(dir) = &self.store_dir {
                let seen = ResultsStore::new(dir).load_existing("w").map(|r| r.len());
                self.persisted_before_generate.push(seen.unwrap_or(usize::MAX));
            }
            self.calls.push("generate");
            if self.fail_at == Some(self.generated) {
                return Err(SweepError::GeneratorLaunch {
                    bin: "loadgen".into(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            self.generated += 1;
            let attempted = level.attempted_requests() as f64;
            Ok(GeneratorRun {
                summary: GeneratorSummary {
                    total_requests: SummaryField::Present(attempted),
                    elapsed_secs: SummaryField::Present(10.0),
                    throughput: SummaryField::Present(attempted / 10.0),
                },
                exit_code: Some(0),
                server_latency: None,
            })
        }

        async fn sample(&mut self) -> ResourceUsage {
            self.calls.push("sample");
            ResourceUsage {
                cpu_percent: Some(10.0 * self.generated as f64),
                io_percent: None,
            }
        }
    }

    fn plan(levels: &[(u32, u32)]) -> WorkloadPlan {
        WorkloadPlan {
            name: "w".into(),
            mode: 2,
            levels: levels.iter().map(|&(t, r)| LoadLevel::new(t, r)).collect(),
            level_duration: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn one_result_per_level_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = plan(&[(8, 500), (16, 500), (32, 500), (4, 100)]);
        let mut sweep = SweepController::new(
            FakeExecutor::default(),
            ResultsStore::new(dir.path()),
            Duration::ZERO,
        );

        let run = sweep.run(&plan).await.expect("sweep");
        let levels: Vec<_> = run.results().iter().map(|r| r.level).collect();
        assert_eq!(levels, plan.levels);
        assert_eq!(run.results()[1].offered_load, 800.0);

        let persisted = sweep.store().load("w").expect("load");
        assert_eq!(persisted.as_slice(), run.results());
        assert_eq!(sweep.state_log().current(), Some(SweepState::Done));
    }

    #[tokio::test]
    async fn states_move_forward_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut sweep = SweepController::new(
            FakeExecutor::default(),
            ResultsStore::new(dir.path()),
            Duration::from_millis(1),
        );
        sweep.run(&plan(&[(1, 1), (2, 1)])).await.expect("sweep");

        use SweepState::*;
        assert_eq!(
            sweep.state_log().states(),
            &[
                RunningLevel(0),
                Sampling(0),
                Checkpointing(0),
                Cooldown(0),
                RunningLevel(1),
                Sampling(1),
                Checkpointing(1),
                Done,
            ]
        );
        let executor = sweep.into_executor();
        assert_eq!(
            executor.calls,
            vec!["generate", "sample", "generate", "sample"]
        );
    }

    #[tokio::test]
    async fn checkpoint_lands_before_next_level_starts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = FakeExecutor {
            store_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut sweep =
            SweepController::new(executor, ResultsStore::new(dir.path()), Duration::ZERO);
        sweep
            .run(&plan(&[(1, 1), (2, 1), (3, 1)]))
            .await
            .expect("sweep");
        assert_eq!(sweep.into_executor().persisted_before_generate, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn launch_failure_aborts_and_keeps_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let executor = FakeExecutor {
            fail_at: Some(2),
            ..Default::default()
        };
        let mut sweep =
            SweepController::new(executor, ResultsStore::new(dir.path()), Duration::ZERO);
        let err = sweep
            .run(&plan(&[(1, 1), (2, 1), (3, 1), (4, 1)]))
            .await
            .expect_err("third level fails");
        assert!(matches!(err, SweepError::GeneratorLaunch { .. }));
        assert_eq!(sweep.state_log().current(), Some(SweepState::Aborted));

        let persisted = sweep.store().load("w").expect("partial results");
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[1].level, LoadLevel::new(2, 1));
    }

    #[tokio::test]
    async fn checkpoint_failure_aborts_before_next_level() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let mut sweep = SweepController::new(
            FakeExecutor::default(),
            ResultsStore::new(blocker.join("results")),
            Duration::ZERO,
        );
        let err = sweep
            .run(&plan(&[(1, 1), (2, 1), (3, 1)]))
            .await
            .expect_err("unwritable results dir");
        assert!(matches!(err, SweepError::Checkpoint { .. }));

        use SweepState::*;
        assert_eq!(
            sweep.state_log().states(),
            &[RunningLevel(0), Sampling(0), Checkpointing(0), Aborted]
        );
        assert_eq!(sweep.into_executor().calls, vec!["generate", "sample"]);
    }

    #[tokio::test]
    async fn resume_continues_after_last_checkpoint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = plan(&[(1, 1), (2, 1), (3, 1)]);

        let mut first = SweepController::new(
            FakeExecutor {
                fail_at: Some(1),
                ..Default::default()
            },
            ResultsStore::new(dir.path()),
            Duration::ZERO,
        );
        first.run(&plan).await.expect_err("abort after first level");
        let before = first.store().load("w").expect("load");
        assert_eq!(before.len(), 1);

        let mut second = SweepController::new(
            FakeExecutor::default(),
            ResultsStore::new(dir.path()),
            Duration::ZERO,
        );
        let run = second.resume(&plan).await.expect("resume");
        assert_eq!(run.len(), 3);
        assert_eq!(run.results()[0], before[0]);
        assert_eq!(second.state_log().states()[0], SweepState::RunningLevel(1));
        assert_eq!(second.into_executor().calls.len(), 4);

        let reloaded = ResultsStore::new(dir.path()).load("w").expect("load");
        assert_eq!(reloaded.as_slice(), run.results());
    }

    #[tokio::test]
    async fn resume_of_finished_sweep_runs_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plan = plan(&[(1, 1), (2, 1)]);
        let store = ResultsStore::new(dir.path());
        let mut sweep = SweepController::new(FakeExecutor::default(), store.clone(), Duration::ZERO);
        let done = sweep.run(&plan).await.expect("sweep");

        let mut again = SweepController::new(FakeExecutor::default(), store, Duration::ZERO);
        let resumed = again.resume(&plan).await.expect("resume");
        assert_eq!(resumed, done);
        assert_eq!(again.state_log().states(), &[SweepState::Done]);
        assert!(again.into_executor().calls.is_empty());
    }

    #[test]
    fn resume_rejects_diverging_levels() {
        let plan = plan(&[(1, 1), (2, 1)]);
        let foreign = TestResult::from_measurements(
            "w",
            2,
            LoadLevel::new(9, 9),
            Default::default(),
        );
        let err = resume_point(&plan, vec![foreign]).expect_err("mismatch");
        assert!(matches!(err, SweepError::ResumeMismatch { .. }));

        let wrong_mode =
            TestResult::from_measurements("w", 3, LoadLevel::new(1, 1), Default::default());
        assert!(resume_point(&plan, vec![wrong_mode]).is_err());
    }

    #[test]
    fn transitions_reject_backward_and_skipping_moves() {
        use SweepState::*;
        assert!(RunningLevel(0).can_advance_to(Sampling(0)));
        assert!(Cooldown(0).can_advance_to(RunningLevel(1)));
        assert!(Checkpointing(3).can_advance_to(Done));
        assert!(Sampling(1).can_advance_to(Aborted));

        assert!(!Sampling(0).can_advance_to(RunningLevel(0)));
        assert!(!RunningLevel(0).can_advance_to(Checkpointing(0)));
        assert!(!Checkpointing(0).can_advance_to(RunningLevel(1)));
        assert!(!Cooldown(0).can_advance_to(RunningLevel(2)));
        assert!(!Done.can_advance_to(RunningLevel(0)));
        assert!(!Aborted.can_advance_to(Done));
        assert!(!RunningLevel(0).can_advance_to(Done));
        assert!(!Cooldown(0).can_advance_to(Done));

        let mut log = StateLog::default();
        log.advance(RunningLevel(0)).expect("start");
        let err = log.advance(Cooldown(0)).expect_err("skips phases");
        assert!(matches!(err, SweepError::InvalidTransition { .. }));
    }
}
