//! Scheduler driver
//!
//! Runs one group executor per group on a bounded pool, drains their events,
//! owns every test case not currently finished, trips the max-fail circuit
//! breaker and drives progress reporting.

use chrono::Local;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::event::Event;
use super::group::GroupExecutor;
use super::worker::Isolation;
use crate::models::{
    CaseId, CheckResult, FailurePolicy, Group, Outcome, Progress, ResultMap, TestCase,
};
use crate::output::Reporter;
use crate::runnable::Runnable;
use crate::utils::Timer;

/// Longest wait between progress passes
const MAX_PROGRESS_TICK: Duration = Duration::from_millis(500);

/// Configuration misuse detected before a run starts
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Pool size must be at least 1")]
    InvalidPoolSize,

    #[error("Timeout must be greater than zero")]
    InvalidTimeout,

    #[error("Progress interval must be greater than zero")]
    InvalidProgressInterval,

    #[error("Group {0:?} has no tests")]
    EmptyGroup(String),
}

/// Run-wide settings
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of groups allowed to run at once
    pub pool_size: usize,
    /// Per-test wall-clock limit; `None` waits forever
    pub timeout: Option<Duration>,
    /// Minimum time between progress reports for one test
    pub progress_interval: Option<Duration>,
    /// Abort once more than this many hard failures occurred
    pub max_fail: Option<usize>,
    pub policy: FailurePolicy,
    /// Defaults to re-running the current executable as a worker, which
    /// requires `main` to hand [`WORKER_SUBCOMMAND`] to [`serve`]
    ///
    /// [`WORKER_SUBCOMMAND`]: super::worker::WORKER_SUBCOMMAND
    /// [`serve`]: super::worker::serve
    pub isolation: Isolation,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            timeout: None,
            progress_interval: None,
            max_fail: None,
            policy: FailurePolicy::default(),
            isolation: Isolation::default(),
        }
    }
}

/// Host CPU count, or 1 when it cannot be determined
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl SchedulerConfig {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn with_max_fail(mut self, max_fail: usize) -> Self {
        self.max_fail = Some(max_fail);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.pool_size == 0 {
            return Err(SchedulerError::InvalidPoolSize);
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SchedulerError::InvalidTimeout);
        }
        if self.progress_interval == Some(Duration::ZERO) {
            return Err(SchedulerError::InvalidProgressInterval);
        }
        Ok(())
    }
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunReport<R, T> {
    /// Rendered by the reporter
    pub report: T,
    /// Every test case, in finish order
    pub cases: Vec<TestCase<R>>,
    pub elapsed: Duration,
    pub hard_failures: usize,
    pub breaker_tripped: bool,
    policy: FailurePolicy,
}

impl<R, T> RunReport<R, T> {
    /// Whether any case is at or above the hard-failure threshold
    pub fn has_failures(&self) -> bool {
        self.cases.iter().any(|case| {
            case.outcome()
                .is_some_and(|outcome| self.policy.is_hard_failure(outcome))
        })
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        if self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn case(&self, full_name: &str) -> Option<&TestCase<R>> {
        self.cases.iter().find(|case| case.full_name() == full_name)
    }
}

/// Multiplexes concurrently running groups into one run
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every group and render the final report
    pub async fn run<R, P>(
        &self,
        groups: Vec<Group<R>>,
        reporter: &mut P,
    ) -> Result<RunReport<R, P::Report>, SchedulerError>
    where
        R: Runnable,
        P: Reporter,
    {
        if let Some(group) = groups.iter().find(|group| group.is_empty()) {
            return Err(SchedulerError::EmptyGroup(group.name.clone()));
        }

        let config = &self.config;
        let timer = Timer::start("run");
        let total: usize = groups.iter().map(Group::len).sum();
        info!(
            "Starting run: {} groups, {} tests, pool size {}",
            groups.len(),
            total,
            config.pool_size
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let pool = Arc::new(Semaphore::new(config.pool_size));

        let mut run = RunState::new(config.policy, config.max_fail);
        let mut handles = Vec::with_capacity(groups.len());

        for group in groups {
            let cases: Vec<TestCase<R>> = group
                .tests
                .into_iter()
                .map(|runnable| TestCase::new(&group.name, runnable, config.progress_interval))
                .collect();
            let jobs = cases.iter().map(TestCase::job).collect();
            run.registry.extend(cases.into_iter().map(|case| (case.id(), case)));

            let executor = GroupExecutor::new(group.name, jobs, events_tx.clone(), cancel_rx.clone())
                .with_timeout(config.timeout)
                .with_isolation(config.isolation.clone())
                .with_policy(config.policy);
            handles.push(tokio::spawn(executor.run_pooled(pool.clone())));
        }
        drop(events_tx);

        let tick = config
            .progress_interval
            .map_or(MAX_PROGRESS_TICK, |interval| interval.min(MAX_PROGRESS_TICK));
        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !run.registry.is_empty() {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(event) => {
                        run.apply(event, reporter);
                        while let Ok(event) = events_rx.try_recv() {
                            run.apply(event, reporter);
                        }
                    }
                    None => run.abandon_remaining(reporter),
                },
                _ = ticker.tick() => {}
            }

            if run.breaker_exceeded() {
                if !run.breaker_tripped {
                    warn!(
                        "{} hard failures exceed max-fail of {}; cancelling remaining tests",
                        run.failures,
                        config.max_fail.unwrap_or_default()
                    );
                    run.breaker_tripped = true;
                    let _ = cancel_tx.send(true);
                }
                run.skip_waiting(reporter);
            }

            for case in run.registry.values_mut() {
                case.report_progress(reporter);
            }
        }

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Group task failed: {e}");
            }
        }

        let elapsed = timer.stop();
        info!(
            "Run finished in {:.2}s: {} tests, {} hard failures",
            elapsed.as_secs_f64(),
            run.completed.len(),
            run.failures
        );

        let report = reporter.format_complete(&run.completed, elapsed);
        Ok(RunReport {
            report,
            cases: run.completed,
            elapsed,
            hard_failures: run.failures,
            breaker_tripped: run.breaker_tripped,
            policy: config.policy,
        })
    }
}

/// Run `groups` with `config`, reporting to `reporter`
pub async fn run<R, P>(
    groups: Vec<Group<R>>,
    reporter: &mut P,
    config: SchedulerConfig,
) -> Result<RunReport<R, P::Report>, SchedulerError>
where
    R: Runnable,
    P: Reporter,
{
    Scheduler::new(config)?.run(groups, reporter).await
}

/// Driver-owned bookkeeping for one run
struct RunState<R> {
    registry: HashMap<CaseId, TestCase<R>>,
    completed: Vec<TestCase<R>>,
    failures: usize,
    policy: FailurePolicy,
    max_fail: Option<usize>,
    breaker_tripped: bool,
}

impl<R: Runnable> RunState<R> {
    fn new(policy: FailurePolicy, max_fail: Option<usize>) -> Self {
        Self {
            registry: HashMap::new(),
            completed: Vec::new(),
            failures: 0,
            policy,
            max_fail,
            breaker_tripped: false,
        }
    }

    fn breaker_exceeded(&self) -> bool {
        self.max_fail.is_some_and(|max| self.failures > max)
    }

    fn apply<P: Reporter>(&mut self, event: Event, reporter: &mut P) {
        match event {
            Event::Running { id, at } => {
                let Some(case) = self.registry.get_mut(&id) else {
                    debug!("Ignoring RUNNING for {id}: no longer in flight");
                    return;
                };
                if let Err(e) = case.set_progress(Progress::Running, at) {
                    warn!("Ignoring RUNNING event: {e}");
                }
            }
            Event::Finished { id, at, execution } => {
                let Some(mut case) = self.registry.remove(&id) else {
                    debug!("Ignoring FINISHED for {id}: no longer in flight");
                    return;
                };
                if case.progress() == Progress::Waiting {
                    if let Err(e) = case.set_progress(Progress::Running, at) {
                        warn!("{e}");
                    }
                }
                if let Err(e) = case.finish(execution.outcome, execution.results, at) {
                    error!("Failed to finish {}: {e}", case.full_name());
                }
                self.complete(case, reporter);
            }
        }
    }

    fn complete<P: Reporter>(&mut self, mut case: TestCase<R>, reporter: &mut P) {
        if let Err(e) = case.report_result(reporter) {
            error!("{e}");
        }
        if case
            .outcome()
            .is_some_and(|outcome| self.policy.is_hard_failure(outcome))
        {
            self.failures += 1;
        }
        self.completed.push(case);
    }

    /// Finish every still-waiting case as skipped by the circuit breaker
    fn skip_waiting<P: Reporter>(&mut self, reporter: &mut P) {
        let max = self.max_fail.unwrap_or_default();
        let message = format!("Skipped because max-fail of {max} was exceeded");
        self.force_finish(
            |case| case.progress() == Progress::Waiting,
            |case| {
                let mut results = ResultMap::new();
                results.insert(case.name().to_string(), CheckResult::skip(message.clone()));
                (Outcome::Skip, results)
            },
            reporter,
        );
    }

    /// Every group executor is gone but cases are still in flight
    fn abandon_remaining<P: Reporter>(&mut self, reporter: &mut P) {
        error!(
            "{} tests left in flight after all groups stopped",
            self.registry.len()
        );
        self.force_finish(
            |_| true,
            |case| {
                let mut results = ResultMap::new();
                results.insert(
                    case.name().to_string(),
                    CheckResult::fatal("Group executor stopped before the test finished"),
                );
                (Outcome::Fatal, results)
            },
            reporter,
        );
    }

    fn force_finish<P, F, G>(&mut self, select: F, finalize: G, reporter: &mut P)
    where
        P: Reporter,
        F: Fn(&TestCase<R>) -> bool,
        G: Fn(&TestCase<R>) -> (Outcome, ResultMap),
    {
        let mut ids: Vec<CaseId> = self
            .registry
            .values()
            .filter(|case| select(case))
            .map(TestCase::id)
            .collect();
        ids.sort();

        let now = Local::now();
        for id in ids {
            let Some(mut case) = self.registry.remove(&id) else {
                continue;
            };
            if case.progress() == Progress::Waiting {
                if let Err(e) = case.set_progress(Progress::Running, now) {
                    warn!("{e}");
                }
            }
            let (outcome, results) = finalize(&case);
            if let Err(e) = case.finish(outcome, results, now) {
                error!("Failed to finish {}: {e}", case.full_name());
            }
            self.complete(case, reporter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::RecordingReporter;
    use crate::runnable::tests::StubRunnable;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> SchedulerConfig {
        SchedulerConfig::new(2).with_isolation(Isolation::InProcess)
    }

    fn outcome_of<T>(report: &RunReport<StubRunnable, T>, name: &str) -> Option<Outcome> {
        report.case(name).and_then(TestCase::outcome)
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            SchedulerConfig::new(0).validate(),
            Err(SchedulerError::InvalidPoolSize)
        );
        assert_eq!(
            config().with_timeout(Duration::ZERO).validate(),
            Err(SchedulerError::InvalidTimeout)
        );
        assert_eq!(
            config().with_progress_interval(Duration::ZERO).validate(),
            Err(SchedulerError::InvalidProgressInterval)
        );
        assert!(config().with_max_fail(0).validate().is_ok());
        assert!(SchedulerConfig::default().pool_size >= 1);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_scheduling() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![Group::new("a", vec![StubRunnable::ok("x")])];
        let result = run(groups, &mut reporter, SchedulerConfig::new(0)).await;
        assert_eq!(result.err(), Some(SchedulerError::InvalidPoolSize));
        assert!(reporter.results.is_empty());
        assert_eq!(reporter.completions, 0);
    }

    #[tokio::test]
    async fn test_empty_group_rejected() {
        let mut reporter = RecordingReporter::default();
        let groups: Vec<Group<StubRunnable>> = vec![Group::new("empty", Vec::new())];
        let err = assert_err!(run(groups, &mut reporter, config()).await);
        assert_eq!(err, SchedulerError::EmptyGroup("empty".to_string()));
    }

    #[tokio::test]
    async fn test_no_groups() {
        let mut reporter = RecordingReporter::default();
        let report = assert_ok!(run(Vec::<Group<StubRunnable>>::new(), &mut reporter, config()).await);
        assert!(report.cases.is_empty());
        assert_eq!(reporter.completions, 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_every_case_finishes_once() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![
            Group::new(
                "a",
                vec![StubRunnable::ok("1"), StubRunnable::diff("2"), StubRunnable::ok("3")],
            ),
            Group::new("b", vec![StubRunnable::ok("1"), StubRunnable::ok("2")]),
            Group::new("c", vec![StubRunnable::panic("1"), StubRunnable::ok("2")]),
        ];

        let report = run(groups, &mut reporter, config()).await.unwrap();

        assert_eq!(report.cases.len(), 7);
        let ids: HashSet<_> = report.cases.iter().map(TestCase::id).collect();
        assert_eq!(ids.len(), 7);
        for case in &report.cases {
            assert_eq!(case.progress(), Progress::Finished);
            assert!(case.is_result_reported());
            assert_eq!(reporter.result_count(case.id()), 1);
        }
        assert_eq!(reporter.completions, 1);
        assert_eq!(report.report.len(), 7);

        assert_eq!(outcome_of(&report, "a/2"), Some(Outcome::Diff));
        assert_eq!(outcome_of(&report, "a/3"), Some(Outcome::Skip));
        assert_eq!(outcome_of(&report, "b/2"), Some(Outcome::Ok));
        assert_eq!(outcome_of(&report, "c/1"), Some(Outcome::Fatal));
        assert_eq!(outcome_of(&report, "c/2"), Some(Outcome::Skip));

        assert_eq!(report.hard_failures, 2);
        assert!(!report.breaker_tripped);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_group_order_preserved() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![Group::new(
            "seq",
            vec![
                StubRunnable::ok("1").sleeping(30),
                StubRunnable::ok("2").sleeping(10),
                StubRunnable::ok("3"),
            ],
        )];

        let report = run(groups, &mut reporter, config()).await.unwrap();

        let names: Vec<_> = report.cases.iter().map(TestCase::full_name).collect();
        assert_eq!(names, vec!["seq/1", "seq/2", "seq/3"]);
        for pair in report.cases.windows(2) {
            assert!(pair[0].finished_at() <= pair[1].started_at());
        }
    }

    #[tokio::test]
    async fn test_all_ok_exit_code() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![Group::new("a", vec![StubRunnable::ok("1")])];
        let report = run(groups, &mut reporter, config()).await.unwrap();
        assert_eq!(report.exit_code(), 0);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_circuit_breaker_skips_waiting() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![
            Group::new("first", vec![StubRunnable::diff("boom")]),
            Group::new(
                "second",
                vec![
                    StubRunnable::ok("1").sleeping(100),
                    StubRunnable::ok("2"),
                    StubRunnable::ok("3"),
                ],
            ),
        ];
        let config = SchedulerConfig::new(1)
            .with_isolation(Isolation::InProcess)
            .with_max_fail(0);

        let report = run(groups, &mut reporter, config).await.unwrap();

        assert!(report.breaker_tripped);
        assert_eq!(report.cases.len(), 4);
        assert_eq!(reporter.results.len(), 4);
        assert_eq!(outcome_of(&report, "first/boom"), Some(Outcome::Diff));

        // The second group may grab the freed slot before the breaker trips,
        // but anything still waiting at that point is skipped.
        let skipped = report.case("second/3").unwrap();
        assert_eq!(skipped.outcome(), Some(Outcome::Skip));
        assert!(skipped.message().unwrap().contains("max-fail of 0"));
        assert!(matches!(
            outcome_of(&report, "second/1"),
            Some(Outcome::Ok) | Some(Outcome::Skip)
        ));
    }

    #[tokio::test]
    async fn test_running_tests_finish_after_breaker() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![
            Group::new("slow", vec![StubRunnable::ok("long").sleeping(200)]),
            Group::new("fail", vec![StubRunnable::diff("quick")]),
        ];
        let config = SchedulerConfig::new(2)
            .with_isolation(Isolation::InProcess)
            .with_max_fail(0);

        let report = run(groups, &mut reporter, config).await.unwrap();

        assert!(report.breaker_tripped);
        assert_eq!(report.cases.len(), 2);
        assert_eq!(outcome_of(&report, "slow/long"), Some(Outcome::Ok));
        assert_eq!(outcome_of(&report, "fail/quick"), Some(Outcome::Diff));
        assert_eq!(report.cases[1].full_name(), "slow/long");
    }

    #[tokio::test]
    async fn test_breaker_ignores_non_hard_failures() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![
            Group::new("a", vec![StubRunnable::diff("1")]),
            Group::new("b", vec![StubRunnable::ok("1")]),
        ];
        let config = SchedulerConfig::new(1)
            .with_isolation(Isolation::InProcess)
            .with_max_fail(0)
            .with_policy(FailurePolicy::default().with_hard_failure(Outcome::Fatal));

        let report = run(groups, &mut reporter, config).await.unwrap();

        assert!(!report.breaker_tripped);
        assert_eq!(report.hard_failures, 0);
        assert_eq!(outcome_of(&report, "b/1"), Some(Outcome::Ok));
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_timeout_bounds_run() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![Group::new(
            "t",
            vec![StubRunnable::ok("hang").sleeping(300), StubRunnable::ok("after")],
        )];
        let config = config().with_timeout(Duration::from_millis(50));

        let report = run(groups, &mut reporter, config).await.unwrap();

        assert_eq!(outcome_of(&report, "t/hang"), Some(Outcome::Timeout));
        assert_eq!(outcome_of(&report, "t/after"), Some(Outcome::Skip));
        assert!(report.elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_progress_reported_while_running() {
        let mut reporter = RecordingReporter::default();
        let groups = vec![Group::new("p", vec![StubRunnable::ok("slow").sleeping(400)])];
        let config = config().with_progress_interval(Duration::from_millis(100));

        let report = run(groups, &mut reporter, config).await.unwrap();

        let id = report.cases[0].id();
        assert!(!reporter.progress.is_empty());
        assert!(reporter.progress.iter().all(|pid| *pid == id));
    }
}
