//! Test case state machine
//!
//! Wraps one runnable workload with its identity, progress, outcome and timing,
//! and drives the reporter callbacks for it.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::{Outcome, Progress};
use crate::output::Reporter;
use crate::runnable::{Execution, Runnable};

static NEXT_CASE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique test case identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(u64);

impl CaseId {
    /// Allocate the next id
    pub fn next() -> Self {
        CaseId(NEXT_CASE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one named check within a test case
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub outcome: Outcome,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CheckResult {
    pub fn new(
        outcome: Outcome,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            outcome,
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::new(Outcome::Skip, 0, "", message)
    }

    pub fn timeout() -> Self {
        Self::new(Outcome::Timeout, 1, "", "")
    }

    pub fn fatal(text: impl Into<String>) -> Self {
        Self::new(Outcome::Fatal, 1, "", text)
    }
}

/// Check results keyed by check name
pub type ResultMap = BTreeMap<String, CheckResult>;

/// Illegal use of the test case state machine
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{id} cannot move from {from} to {to}")]
    IllegalProgress {
        id: CaseId,
        from: Progress,
        to: Progress,
    },

    #[error("{0} already has an outcome")]
    OutcomeAlreadySet(CaseId),

    #[error("{0} already has results")]
    ResultsAlreadySet(CaseId),

    #[error("{0} is not running")]
    NotRunning(CaseId),

    #[error("{0} is not finished")]
    NotFinished(CaseId),

    #[error("{0} finished without an outcome")]
    MissingOutcome(CaseId),
}

/// Everything a group executor needs to run a test case
#[derive(Debug)]
pub struct Job<R> {
    pub id: CaseId,
    pub name: String,
    pub runnable: Arc<R>,
}

impl<R> Clone for Job<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            runnable: Arc::clone(&self.runnable),
        }
    }
}

/// Scheduler-side state of one runnable workload
#[derive(Debug)]
pub struct TestCase<R> {
    id: CaseId,
    name: String,
    group: String,
    runnable: Arc<R>,
    progress: Progress,
    outcome: Option<Outcome>,
    results: Option<ResultMap>,
    enqueued_at: DateTime<Local>,
    progress_changed_at: DateTime<Local>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
    progress_interval: Option<Duration>,
    last_progress_report: Option<DateTime<Local>>,
    result_reported: bool,
}

impl<R: Runnable> TestCase<R> {
    /// Create a waiting test case
    pub fn new(group: impl Into<String>, runnable: R, progress_interval: Option<Duration>) -> Self {
        let now = Local::now();
        Self {
            id: CaseId::next(),
            name: runnable.name().to_string(),
            group: group.into(),
            runnable: Arc::new(runnable),
            progress: Progress::Waiting,
            outcome: None,
            results: None,
            enqueued_at: now,
            progress_changed_at: now,
            started_at: None,
            finished_at: None,
            progress_interval,
            last_progress_report: None,
            result_reported: false,
        }
    }

    /// Run the workload on the calling thread. Faults are returned, not contained.
    pub fn execute(&self) -> anyhow::Result<Execution> {
        self.runnable.execute()
    }

    /// Handle given to the group executor
    pub fn job(&self) -> Job<R> {
        Job {
            id: self.id,
            name: self.name.clone(),
            runnable: Arc::clone(&self.runnable),
        }
    }
}

impl<R> TestCase<R> {
    pub fn id(&self) -> CaseId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the group the case belongs to
    pub fn group(&self) -> &str {
        &self.group
    }

    /// `group/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.group, self.name)
    }

    pub fn runnable(&self) -> &R {
        &self.runnable
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Final outcome, available once finished
    pub fn outcome(&self) -> Option<Outcome> {
        if self.progress == Progress::Finished {
            self.outcome
        } else {
            None
        }
    }

    pub fn results(&self) -> Option<&ResultMap> {
        self.results.as_ref()
    }

    pub fn enqueued_at(&self) -> DateTime<Local> {
        self.enqueued_at
    }

    pub fn progress_changed_at(&self) -> DateTime<Local> {
        self.progress_changed_at
    }

    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Local>> {
        self.finished_at
    }

    pub fn is_result_reported(&self) -> bool {
        self.result_reported
    }

    /// Time spent running, up to now if still running
    pub fn elapsed(&self) -> Duration {
        let Some(start) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.unwrap_or_else(Local::now);
        end.signed_duration_since(start)
            .to_std()
            .unwrap_or_default()
    }

    /// Explanation attached to the final outcome, if any
    ///
    /// FATAL text leads with the fault and trails with its trace, so the
    /// first line is used; other outcomes append their verdict last.
    pub fn message(&self) -> Option<String> {
        let outcome = self.outcome()?;
        if outcome.is_success() {
            return None;
        }
        let text = self
            .results
            .as_ref()?
            .values()
            .filter(|check| check.outcome == outcome)
            .map(|check| check.stderr.trim())
            .find(|text| !text.is_empty())?;
        let mut lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
        let line = if outcome == Outcome::Fatal {
            lines.next()
        } else {
            lines.last()
        };
        line.map(str::to_string)
    }

    /// Move progress forward by exactly one step
    pub fn set_progress(
        &mut self,
        progress: Progress,
        at: DateTime<Local>,
    ) -> Result<(), TransitionError> {
        let legal = matches!(
            (self.progress, progress),
            (Progress::Waiting, Progress::Running) | (Progress::Running, Progress::Finished)
        );
        if !legal {
            return Err(TransitionError::IllegalProgress {
                id: self.id,
                from: self.progress,
                to: progress,
            });
        }
        if progress == Progress::Finished && self.outcome.is_none() {
            return Err(TransitionError::MissingOutcome(self.id));
        }

        self.progress = progress;
        self.progress_changed_at = at;
        match progress {
            Progress::Running => self.started_at = Some(at),
            Progress::Finished => self.finished_at = Some(at),
            Progress::Waiting => {}
        }
        Ok(())
    }

    /// Record the outcome. Only legal once, while running.
    pub fn set_outcome(&mut self, outcome: Outcome) -> Result<(), TransitionError> {
        if self.progress != Progress::Running {
            return Err(TransitionError::NotRunning(self.id));
        }
        if self.outcome.is_some() {
            return Err(TransitionError::OutcomeAlreadySet(self.id));
        }
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Record the per-check results. Only legal once, while running.
    pub fn set_results(&mut self, results: ResultMap) -> Result<(), TransitionError> {
        if self.progress != Progress::Running {
            return Err(TransitionError::NotRunning(self.id));
        }
        if self.results.is_some() {
            return Err(TransitionError::ResultsAlreadySet(self.id));
        }
        self.results = Some(results);
        Ok(())
    }

    /// Apply outcome, results and the FINISHED transition together
    pub fn finish(
        &mut self,
        outcome: Outcome,
        results: ResultMap,
        at: DateTime<Local>,
    ) -> Result<(), TransitionError> {
        if self.progress != Progress::Running {
            return Err(TransitionError::IllegalProgress {
                id: self.id,
                from: self.progress,
                to: Progress::Finished,
            });
        }
        if self.outcome.is_some() {
            return Err(TransitionError::OutcomeAlreadySet(self.id));
        }
        if self.results.is_some() {
            return Err(TransitionError::ResultsAlreadySet(self.id));
        }
        self.outcome = Some(outcome);
        self.results = Some(results);
        self.set_progress(Progress::Finished, at)
    }

    /// Invoke the reporter's result callback. Returns false if it already ran.
    pub fn report_result<P: Reporter>(&mut self, reporter: &mut P) -> Result<bool, TransitionError>
    where
        R: Runnable,
    {
        if self.progress != Progress::Finished {
            return Err(TransitionError::NotFinished(self.id));
        }
        if self.result_reported {
            return Ok(false);
        }
        self.result_reported = true;
        reporter.report_result(self);
        Ok(true)
    }

    /// Invoke the reporter's progress callback if running and the interval has elapsed
    pub fn report_progress<P: Reporter>(&mut self, reporter: &mut P) -> bool
    where
        R: Runnable,
    {
        self.report_progress_at(Local::now(), reporter)
    }

    pub(crate) fn report_progress_at<P: Reporter>(
        &mut self,
        now: DateTime<Local>,
        reporter: &mut P,
    ) -> bool
    where
        R: Runnable,
    {
        if self.progress != Progress::Running {
            return false;
        }
        let Some(interval) = self.progress_interval else {
            return false;
        };
        let since = self.last_progress_report.unwrap_or(self.progress_changed_at);
        let waited = now.signed_duration_since(since).to_std().unwrap_or_default();
        if waited < interval {
            return false;
        }
        self.last_progress_report = Some(now);
        reporter.report_progress(self);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::RecordingReporter;
    use crate::runnable::tests::StubRunnable;

    fn case(interval: Option<Duration>) -> TestCase<StubRunnable> {
        TestCase::new("group", StubRunnable::ok("stub"), interval)
    }

    #[test]
    fn test_ids_are_unique() {
        let a = case(None);
        let b = case(None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.full_name(), "group/stub");
    }

    #[test]
    fn test_happy_path() {
        let mut tc = case(None);
        let now = Local::now();
        assert_eq!(tc.progress(), Progress::Waiting);

        tc.set_progress(Progress::Running, now).unwrap();
        assert_eq!(tc.started_at(), Some(now));
        assert_eq!(tc.outcome(), None);

        let mut results = ResultMap::new();
        results.insert("stub".into(), CheckResult::new(Outcome::Ok, 0, "hi", ""));
        tc.finish(Outcome::Ok, results, now).unwrap();

        assert_eq!(tc.progress(), Progress::Finished);
        assert_eq!(tc.outcome(), Some(Outcome::Ok));
        assert_eq!(tc.message(), None);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut tc = case(None);
        let now = Local::now();

        assert!(tc.set_progress(Progress::Waiting, now).is_err());
        assert!(tc.set_progress(Progress::Finished, now).is_err());
        assert_eq!(
            tc.set_outcome(Outcome::Ok),
            Err(TransitionError::NotRunning(tc.id()))
        );

        tc.set_progress(Progress::Running, now).unwrap();
        assert!(tc.set_progress(Progress::Running, now).is_err());
        assert!(tc.set_progress(Progress::Waiting, now).is_err());
        assert_eq!(
            tc.set_progress(Progress::Finished, now),
            Err(TransitionError::MissingOutcome(tc.id()))
        );

        tc.set_outcome(Outcome::Diff).unwrap();
        assert_eq!(
            tc.set_outcome(Outcome::Ok),
            Err(TransitionError::OutcomeAlreadySet(tc.id()))
        );
        tc.set_results(ResultMap::new()).unwrap();
        assert!(tc.set_results(ResultMap::new()).is_err());
        tc.set_progress(Progress::Finished, now).unwrap();
        assert!(tc.set_progress(Progress::Finished, now).is_err());
    }

    #[test]
    fn test_report_result_once() {
        let mut tc = case(None);
        let mut reporter = RecordingReporter::default();
        let now = Local::now();

        tc.set_progress(Progress::Running, now).unwrap();
        assert_eq!(
            tc.report_result(&mut reporter),
            Err(TransitionError::NotFinished(tc.id()))
        );

        tc.finish(Outcome::Ok, ResultMap::new(), now).unwrap();
        assert_eq!(tc.report_result(&mut reporter), Ok(true));
        assert_eq!(tc.report_result(&mut reporter), Ok(false));
        assert_eq!(reporter.results.len(), 1);
    }

    #[test]
    fn test_report_progress_throttled() {
        let mut tc = case(Some(Duration::from_secs(5)));
        let mut reporter = RecordingReporter::default();
        let start = Local::now();

        assert!(!tc.report_progress_at(start, &mut reporter));

        tc.set_progress(Progress::Running, start).unwrap();
        assert!(!tc.report_progress_at(start + chrono::Duration::seconds(2), &mut reporter));
        assert!(tc.report_progress_at(start + chrono::Duration::seconds(5), &mut reporter));
        assert!(!tc.report_progress_at(start + chrono::Duration::seconds(7), &mut reporter));
        assert!(tc.report_progress_at(start + chrono::Duration::seconds(11), &mut reporter));
        assert_eq!(reporter.progress.len(), 2);

        tc.finish(Outcome::Ok, ResultMap::new(), start).unwrap();
        assert!(!tc.report_progress_at(start + chrono::Duration::seconds(60), &mut reporter));
    }

    #[test]
    fn test_no_progress_without_interval() {
        let mut tc = case(None);
        let mut reporter = RecordingReporter::default();
        let start = Local::now();
        tc.set_progress(Progress::Running, start).unwrap();
        assert!(!tc.report_progress_at(start + chrono::Duration::hours(1), &mut reporter));
    }

    #[test]
    fn test_message_picks_matching_check() {
        let mut tc = case(None);
        let now = Local::now();
        tc.set_progress(Progress::Running, now).unwrap();

        let mut results = ResultMap::new();
        results.insert("a".into(), CheckResult::new(Outcome::Ok, 0, "", "noise"));
        results.insert("b".into(), CheckResult::skip("first\nskipped: a failed"));
        tc.finish(Outcome::Skip, results, now).unwrap();

        assert_eq!(tc.message().as_deref(), Some("skipped: a failed"));
    }

    #[test]
    fn test_fatal_message_is_fault_not_trace() {
        let mut tc = case(None);
        let now = Local::now();
        tc.set_progress(Progress::Running, now).unwrap();

        let trace = "Failed to launch `/nonexistent/prog`\n\nCaused by:\n    \
                     No such file or directory (os error 2)\n\nStack backtrace:\n   \
                     0: anyhow::error::context\n  40: _start\n";
        let mut results = ResultMap::new();
        results.insert("stub".into(), CheckResult::fatal(trace));
        tc.finish(Outcome::Fatal, results, now).unwrap();

        assert_eq!(
            tc.message().as_deref(),
            Some("Failed to launch `/nonexistent/prog`")
        );
    }

    #[test]
    fn test_failed_finish_changes_nothing() {
        let mut tc = case(None);
        let now = Local::now();

        assert!(tc.finish(Outcome::Ok, ResultMap::new(), now).is_err());
        assert_eq!(tc.progress(), Progress::Waiting);
        assert!(tc.results().is_none());

        tc.set_progress(Progress::Running, now).unwrap();
        tc.set_results(ResultMap::new()).unwrap();
        assert_eq!(
            tc.finish(Outcome::Diff, ResultMap::new(), now),
            Err(TransitionError::ResultsAlreadySet(tc.id()))
        );
        assert_eq!(tc.progress(), Progress::Running);
        // the outcome was not half-applied, so it can still be set
        assert!(tc.set_outcome(Outcome::Diff).is_ok());
        assert!(tc.set_progress(Progress::Finished, now).is_ok());
    }

    #[test]
    fn test_execute_delegates() {
        let tc = case(None);
        let execution = tc.execute().unwrap();
        assert_eq!(execution.outcome, Outcome::Ok);
    }
}
