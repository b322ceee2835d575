//! Runnable workloads
//!
//! The scheduler runs anything implementing [`Runnable`]. Workloads must be
//! serializable so they can be shipped to an isolated worker process.

mod command;

pub use command::CommandWorkload;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::models::{CheckResult, Outcome, ResultMap};

/// What a workload reports when it runs to completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub outcome: Outcome,
    pub results: ResultMap,
}

impl Execution {
    pub fn new(outcome: Outcome, results: ResultMap) -> Self {
        Self { outcome, results }
    }

    /// Execution made of a single named check
    pub fn single(name: impl Into<String>, check: CheckResult) -> Self {
        let outcome = check.outcome;
        let mut results = ResultMap::new();
        results.insert(name.into(), check);
        Self { outcome, results }
    }

    /// Add a check, raising the overall outcome if it is more severe
    pub fn with_check(mut self, name: impl Into<String>, check: CheckResult) -> Self {
        self.outcome = self.outcome.max(check.outcome);
        self.results.insert(name.into(), check);
        self
    }
}

/// A unit of work the scheduler can run
///
/// `execute` runs synchronously and may fail or panic; containing that is the
/// worker boundary's job.
pub trait Runnable: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name used in result maps, messages and reports
    fn name(&self) -> &str;

    fn execute(&self) -> anyhow::Result<Execution>;
}
