//! Outcome and progress models
//!
//! Defines the severity-ordered outcome taxonomy and the thresholds derived from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Final disposition of a test case, in increasing order of severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Ok,
    Skip,
    Diff,
    Timeout,
    Fatal,
}

/// Results above this level skip the remaining tests of the same group.
pub const CASCADE_THRESHOLD: Outcome = Outcome::Ok;

/// Results at or above this level count toward the max-fail circuit breaker.
pub const HARD_FAILURE_THRESHOLD: Outcome = Outcome::Diff;

impl Outcome {
    /// Severity level. Several outcomes share a level.
    pub fn level(&self) -> u8 {
        match self {
            Outcome::Ok | Outcome::Skip => 0,
            Outcome::Diff | Outcome::Timeout => 1,
            Outcome::Fatal => 2,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Ok => "✓",
            Outcome::Skip => "○",
            Outcome::Diff => "✗",
            Outcome::Timeout => "⏱",
            Outcome::Fatal => "!",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Ok => "OK",
            Outcome::Skip => "SKIP",
            Outcome::Diff => "DIFF",
            Outcome::Timeout => "TIMEOUT",
            Outcome::Fatal => "FATAL",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn all() -> [Outcome; 5] {
        [
            Outcome::Ok,
            Outcome::Skip,
            Outcome::Diff,
            Outcome::Timeout,
            Outcome::Fatal,
        ]
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" => Ok(Outcome::Ok),
            "skip" => Ok(Outcome::Skip),
            "diff" => Ok(Outcome::Diff),
            "timeout" => Ok(Outcome::Timeout),
            "fatal" => Ok(Outcome::Fatal),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Lifecycle of a test case. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Progress {
    Waiting,
    Running,
    Finished,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Waiting => write!(f, "WAITING"),
            Progress::Running => write!(f, "RUNNING"),
            Progress::Finished => write!(f, "FINISHED"),
        }
    }
}

/// The two thresholds applied to outcome severity during a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Outcomes with a level strictly above this one cascade within a group
    pub cascade: Outcome,
    /// Outcomes with a level at or above this one are hard failures
    pub hard_failure: Outcome,
}

impl FailurePolicy {
    pub fn new(cascade: Outcome, hard_failure: Outcome) -> Self {
        Self {
            cascade,
            hard_failure,
        }
    }

    pub fn with_hard_failure(mut self, hard_failure: Outcome) -> Self {
        self.hard_failure = hard_failure;
        self
    }

    /// Whether `outcome` causes the rest of its group to be skipped
    pub fn cascades(&self, outcome: Outcome) -> bool {
        outcome.level() > self.cascade.level()
    }

    /// Whether `outcome` increments the run's failure count
    pub fn is_hard_failure(&self, outcome: Outcome) -> bool {
        outcome.level() >= self.hard_failure.level()
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::new(CASCADE_THRESHOLD, HARD_FAILURE_THRESHOLD)
    }
}
