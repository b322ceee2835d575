//! Serializable run summary
//!
//! Flattened view of a completed run used by the JSON and CSV renderers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::models::{CheckResult, Outcome, TestCase};

/// One named check of a finished case, with its captured output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub name: String,
    pub outcome: Outcome,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CheckRecord {
    pub fn new(name: &str, check: &CheckResult) -> Self {
        Self {
            name: name.to_string(),
            outcome: check.outcome,
            exit_code: check.exit_code,
            stdout: check.stdout.clone(),
            stderr: check.stderr.clone(),
        }
    }
}

/// One finished test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: u64,
    pub group: String,
    pub name: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Per-check results in name order
    #[serde(default)]
    pub checks: Vec<CheckRecord>,
}

impl CaseRecord {
    /// Build from a finished case. Unfinished cases yield `None`.
    pub fn from_case<R>(case: &TestCase<R>) -> Option<Self> {
        Some(Self {
            id: case.id().get(),
            group: case.group().to_string(),
            name: case.name().to_string(),
            outcome: case.outcome()?,
            duration_ms: case.elapsed().as_millis() as u64,
            message: case.message(),
            started_at: case.started_at(),
            finished_at: case.finished_at(),
            checks: case
                .results()
                .map(|results| {
                    results
                        .iter()
                        .map(|(name, check)| CheckRecord::new(name, check))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}

impl fmt::Display for CaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:7} {}/{} [{}ms]",
            self.outcome.symbol(),
            self.outcome,
            self.group,
            self.name,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Totals over a completed run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub ok: usize,
    pub skipped: usize,
    pub diff: usize,
    pub timeout: usize,
    pub fatal: usize,
    pub duration_ms: u64,
    pub cases: Vec<CaseRecord>,
}

impl RunSummary {
    pub fn new(cases: Vec<CaseRecord>, duration: Duration) -> Self {
        let count = |outcome: Outcome| cases.iter().filter(|c| c.outcome == outcome).count();

        Self {
            total: cases.len(),
            ok: count(Outcome::Ok),
            skipped: count(Outcome::Skip),
            diff: count(Outcome::Diff),
            timeout: count(Outcome::Timeout),
            fatal: count(Outcome::Fatal),
            duration_ms: duration.as_millis() as u64,
            cases,
        }
    }

    pub fn from_cases<R>(cases: &[TestCase<R>], duration: Duration) -> Self {
        Self::new(cases.iter().filter_map(CaseRecord::from_case).collect(), duration)
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.ok as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.ok == self.total
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for case in &self.cases {
            writeln!(f, "  {case}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | OK: {} | Skip: {} | Diff: {} | Timeout: {} | Fatal: {}",
            self.total, self.ok, self.skipped, self.diff, self.timeout, self.fatal
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.duration_ms
        )
    }
}
