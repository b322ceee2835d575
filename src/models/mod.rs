//! Data models for scheduled test runs
//!
//! Outcome taxonomy, progress states, groups and the per-test state machine.

mod group;
mod outcome;
mod test_case;

pub use group::Group;
pub use outcome::{FailurePolicy, Outcome, Progress, CASCADE_THRESHOLD, HARD_FAILURE_THRESHOLD};
pub use test_case::{CaseId, CheckResult, Job, ResultMap, TestCase, TransitionError};
