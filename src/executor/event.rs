//! Lifecycle events posted by group executors

use chrono::{DateTime, Local};

use crate::models::{CaseId, Progress};
use crate::runnable::Execution;

/// A test case changed progress
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Running {
        id: CaseId,
        at: DateTime<Local>,
    },
    Finished {
        id: CaseId,
        at: DateTime<Local>,
        execution: Execution,
    },
}

impl Event {
    pub fn id(&self) -> CaseId {
        match self {
            Event::Running { id, .. } | Event::Finished { id, .. } => *id,
        }
    }

    pub fn progress(&self) -> Progress {
        match self {
            Event::Running { .. } => Progress::Running,
            Event::Finished { .. } => Progress::Finished,
        }
    }
}
