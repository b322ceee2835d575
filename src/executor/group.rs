//! Group executor
//!
//! Runs the tests of one group strictly in order, skipping the rest of the
//! group after a failure and enforcing the per-test timeout.

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedSender, watch, Semaphore};
use tracing::{debug, info, warn};

use super::event::Event;
use super::worker::{spawn_worker, Isolation};
use crate::models::{CheckResult, FailurePolicy, Job, Outcome};
use crate::runnable::{Execution, Runnable};

/// Sequential runner for one group
pub struct GroupExecutor<R> {
    name: String,
    jobs: Vec<Job<R>>,
    events: UnboundedSender<Event>,
    timeout: Option<Duration>,
    isolation: Isolation,
    policy: FailurePolicy,
    cancel: watch::Receiver<bool>,
}

impl<R: Runnable> GroupExecutor<R> {
    pub fn new(
        name: impl Into<String>,
        jobs: Vec<Job<R>>,
        events: UnboundedSender<Event>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name: name.into(),
            jobs,
            events,
            timeout: None,
            isolation: Isolation::InProcess,
            policy: FailurePolicy::default(),
            cancel,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait for a pool slot, then run the group
    ///
    /// Returns without running anything if the run is cancelled first.
    pub async fn run_pooled(mut self, pool: Arc<Semaphore>) {
        let permit = tokio::select! {
            permit = pool.acquire_owned() => permit,
            _ = self.cancel.wait_for(|cancelled| *cancelled) => {
                debug!("Group {} cancelled before it started", self.name);
                return;
            }
        };
        let Ok(_permit) = permit else {
            return;
        };
        self.run().await;
    }

    /// Run every test in order, posting RUNNING and FINISHED for each
    pub async fn run(self) {
        info!("Starting group {} ({} tests)", self.name, self.jobs.len());
        let mut skip_message: Option<String> = None;

        for job in &self.jobs {
            if !self.post(Event::Running {
                id: job.id,
                at: Local::now(),
            }) {
                return;
            }

            // Checked after RUNNING so a cancel that raced it never spawns a worker.
            if self.cancelled() {
                info!("Group {} stopped: run cancelled before {} started", self.name, job.name);
                let skip = CheckResult::skip("Skipped because the run was cancelled");
                self.post(Event::Finished {
                    id: job.id,
                    at: Local::now(),
                    execution: Execution::single(&job.name, skip),
                });
                return;
            }

            let execution = match &skip_message {
                Some(message) => Execution::single(&job.name, CheckResult::skip(message.clone())),
                None => self.execute(job).await,
            };

            let outcome = execution.outcome;
            if !self.post(Event::Finished {
                id: job.id,
                at: Local::now(),
                execution,
            }) {
                return;
            }

            if skip_message.is_none() && self.policy.cascades(outcome) {
                debug!("{} finished {outcome}; skipping rest of {}", job.name, self.name);
                skip_message = Some(format!(
                    "Skipped because {:?} in group {:?} finished with {outcome}",
                    job.name, self.name
                ));
            }
        }

        info!("Finished group {}", self.name);
    }

    /// Run one test behind the worker boundary, bounded by the timeout
    async fn execute(&self, job: &Job<R>) -> Execution {
        let mut worker = spawn_worker(job, &self.isolation);

        let Some(timeout) = self.timeout else {
            return worker.wait().await;
        };

        match tokio::time::timeout(timeout, worker.wait()).await {
            Ok(execution) => execution,
            Err(_) => {
                warn!(
                    "{} exceeded timeout of {:.1}s; terminating worker",
                    job.name,
                    timeout.as_secs_f64()
                );
                worker.kill().await;
                Execution::single(&job.name, CheckResult::timeout())
            }
        }
    }

    /// Send an event to the driver. False once the driver has gone away.
    fn post(&self, event: Event) -> bool {
        if self.events.send(event).is_err() {
            debug!("Driver gone; stopping group {}", self.name);
            return false;
        }
        true
    }
}
