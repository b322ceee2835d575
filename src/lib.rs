//! testsched - concurrent test-group scheduler
//!
//! Runs groups of tests on a bounded pool. Tests within a group run in
//! order, one at a time, each in its own worker process; a failure skips
//! the rest of its group, and a max-fail circuit breaker stops the run.
//!
//! ```no_run
//! use testsched::executor::{Isolation, Scheduler, SchedulerConfig};
//! use testsched::models::Group;
//! use testsched::output::{ConsoleReporter, OutputFormat};
//! use testsched::runnable::CommandWorkload;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let groups = vec![Group::new(
//!     "smoke",
//!     vec![CommandWorkload::shell("hello", "echo hello").expect_stdout("hello")],
//! )];
//! let scheduler = Scheduler::new(SchedulerConfig::new(4).with_isolation(Isolation::InProcess))?;
//! let mut reporter = ConsoleReporter::new(OutputFormat::Summary);
//! let report = scheduler.run(groups, &mut reporter).await?;
//! println!("{}", report.report);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod executor;
pub mod models;
pub mod output;
pub mod runnable;
pub mod utils;
