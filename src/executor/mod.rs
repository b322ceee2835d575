//! Test execution engine
//!
//! Group executors run each group sequentially behind a worker boundary;
//! the driver runs groups concurrently on a bounded pool.

mod driver;
mod event;
mod group;
mod worker;

pub use driver::{default_pool_size, run, RunReport, Scheduler, SchedulerConfig, SchedulerError};
pub use event::Event;
pub use group::GroupExecutor;
pub use worker::{serve, spawn_worker, Isolation, Worker, WORKER_ENV, WORKER_SUBCOMMAND};
