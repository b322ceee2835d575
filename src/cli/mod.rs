//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Settings;

/// Concurrent test-group scheduler
#[derive(Parser, Debug)]
#[command(name = "testsched")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Run groups of tests concurrently with process-isolated workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every group of a test plan
    Run(RunArgs),

    /// List the groups and tests of a plan
    List(PlanArgs),

    /// Load and validate a plan without running it
    Validate(PlanArgs),

    /// Show the environment variables testsched reads
    Env,

    /// Worker child entry point
    #[command(name = "__worker", hide = true)]
    Worker,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Test plan (YAML or JSON); defaults to TESTSCHED_PLAN or ./testsched.yaml
    pub plan: Option<PathBuf>,

    /// Number of groups run at once [default: CPU count]
    #[arg(short = 'j', long = "pool-size")]
    pub pool_size: Option<usize>,

    /// Per-test timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Seconds between progress lines for a running test [default: 10]
    #[arg(long)]
    pub progress_interval: Option<f64>,

    /// Abort after more than N hard failures
    #[arg(long)]
    pub max_fail: Option<usize>,

    /// Report format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Lowest outcome counted as a hard failure (diff, timeout, fatal)
    #[arg(long)]
    pub hard_failure: Option<String>,

    /// Run workloads on threads of this process instead of child processes
    #[arg(long)]
    pub in_process: bool,

    /// Only print the final report
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Also write the report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Settings layer given on the command line
    pub fn settings(&self) -> Settings {
        Settings {
            pool_size: self.pool_size,
            timeout_secs: self.timeout,
            progress_interval_secs: self.progress_interval,
            max_fail: self.max_fail,
            format: self.format.clone(),
            hard_failure: self.hard_failure.clone(),
        }
    }
}

/// Arguments naming a plan
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Test plan (YAML or JSON); defaults to TESTSCHED_PLAN or ./testsched.yaml
    pub plan: Option<PathBuf>,

    /// Show the command line of every test
    #[arg(short, long)]
    pub detailed: bool,
}
