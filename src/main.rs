//! testsched - Concurrent test-group scheduler
//!
//! ## Usage
//!
//! ```bash
//! # Run ./testsched.yaml with 4 groups at a time
//! testsched run -j 4
//!
//! # Stop after the first hard failure, 30s per test
//! testsched run plan.yaml --max-fail 0 --timeout 30
//!
//! # Inspect a plan
//! testsched list plan.yaml --detailed
//! testsched validate plan.yaml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use tracing::{info, warn};

use testsched::cli::{self, Args, PlanArgs, RunArgs};
use testsched::config::{print_env_help, AppConfig, EnvConfig, TestPlan};
use testsched::executor::{serve, Isolation, Scheduler};
use testsched::output::ConsoleReporter;
use testsched::runnable::CommandWorkload;
use testsched::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The worker child talks to its parent over stdout; keep it free of logs.
    if !matches!(args.command, cli::Command::Worker) {
        init_logger(LogLevel::from_verbose(args.verbose));
    }

    match args.command {
        cli::Command::Worker => serve::<CommandWorkload>()?,
        cli::Command::Run(run_args) => {
            let code = run_plan(run_args).await?;
            std::process::exit(code);
        }
        cli::Command::List(plan_args) => list_tests(plan_args)?,
        cli::Command::Validate(plan_args) => validate_plan(plan_args)?,
        cli::Command::Env => print_env_help(),
    }

    Ok(())
}

/// Load the plan named on the command line, in TESTSCHED_PLAN or in a standard location
fn load_plan(plan: Option<&std::path::Path>, env: &EnvConfig) -> Result<TestPlan> {
    let requested = plan.map(|p| p.to_path_buf()).or_else(|| env.plan.clone());
    let (path, plan) = TestPlan::locate(requested.as_deref())?;
    info!(
        "Loaded plan {} ({} groups, {} tests)",
        path.display(),
        plan.groups.len(),
        plan.test_count()
    );
    Ok(plan)
}

async fn run_plan(args: RunArgs) -> Result<i32> {
    let env = EnvConfig::load()?;
    let plan = load_plan(args.plan.as_deref(), &env)?;
    let config = AppConfig::resolve([&plan.settings, &env.settings, &args.settings()])?;

    let isolation = if args.in_process {
        Isolation::InProcess
    } else {
        Isolation::current_exe()?
    };
    let scheduler = Scheduler::new(config.scheduler_config(isolation))?;

    let mut reporter = ConsoleReporter::new(config.format);
    if args.quiet {
        reporter = reporter.quiet();
    }
    if args.no_color || !std::io::stdout().is_terminal() {
        reporter = reporter.no_color();
    }

    let report = scheduler.run(plan.into_groups(), &mut reporter).await?;
    println!("{}", report.report);

    if let Some(path) = &args.output {
        std::fs::write(path, &report.report)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if report.breaker_tripped {
        warn!(
            "Run aborted after {} hard failures; waiting tests were skipped",
            report.hard_failures
        );
    }

    Ok(report.exit_code())
}

fn list_tests(args: PlanArgs) -> Result<()> {
    let env = EnvConfig::load()?;
    let plan = load_plan(args.plan.as_deref(), &env)?;

    println!("\nTest Plan:");
    println!("{:-<60}", "");
    for group in &plan.groups {
        println!("{} ({} tests)", group.name, group.tests.len());
        for test in &group.tests {
            if args.detailed {
                println!("  {:<24} {}", test.name, test.command_line());
            } else {
                println!("  {}", test.name);
            }
        }
    }
    println!("{:-<60}", "");
    println!("{} groups, {} tests", plan.groups.len(), plan.test_count());
    Ok(())
}

fn validate_plan(args: PlanArgs) -> Result<()> {
    let env = EnvConfig::load()?;
    let plan = load_plan(args.plan.as_deref(), &env)?;
    let config = AppConfig::resolve([&plan.settings, &env.settings])?;
    config.scheduler_config(Isolation::InProcess).validate()?;

    println!(
        "Plan OK: {} groups, {} tests, pool size {}",
        plan.groups.len(),
        plan.test_count(),
        config.pool_size
    );
    Ok(())
}
