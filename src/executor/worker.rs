//! Worker boundary
//!
//! Runs one test's workload in an isolated child process and turns every
//! fault into a FATAL execution. The parent ships the serialized workload on
//! the child's stdin; the child answers with a single marker-prefixed JSON
//! line on stdout and exits.
//!
//! Timeouts are not handled here. The caller races [`Worker::wait`] against
//! its own deadline and calls [`Worker::kill`] when the deadline wins.

use anyhow::{Context, Result};
use std::any::Any;
use std::backtrace::Backtrace;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::{CheckResult, Job};
use crate::runnable::{Execution, Runnable};

/// Hidden subcommand the worker executable answers to
pub const WORKER_SUBCOMMAND: &str = "__worker";

/// Set in every worker child's environment
pub const WORKER_ENV: &str = "TESTSCHED_WORKER";

/// Prefix of the result line written by the worker child
const RESULT_MARKER: &str = "@@testsched-result@@ ";

/// Most recent panic report in this process, filled by the worker panic hook
static LAST_PANIC: Mutex<Option<String>> = Mutex::new(None);

/// Where workloads execute
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Isolation {
    /// One child process per test, started as `program args...`
    Process { program: PathBuf, args: Vec<String> },

    /// A blocking thread in the scheduler's own process. Faults are still
    /// contained, but a timed-out thread can only be abandoned, not killed.
    InProcess,
}

impl Isolation {
    /// Re-run the current executable with the worker subcommand
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate current executable")?;
        Ok(Self::worker_exe(program))
    }

    /// Run `program __worker` for every test
    pub fn worker_exe(program: impl Into<PathBuf>) -> Self {
        Isolation::Process {
            program: program.into(),
            args: vec![WORKER_SUBCOMMAND.to_string()],
        }
    }

    pub fn is_process(&self) -> bool {
        matches!(self, Isolation::Process { .. })
    }
}

/// Process isolation through the current executable
///
/// The executable must dispatch [`WORKER_SUBCOMMAND`] to [`serve`]. One that
/// does not re-runs its own `main` in every child; those children see
/// [`WORKER_ENV`] and fall back to in-process execution, so the re-entry
/// stops one level down instead of spawning without bound. Embedders whose
/// binary has no worker entry point should pick [`Isolation::InProcess`] or
/// [`Isolation::worker_exe`] explicitly.
impl Default for Isolation {
    fn default() -> Self {
        Self::default_for(std::env::var_os(WORKER_ENV).is_some())
    }
}

impl Isolation {
    fn default_for(inside_worker: bool) -> Self {
        if inside_worker {
            warn!(
                "{WORKER_ENV} is set: a worker process is scheduling tests; running workloads in-process"
            );
            return Isolation::InProcess;
        }
        Self::current_exe().unwrap_or_else(|e| {
            warn!("{e:#}; running workloads in-process");
            Isolation::InProcess
        })
    }
}

/// Handle to a running workload
pub struct Worker {
    name: String,
    inner: WorkerInner,
}

enum WorkerInner {
    Process(ProcessWorker),
    Thread(JoinHandle<Execution>),
    Done(Option<Execution>),
}

struct ProcessWorker {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// Start the workload of `job` behind the configured isolation
///
/// Never fails: a worker that cannot be started yields a FATAL execution
/// from [`Worker::wait`].
pub fn spawn_worker<R: Runnable>(job: &Job<R>, isolation: &Isolation) -> Worker {
    let inner = match isolation {
        Isolation::Process { program, args } => {
            match spawn_process(job, program, args) {
                Ok(process) => WorkerInner::Process(process),
                Err(e) => {
                    warn!("Failed to start worker for {}: {e:#}", job.name);
                    WorkerInner::Done(Some(fatal(&job.name, format!("{e:?}"))))
                }
            }
        }
        Isolation::InProcess => {
            let runnable = job.runnable.clone();
            WorkerInner::Thread(tokio::task::spawn_blocking(move || contain(&*runnable)))
        }
    };

    Worker {
        name: job.name.clone(),
        inner,
    }
}

fn spawn_process<R: Runnable>(
    job: &Job<R>,
    program: &Path,
    args: &[String],
) -> Result<ProcessWorker> {
    let payload = serde_json::to_vec(&*job.runnable)
        .with_context(|| format!("Failed to serialize workload {}", job.name))?;

    let mut command = std::process::Command::new(program);
    command
        .args(args)
        .env(WORKER_ENV, "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    set_process_group(&mut command);

    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn worker {}", program.display()))?;
    debug!("Spawned worker {:?} for {}", child.id(), job.name);

    if let Some(mut stdin) = child.stdin.take() {
        let name = job.name.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Failed to send workload to worker for {name}: {e}");
            }
        });
    }

    let stdout = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    Ok(ProcessWorker {
        child,
        stdout,
        stderr,
    })
}

impl Worker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the workload to finish. Cancel safe.
    pub async fn wait(&mut self) -> Execution {
        match &mut self.inner {
            WorkerInner::Process(process) => {
                let status = match process.child.wait().await {
                    Ok(status) => status,
                    Err(e) => return fatal(&self.name, format!("Failed to wait for worker: {e}")),
                };
                let stdout = collect(process.stdout.take()).await;
                let stderr = collect(process.stderr.take()).await;
                let execution = decode_result(&self.name, status, &stdout, &stderr);
                self.inner = WorkerInner::Done(None);
                execution
            }
            WorkerInner::Thread(handle) => {
                let execution = match handle.await {
                    Ok(execution) => execution,
                    Err(e) => fatal(&self.name, format!("Worker thread failed: {e}")),
                };
                self.inner = WorkerInner::Done(None);
                execution
            }
            WorkerInner::Done(execution) => execution
                .take()
                .unwrap_or_else(|| fatal(&self.name, "Worker result was already collected")),
        }
    }

    /// Forcibly stop the workload and reclaim its resources
    pub async fn kill(&mut self) {
        match &mut self.inner {
            WorkerInner::Process(process) => {
                kill_process_group(&process.child);
                if let Err(e) = process.child.start_kill() {
                    debug!("Worker for {} already gone: {e}", self.name);
                }
                if let Err(e) = process.child.wait().await {
                    warn!("Failed to reap worker for {}: {e}", self.name);
                }
                if let Some(handle) = process.stdout.take() {
                    handle.abort();
                }
                if let Some(handle) = process.stderr.take() {
                    handle.abort();
                }
            }
            WorkerInner::Thread(_) => {
                warn!(
                    "In-process worker for {} cannot be killed; abandoning its thread",
                    self.name
                );
            }
            WorkerInner::Done(_) => {}
        }
        self.inner = WorkerInner::Done(None);
    }
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Turn the worker child's output into an execution
fn decode_result(name: &str, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Execution {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);

    match stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_MARKER))
    {
        Some(line) => serde_json::from_str(line).unwrap_or_else(|e| {
            fatal(name, format!("Worker sent an unreadable result: {e}\n{stderr}"))
        }),
        None => fatal(
            name,
            format!("Worker exited without a result ({status})\n{}", stderr.trim_end()),
        ),
    }
}

/// FATAL execution for `name` carrying `text`
fn fatal(name: &str, text: impl Into<String>) -> Execution {
    Execution::single(name, CheckResult::fatal(text))
}

/// Run the workload, converting errors and panics into FATAL
pub(crate) fn contain<R: Runnable>(runnable: &R) -> Execution {
    let name = runnable.name();
    match panic::catch_unwind(AssertUnwindSafe(|| runnable.execute())) {
        Ok(Ok(execution)) => execution,
        Ok(Err(error)) => fatal(name, format!("{error:?}")),
        Err(payload) => {
            let report = LAST_PANIC
                .lock()
                .ok()
                .and_then(|mut last| last.take())
                .unwrap_or_else(|| format!("panicked: {}", panic_message(&*payload)));
            fatal(name, report)
        }
    }
}

/// Panic text with the message on the first line and the trace after it
fn panic_report(location: Option<&str>, message: &str, trace: &dyn std::fmt::Display) -> String {
    match location {
        Some(location) => format!("panicked at {location}: {message}\nstack backtrace:\n{trace}"),
        None => format!("panicked: {message}\nstack backtrace:\n{trace}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Entry point of the worker child process
///
/// Reads a serialized `R` from stdin, runs it and writes the result line.
pub fn serve<R: Runnable>() -> Result<()> {
    panic::set_hook(Box::new(|info| {
        let location = info.location().map(|l| l.to_string());
        let report = panic_report(
            location.as_deref(),
            &panic_message(info.payload()),
            &Backtrace::force_capture(),
        );
        if let Ok(mut last) = LAST_PANIC.lock() {
            *last = Some(report);
        }
    }));

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read workload from stdin")?;
    let runnable: R = serde_json::from_str(&input).context("Failed to decode workload")?;

    let execution = contain(&runnable);
    let line = serde_json::to_string(&execution).context("Failed to encode result")?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{RESULT_MARKER}{line}").context("Failed to write result")?;
    stdout.flush().context("Failed to flush result")?;
    Ok(())
}

#[cfg(unix)]
fn set_process_group(command: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn set_process_group(_command: &mut std::process::Command) {}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The worker leads its own process group, so this also reaches
        // programs the workload started.
        unsafe {
            libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
