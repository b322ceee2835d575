//! Command workload
//!
//! Runs an external program and checks its exit code and output.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use super::{Execution, Runnable};
use crate::models::{CheckResult, Outcome};

/// A test that runs one program to completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandWorkload {
    /// Test name, unique within its group
    pub name: String,

    /// Program to run
    pub program: String,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Expected exit code
    #[serde(default)]
    pub expect_exit: i32,

    /// Text that must appear in stdout
    #[serde(default)]
    pub expect_stdout: Option<String>,
}

impl CommandWorkload {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            expect_exit: 0,
            expect_stdout: None,
        }
    }

    /// Shell one-liner run through `sh -c`
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(name, "sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn expect_exit(mut self, code: i32) -> Self {
        self.expect_exit = code;
        self
    }

    pub fn expect_stdout(mut self, text: impl Into<String>) -> Self {
        self.expect_stdout = Some(text.into());
        self
    }

    /// Command line as it would be typed
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Runnable for CommandWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self) -> Result<Execution> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let output = command
            .output()
            .with_context(|| format!("Failed to launch `{}`", self.command_line()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let (outcome, exit_code) = match output.status.code() {
            Some(code) if code == self.expect_exit => (Outcome::Ok, code),
            Some(code) => {
                push_line(
                    &mut stderr,
                    format!("exit code {code}, expected {}", self.expect_exit),
                );
                (Outcome::Diff, code)
            }
            None => {
                push_line(&mut stderr, format!("terminated by signal ({})", output.status));
                (Outcome::Fatal, -1)
            }
        };

        let mut execution = Execution::single(
            &self.name,
            CheckResult::new(outcome, exit_code, stdout.clone(), stderr),
        );

        if let Some(expected) = &self.expect_stdout {
            let check = if stdout.contains(expected.as_str()) {
                CheckResult::new(Outcome::Ok, 0, "", "")
            } else {
                CheckResult::new(
                    Outcome::Diff,
                    1,
                    "",
                    format!("stdout does not contain {expected:?}"),
                )
            };
            execution = execution.with_check(format!("{}:stdout", self.name), check);
        }

        Ok(execution)
    }
}

fn push_line(buf: &mut String, line: String) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(&line);
}
