//! Child-process execution behind an injectable [`Executor`] trait.
//!
//! Reconcilers never spawn processes directly; they go through an
//! [`Executor`] so that unit tests can substitute a recording mock and so that
//! the accounts plugin can run against a relocated root without touching the
//! real user database (see [`EchoExecutor`]).
use anyhow::{Context as _, Result};
use std::io::Write as _;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::HoloError;

/// Result of a command execution.
#[derive(Debug)]
pub struct ExecResult {
    /// Captured standard output (lossily decoded).
    pub stdout: String,
    /// Captured standard error (lossily decoded).
    pub stderr: String,
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
}

impl From<Output> for ExecResult {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Abstraction over process execution.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run a command and return its output. Fails if the command exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or exits non-zero.
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a command in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or exits non-zero.
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Run a command with `stdin` piped to it and return its raw standard output.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be spawned or exits non-zero.
    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> Result<Vec<u8>>;

    /// Run a command, allowing failure (returns result without bailing).
    ///
    /// # Errors
    ///
    /// Returns an error only if the program cannot be spawned.
    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult>;

    /// Check if a program is available on `PATH`.
    fn which(&self, program: &str) -> bool;
}

/// Production [`Executor`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

/// Turn a finished process into an [`ExecResult`], failing on non-zero exit.
fn check(output: Output, label: &str) -> Result<ExecResult> {
    let result = ExecResult::from(output);
    if !result.success {
        return Err(HoloError::ExternalTool {
            program: label.to_string(),
            exit_code: result.code.unwrap_or(-1),
            stderr: result.stderr.trim().to_string(),
        }
        .into());
    }
    Ok(result)
}

impl Executor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute: {program}"))?;
        check(output, program)
    }

    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .output()
            .with_context(|| format!("failed to execute: {program} in {}", dir.display()))?;
        check(output, program)
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], stdin: &[u8]) -> Result<Vec<u8>> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to execute: {program}"))?;

        // Feed stdin from a separate thread so a child that writes a lot of
        // output before draining its input cannot deadlock us.
        let feeder = child.stdin.take().map(|mut pipe| {
            let input = stdin.to_vec();
            std::thread::spawn(move || pipe.write_all(&input))
        });

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for: {program}"))?;

        if let Some(handle) = feeder {
            match handle.join() {
                // EPIPE is fine: the child may legitimately ignore its input.
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    return Err(e).with_context(|| format!("writing stdin of {program}"));
                }
                _ => {}
            }
        }

        let stdout = output.stdout.clone();
        check(output, program)?;
        Ok(stdout)
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to execute: {program}"))?;

        Ok(ExecResult::from(output))
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// [`Executor`] that prints each command line on stdout instead of running it.
///
/// Used by the accounts plugin when `HOLO_ROOT_DIR` is not `/`: `useradd` and
/// friends always act on the real user database, so against a relocated
/// root the only safe thing to do is to report what would be executed.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoExecutor;

impl EchoExecutor {
    fn echo(program: &str, args: &[&str]) -> ExecResult {
        let line = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").ok();
        ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }
}

impl Executor for EchoExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        Ok(Self::echo(program, args))
    }

    fn run_in(&self, _dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult> {
        Ok(Self::echo(program, args))
    }

    fn run_with_stdin(&self, program: &str, args: &[&str], _stdin: &[u8]) -> Result<Vec<u8>> {
        Self::echo(program, args);
        Ok(Vec::new())
    }

    fn run_unchecked(&self, program: &str, args: &[&str]) -> Result<ExecResult> {
        Ok(Self::echo(program, args))
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Shared test helpers: a recording [`Executor`] mock.
#[cfg(test)]
pub mod test_helpers {
    use super::{ExecResult, Executor};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// A mock executor that records every invocation as a single
    /// space-joined command line and answers from a FIFO of
    /// `(success, stdout)` responses.
    ///
    /// When the queue is empty every call succeeds with empty output, which
    /// suits the account tools (their output is never inspected).
    #[derive(Debug, Default)]
    pub struct MockExecutor {
        responses: Mutex<VecDeque<(bool, String)>>,
        calls: Mutex<Vec<String>>,
        which_result: bool,
    }

    impl MockExecutor {
        /// Create a mock where every call succeeds.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock from an ordered list of `(success, stdout)` pairs.
        #[must_use]
        pub fn with_responses(responses: Vec<(bool, String)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        /// Set the value returned by every [`Executor::which`] call.
        #[must_use]
        pub const fn with_which(mut self, result: bool) -> Self {
            self.which_result = result;
            self
        }

        /// All recorded command lines, in call order.
        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map_or_else(|_| vec![], |g| g.clone())
        }

        fn record(&self, program: &str, args: &[&str]) -> (bool, String) {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(line);
            }
            self.responses
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or((true, String::new()))
        }

        fn checked(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
            let (success, stdout) = self.record(program, args);
            if success {
                Ok(ExecResult {
                    stdout,
                    stderr: String::new(),
                    success: true,
                    code: Some(0),
                })
            } else {
                anyhow::bail!("mock command failed: {program}")
            }
        }
    }

    impl Executor for MockExecutor {
        fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
            self.checked(program, args)
        }

        fn run_in(&self, _: &Path, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
            self.checked(program, args)
        }

        fn run_with_stdin(
            &self,
            program: &str,
            args: &[&str],
            _: &[u8],
        ) -> anyhow::Result<Vec<u8>> {
            self.checked(program, args).map(|r| r.stdout.into_bytes())
        }

        fn run_unchecked(&self, program: &str, args: &[&str]) -> anyhow::Result<ExecResult> {
            let (success, stdout) = self.record(program, args);
            Ok(ExecResult {
                stdout,
                stderr: String::new(),
                success,
                code: Some(i32::from(!success)),
            })
        }

        fn which(&self, _: &str) -> bool {
            self.which_result
        }
    }
}
