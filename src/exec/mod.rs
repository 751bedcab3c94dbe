//! Command execution abstraction.
//!
//! Every external tool (docker, kind, kubectl) is driven through the
//! [`CommandRunner`] trait so the orchestration logic stays independent of the
//! process machinery and can be tested deterministically with the
//! [`mock::MockRunner`] double.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, Result};

pub mod mock;

/// Result of a completed command execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResult {
    /// Process exit code; `-1` for a synthetic timeout result
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandResult {
    /// A successful result with the given stdout
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True when the command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options controlling a single command invocation.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Extra environment variables layered over the inherited environment
    pub env: Vec<(String, String)>,
    /// Working directory for the command
    pub cwd: Option<PathBuf>,
    /// Wall-clock bound; expiry yields a synthetic exit code `-1` result
    pub timeout: Option<Duration>,
    /// Raise [`Error::Command`] on non-zero exit instead of returning the result
    pub check: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            cwd: None,
            timeout: None,
            check: true,
        }
    }
}

impl RunOptions {
    /// Options that return the result to the caller instead of raising on
    /// non-zero exit
    pub fn unchecked() -> Self {
        Self {
            check: false,
            ..Self::default()
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` to completion and capture its output.
    ///
    /// With `opts.check` set (the default), a non-zero exit becomes
    /// [`Error::Command`] carrying the argv and the captured result. A timeout
    /// produces a synthetic result with exit code `-1` and a descriptive
    /// stderr, subject to the same check semantics; the underlying process is
    /// not guaranteed to be terminated.
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    /// Create a new subprocess runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SubprocessRunner {
    async fn run(&self, argv: &[String], opts: RunOptions) -> Result<CommandResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::validation("cannot execute an empty command"))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &opts.env {
            command.env(key, value);
        }
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }

        let result = match opts.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
                Ok(output) => output_to_result(output?),
                Err(_) => CommandResult {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("command timed out after {}s", timeout.as_secs_f64()),
                },
            },
            None => output_to_result(command.output().await?),
        };

        finish(argv, result, opts.check)
    }
}

fn output_to_result(output: std::process::Output) -> CommandResult {
    CommandResult {
        // A None code means the process died from a signal
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Apply check semantics to a finished result.
pub(crate) fn finish(argv: &[String], result: CommandResult, check: bool) -> Result<CommandResult> {
    if check && !result.success() {
        return Err(Error::Command {
            command: argv.join(" "),
            result,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_of_successful_command() {
        let runner = SubprocessRunner::new();
        let result = runner
            .run(&argv(&["echo", "hello"]), RunOptions::default())
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn checked_failure_raises_command_error() {
        let runner = SubprocessRunner::new();
        let err = runner
            .run(&argv(&["false"]), RunOptions::default())
            .await
            .unwrap_err();
        match err {
            Error::Command { command, result } => {
                assert_eq!(command, "false");
                assert_eq!(result.exit_code, 1);
            }
            other => panic!("expected Command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unchecked_failure_returns_result() {
        let runner = SubprocessRunner::new();
        let result = runner
            .run(&argv(&["false"]), RunOptions::unchecked())
            .await
            .unwrap();
        assert!(!result.success());
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn timeout_produces_synthetic_result() {
        let runner = SubprocessRunner::new();
        let opts = RunOptions {
            timeout: Some(Duration::from_millis(50)),
            check: false,
            ..RunOptions::default()
        };
        let result = runner.run(&argv(&["sleep", "5"]), opts).await.unwrap();
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn timeout_respects_check_semantics() {
        let runner = SubprocessRunner::new();
        let opts = RunOptions {
            timeout: Some(Duration::from_millis(50)),
            ..RunOptions::default()
        };
        let err = runner.run(&argv(&["sleep", "5"]), opts).await.unwrap_err();
        match err {
            Error::Command { result, .. } => assert_eq!(result.exit_code, -1),
            other => panic!("expected Command error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_argv_is_a_validation_error() {
        let runner = SubprocessRunner::new();
        let err = runner.run(&[], RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn env_overrides_reach_the_child() {
        let runner = SubprocessRunner::new();
        let opts = RunOptions {
            env: vec![("KINDLING_TEST_VAR".into(), "forty-two".into())],
            ..RunOptions::default()
        };
        let result = runner
            .run(&argv(&["sh", "-c", "echo $KINDLING_TEST_VAR"]), opts)
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "forty-two");
    }
}
