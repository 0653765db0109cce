//! Spawning external commands and capturing their results.
//!
//! The [`ProcessRunner`] trait is the seam through which the cache runs user
//! commands and archive tools; [`TokioProcessRunner`] is the production
//! implementation.

mod output;

use async_trait::async_trait;
use color_eyre::eyre::eyre;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub(crate) use self::output::render_failure;
use crate::error::{CacheError, CacheErrorKind, CacheResult};
use crate::observability::FETCH_LOG_TARGET;

/// A command to run, with its environment and time limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables set for the child.
    pub env: Vec<(String, String)>,
    /// Maximum run time before the child is killed.
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    /// Starts an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Runs `script` through the platform shell.
    #[must_use]
    pub fn shell(script: &str) -> Self {
        if cfg!(windows) {
            Self::new("cmd").arg("/C").arg(script)
        } else {
            Self::new("sh").arg("-c").arg(script)
        }
    }

    /// Appends an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Limits how long the child may run.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Looks up an environment variable set on this invocation.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status and captured streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, or `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Output of a command that exited with `code` and printed nothing.
    #[must_use]
    pub const fn with_exit_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Reports whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Capability to run an external command and capture its result.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the command to completion.
    ///
    /// A non-zero exit is reported through [`CommandOutput`], not as an
    /// error; errors mean the command could not be run or timed out.
    async fn run(&self, invocation: &CommandInvocation) -> CacheResult<CommandOutput>;
}

/// Runs commands as child processes on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, invocation: &CommandInvocation) -> CacheResult<CommandOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(target: FETCH_LOG_TARGET, command = %invocation, "spawning command");
        let child = command.spawn().map_err(|err| {
            CacheError::new(
                CacheErrorKind::CommandFailed,
                eyre!("failed to spawn `{invocation}`: {err}"),
            )
        })?;

        let waited = match invocation.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    CacheError::new(
                        CacheErrorKind::CommandFailed,
                        eyre!("`{invocation}` timed out after {}s", limit.as_secs()),
                    )
                })?,
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|err| {
            CacheError::new(
                CacheErrorKind::CommandFailed,
                eyre!("failed to collect output of `{invocation}`: {err}"),
            )
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
