//! Populating entries by running a user-supplied command.
//!
//! The command runs through the platform shell with the cache key exported
//! in its environment. It writes the archive to `CACHE_TARGET_PATH`, a
//! staging path beside the entry that is renamed into place only after the
//! command exits successfully.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use color_eyre::eyre::eyre;
use tracing::debug;

use super::{FetchContext, staging_dir};
use crate::cache::CacheRequest;
use crate::error::{CacheError, CacheResult};
use crate::observability::FETCH_LOG_TARGET;
use crate::process::{CommandInvocation, ProcessRunner, TokioProcessRunner, render_failure};

/// Dependency name exported to the command.
pub const DEPENDENCY_NAME_ENV: &str = "CACHE_DEPENDENCY_NAME";
/// Resolved dependency graph fingerprint; empty when unknown.
pub const RESOLVED_HASH_ENV: &str = "CACHE_RESOLVED_DEPENDENCIES_HASH";
/// Pinned version string.
pub const VERSION_ENV: &str = "CACHE_VERSION";
/// Build configuration tag.
pub const CONFIGURATION_ENV: &str = "CACHE_CONFIGURATION";
/// Toolchain version.
pub const TOOLCHAIN_ENV: &str = "CACHE_TOOLCHAIN_VERSION";
/// Path the command must write the archive to.
pub const TARGET_PATH_ENV: &str = "CACHE_TARGET_PATH";

/// Runs a configured command to produce missing archives.
#[derive(Clone)]
pub struct ExternalCommandFetcher {
    command: Option<String>,
    timeout: Option<Duration>,
    runner: Arc<dyn ProcessRunner>,
}

impl ExternalCommandFetcher {
    /// Creates a fetcher that runs `command` through the shell.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            timeout: None,
            runner: Arc::new(TokioProcessRunner),
        }
    }

    /// Creates a fetcher that never runs anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            command: None,
            timeout: None,
            runner: Arc::new(TokioProcessRunner),
        }
    }

    /// Replaces the process runner.
    #[must_use]
    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Kills the command if it runs longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reports whether a non-blank command is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.command().is_some()
    }

    fn command(&self) -> Option<&str> {
        self.command
            .as_deref()
            .filter(|command| !command.trim().is_empty())
    }

    pub(crate) async fn download(&self, context: &FetchContext<'_>) -> CacheResult<()> {
        let Some(command) = self.command() else {
            debug!(target: FETCH_LOG_TARGET, "no cache command configured");
            return Ok(());
        };
        let request = context.request;
        let destination = context.destination;

        let parent = staging_dir(destination)?;
        let staging = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempdir_in(parent)
            .map_err(|err| {
                CacheError::io(format!("failed to create staging directory in {parent}"), err)
            })?;
        let staging_path = Utf8Path::from_path(staging.path()).ok_or_else(|| {
            CacheError::from(eyre!("staging directory {:?} is not UTF-8", staging.path()))
        })?;
        let target = staging_path.join(destination.file_name().unwrap_or("artifact"));

        let invocation = command_invocation(command, request, &target).with_timeout(self.timeout);
        context
            .events
            .downloading(&request.dependency, request.version.as_str());
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(render_failure(
                &format!(
                    "cache command failed for {} {}",
                    request.dependency.name(),
                    request.version
                ),
                &output,
            ));
        }

        if tokio::fs::try_exists(&target)
            .await
            .map_err(|err| CacheError::io(format!("failed to inspect {target}"), err))?
        {
            tokio::fs::rename(&target, destination).await.map_err(|err| {
                CacheError::io(format!("failed to move {target} into {destination}"), err)
            })?;
        } else {
            debug!(
                target: FETCH_LOG_TARGET,
                dependency = request.dependency.name(),
                "cache command produced no archive"
            );
        }
        Ok(())
    }
}

/// Builds the shell invocation with the cache key exported.
fn command_invocation(command: &str, request: &CacheRequest, target: &Utf8Path) -> CommandInvocation {
    CommandInvocation::shell(command)
        .env(DEPENDENCY_NAME_ENV, request.dependency.name())
        .env(
            RESOLVED_HASH_ENV,
            request.resolved_hash.as_deref().unwrap_or_default(),
        )
        .env(VERSION_ENV, request.version.as_str())
        .env(CONFIGURATION_ENV, request.configuration.as_str())
        .env(TOOLCHAIN_ENV, request.toolchain.as_str())
        .env(TARGET_PATH_ENV, target.as_str())
}

impl std::fmt::Debug for ExternalCommandFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalCommandFetcher")
            .field("command", &self.command)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
