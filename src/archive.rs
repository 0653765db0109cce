//! Extraction of single entries from cached archives.
//!
//! Decompression is delegated to the system `unzip` tool through a
//! [`ProcessRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;

use crate::error::CacheResult;
use crate::process::{CommandInvocation, ProcessRunner, TokioProcessRunner, render_failure};

/// Capability to extract one entry of an archive into a directory.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extracts `entry` from `archive` beneath `destination`, preserving the
    /// entry's relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is unreadable or lacks the entry.
    async fn extract_entry(
        &self,
        archive: &Utf8Path,
        entry: &str,
        destination: &Utf8Path,
    ) -> CacheResult<()>;
}

/// Extracts entries by running `unzip`.
#[derive(Clone)]
pub struct UnzipExtractor {
    runner: Arc<dyn ProcessRunner>,
}

impl UnzipExtractor {
    /// Creates an extractor that runs `unzip` through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Creates an extractor that spawns real child processes.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }
}

impl std::fmt::Debug for UnzipExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnzipExtractor").finish_non_exhaustive()
    }
}

/// Builds the `unzip` invocation for one entry.
fn unzip_invocation(archive: &Utf8Path, entry: &str, destination: &Utf8Path) -> CommandInvocation {
    CommandInvocation::new("unzip")
        .arg("-qq")
        .arg("-o")
        .arg(archive.as_str())
        .arg(entry)
        .arg("-d")
        .arg(destination.as_str())
}

#[async_trait]
impl ArchiveExtractor for UnzipExtractor {
    async fn extract_entry(
        &self,
        archive: &Utf8Path,
        entry: &str,
        destination: &Utf8Path,
    ) -> CacheResult<()> {
        let invocation = unzip_invocation(archive, entry, destination);
        let output = self.runner.run(&invocation).await?;
        if output.success() {
            Ok(())
        } else {
            Err(render_failure(
                &format!("failed to extract {entry} from {archive}"),
                &output,
            ))
        }
    }
}
