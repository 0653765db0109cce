//! Strategies that populate a cache entry from a backing store.
//!
//! A [`Fetcher`] is chosen once, at configuration time, and the store calls
//! its `download` step whenever an entry is missing or invalid. Every
//! strategy stages its output beside the destination and renames it into
//! place only once complete, so an interrupted fetch never leaves a partial
//! artifact at the entry path.

mod command;
mod hosted;
mod http;
mod manifest;

use camino::Utf8Path;
use color_eyre::eyre::eyre;
use tempfile::NamedTempFile;

pub use command::{
    CONFIGURATION_ENV, DEPENDENCY_NAME_ENV, ExternalCommandFetcher, RESOLVED_HASH_ENV,
    TARGET_PATH_ENV, TOOLCHAIN_ENV, VERSION_ENV,
};
pub use hosted::{
    AssetFilter, AssetSelection, GitHubReleases, HostedReleaseFetcher, Release, ReleaseAsset,
    ReleaseLookupError, ReleaseSource, select_asset,
};
pub use http::{HttpClient, HttpCredentials, HttpDownload, ReqwestHttpClient};
pub use manifest::StaticManifestFetcher;

use crate::cache::{CacheRequest, EventSink};
use crate::error::{CacheError, CacheResult};

/// Everything a strategy needs to populate one entry.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    /// The request being resolved.
    pub request: &'a CacheRequest,
    /// Final path of the artifact.
    pub destination: &'a Utf8Path,
    /// Observer for download events.
    pub events: &'a EventSink,
}

/// The configured download strategy.
#[derive(Debug)]
pub enum Fetcher {
    /// Download URLs declared by a binary project manifest.
    StaticManifest(StaticManifestFetcher),
    /// Release assets published on a hosting service.
    HostedRelease(HostedReleaseFetcher),
    /// A user-supplied command; disabled when no command is configured.
    ExternalCommand(ExternalCommandFetcher),
}

impl Fetcher {
    /// A fetcher that never downloads, turning the store into a local-only
    /// cache.
    #[must_use]
    pub fn local_only() -> Self {
        Self::ExternalCommand(ExternalCommandFetcher::disabled())
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StaticManifest(_) => "manifest",
            Self::HostedRelease(_) => "hosted-release",
            Self::ExternalCommand(_) => "external-command",
        }
    }

    /// Populates `context.destination`, or leaves it absent to signal a
    /// miss.
    ///
    /// # Errors
    ///
    /// Returns the strategy's fatal errors; downgraded conditions return
    /// `Ok(())` without creating the file.
    pub async fn download(&self, context: &FetchContext<'_>) -> CacheResult<()> {
        match self {
            Self::StaticManifest(fetcher) => fetcher.download(context).await,
            Self::HostedRelease(fetcher) => fetcher.download(context).await,
            Self::ExternalCommand(fetcher) => fetcher.download(context).await,
        }
    }
}

impl From<StaticManifestFetcher> for Fetcher {
    fn from(fetcher: StaticManifestFetcher) -> Self {
        Self::StaticManifest(fetcher)
    }
}

impl From<HostedReleaseFetcher> for Fetcher {
    fn from(fetcher: HostedReleaseFetcher) -> Self {
        Self::HostedRelease(fetcher)
    }
}

impl From<ExternalCommandFetcher> for Fetcher {
    fn from(fetcher: ExternalCommandFetcher) -> Self {
        Self::ExternalCommand(fetcher)
    }
}

/// Directory in which staging files for `destination` are created.
pub(crate) fn staging_dir(destination: &Utf8Path) -> CacheResult<&Utf8Path> {
    destination
        .parent()
        .ok_or_else(|| CacheError::from(eyre!("cache entry {destination} has no parent directory")))
}

/// Creates a hidden staging file inside `dir`.
pub(crate) fn staging_file(dir: &Utf8Path) -> CacheResult<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".download-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|err| CacheError::io(format!("failed to create staging file in {dir}"), err))
}

/// Atomically moves a completed staging file to `destination`.
pub(crate) fn persist(file: NamedTempFile, destination: &Utf8Path) -> CacheResult<()> {
    file.persist(destination)
        .map(drop)
        .map_err(|err| CacheError::io(format!("failed to move download into {destination}"), err.error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn persist_moves_staging_file_into_place() {
        let temp = tempdir().expect("tempdir");
        let dir = Utf8Path::from_path(temp.path()).expect("utf8 path");
        let destination = dir.join("Foo.framework.zip");

        let mut file = staging_file(dir).expect("staging file");
        file.write_all(b"payload").expect("write");
        let staged = file.path().to_owned();
        persist(file, &destination).expect("persist");

        assert_eq!(std::fs::read(&destination).expect("read"), b"payload");
        assert!(!staged.exists(), "staging file is renamed, not copied");
    }

    #[test]
    fn dropped_staging_file_leaves_no_artifact() {
        let temp = tempdir().expect("tempdir");
        let dir = Utf8Path::from_path(temp.path()).expect("utf8 path");
        let destination = dir.join("Foo.framework.zip");

        let mut file = staging_file(dir).expect("staging file");
        file.write_all(b"half a download").expect("write");
        drop(file);

        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir).expect("list").count(), 0);
    }

    #[test]
    fn local_only_is_a_disabled_command_fetcher() {
        let fetcher = Fetcher::local_only();
        assert!(matches!(fetcher, Fetcher::ExternalCommand(ref inner) if !inner.is_enabled()));
    }
}
