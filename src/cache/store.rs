//! Resolution of cache requests into local artifacts.
//!
//! `resolve` follows one sequence per entry: take the entry lock, accept a
//! valid artifact if one exists, otherwise discard whatever is there and ask
//! the fetcher for a fresh copy. The lock is held from the first look at the
//! entry until the caller releases the returned artifact.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{Instrument, debug, info, info_span, warn};

use super::events::EventSink;
use super::lock::{EntryLock, LockStrategy};
use super::path::CacheKey;
use super::version_file::{EntryValidity, check_entry};
use crate::archive::{ArchiveExtractor, UnzipExtractor};
use crate::error::{CacheError, CacheResult};
use crate::fetch::{FetchContext, Fetcher, HttpCredentials};
use crate::manifest::BinaryProjectManifest;
use crate::model::{Dependency, PinnedVersion, Platform, PlatformSet};
use crate::observability::LOG_TARGET;

/// Build configuration used when none is specified.
pub const DEFAULT_CONFIGURATION: &str = "Release";

/// Everything needed to look up or populate one artifact.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Dependency whose binaries are requested.
    pub dependency: Dependency,
    /// Exact version pinned by resolution.
    pub version: PinnedVersion,
    /// Build configuration tag.
    pub configuration: String,
    /// Fingerprint of the resolved dependency graph.
    pub resolved_hash: Option<String>,
    /// Whether the fingerprint participates in the cache key.
    pub strict_match: bool,
    /// Platforms the artifact must contain.
    pub platforms: PlatformSet,
    /// Toolchain version binaries must be built with.
    pub toolchain: String,
    /// Longest time to wait for the entry lock; `None` waits forever.
    pub lock_timeout: Option<Duration>,
    /// Credentials for authenticated downloads.
    pub credentials: Option<HttpCredentials>,
    /// Version manifest for binary-only dependencies.
    pub manifest: Option<BinaryProjectManifest>,
}

impl CacheRequest {
    /// Creates a request for every platform in the default configuration.
    #[must_use]
    pub fn new(dependency: Dependency, version: PinnedVersion, toolchain: impl Into<String>) -> Self {
        Self {
            dependency,
            version,
            configuration: DEFAULT_CONFIGURATION.to_owned(),
            resolved_hash: None,
            strict_match: false,
            platforms: Platform::ALL.into_iter().collect(),
            toolchain: toolchain.into(),
            lock_timeout: None,
            credentials: None,
            manifest: None,
        }
    }

    /// Sets the build configuration.
    #[must_use]
    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    /// Records the resolved dependency graph fingerprint.
    #[must_use]
    pub fn with_resolved_hash(mut self, hash: impl Into<String>) -> Self {
        self.resolved_hash = Some(hash.into());
        self
    }

    /// Enables or disables strict matching on the fingerprint.
    #[must_use]
    pub const fn with_strict_match(mut self, strict: bool) -> Self {
        self.strict_match = strict;
        self
    }

    /// Restricts the platforms the artifact must contain.
    #[must_use]
    pub fn with_platforms(mut self, platforms: PlatformSet) -> Self {
        self.platforms = platforms;
        self
    }

    /// Bounds how long to wait for the entry lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Supplies download credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: HttpCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Supplies the version manifest of a binary-only dependency.
    #[must_use]
    pub fn with_manifest(mut self, manifest: BinaryProjectManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Returns the key that locates this request's entry.
    ///
    /// The fingerprint only participates when strict matching is enabled.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey<'_> {
        CacheKey {
            dependency: self.dependency.name(),
            version: self.version.as_str(),
            configuration: &self.configuration,
            resolved_hash: self
                .resolved_hash
                .as_deref()
                .filter(|_| self.strict_match),
            toolchain: &self.toolchain,
            manifest_filename: self.manifest.as_ref().and_then(|manifest| {
                manifest.filename_for(&self.version, &self.configuration, &self.toolchain)
            }),
        }
    }
}

/// A valid artifact, still protected by its entry lock.
#[derive(Debug)]
pub struct CachedArtifact {
    path: Utf8PathBuf,
    lock: EntryLock,
}

impl CachedArtifact {
    /// Location of the archive.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Lock guarding the archive until the caller has consumed it.
    #[must_use]
    pub const fn lock(&self) -> &EntryLock {
        &self.lock
    }

    /// Releases the entry lock, handing back the archive path.
    #[must_use]
    pub fn release(mut self) -> Utf8PathBuf {
        self.lock.release();
        self.path
    }
}

/// Result of resolving a request.
#[derive(Debug)]
pub enum CacheOutcome {
    /// A valid artifact is available.
    Hit(CachedArtifact),
    /// No artifact could be produced; the caller should build from source.
    Miss,
}

impl CacheOutcome {
    /// Returns the artifact when the outcome is a hit.
    #[must_use]
    pub fn artifact(&self) -> Option<&CachedArtifact> {
        match self {
            Self::Hit(artifact) => Some(artifact),
            Self::Miss => None,
        }
    }

    /// Reports whether the outcome is a hit.
    #[must_use]
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Local binary cache with a configured download strategy.
pub struct CacheStore {
    root: Utf8PathBuf,
    fetcher: Fetcher,
    extractor: Arc<dyn ArchiveExtractor>,
    events: EventSink,
    lock_strategy: LockStrategy,
}

impl CacheStore {
    /// Creates a store rooted at `root` that fills misses with `fetcher`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, fetcher: Fetcher) -> Self {
        Self {
            root: root.into(),
            fetcher,
            extractor: Arc::new(UnzipExtractor::system()),
            events: EventSink::disabled(),
            lock_strategy: LockStrategy::default(),
        }
    }

    /// Creates a store that never downloads.
    #[must_use]
    pub fn local_only(root: impl Into<Utf8PathBuf>) -> Self {
        Self::new(root, Fetcher::local_only())
    }

    /// Replaces the archive extractor used for validity checks.
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Forwards download events to `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Selects how entry locks are taken.
    #[must_use]
    pub const fn with_lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Configured download strategy.
    #[must_use]
    pub const fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Storage path for `request`.
    #[must_use]
    pub fn entry_path(&self, request: &CacheRequest) -> Utf8PathBuf {
        request.cache_key().entry_path(&self.root)
    }

    /// Returns a valid artifact for `request`, fetching one if necessary.
    ///
    /// On a hit the entry lock stays held inside the returned
    /// [`CachedArtifact`]; on a miss or an error it has already been
    /// released.
    ///
    /// # Errors
    ///
    /// Returns a lock timeout, a fatal fetcher error, or a filesystem error.
    pub async fn resolve(&self, request: &CacheRequest) -> CacheResult<CacheOutcome> {
        let path = self.entry_path(request);
        let span = info_span!(
            target: LOG_TARGET,
            "resolve_entry",
            dependency = request.dependency.name(),
            version = request.version.as_str(),
            configuration = request.configuration.as_str(),
            fetcher = self.fetcher.name(),
        );
        self.resolve_at(request, path).instrument(span).await
    }

    async fn resolve_at(&self, request: &CacheRequest, path: Utf8PathBuf) -> CacheResult<CacheOutcome> {
        let mut lock =
            EntryLock::acquire_with(&path, request.lock_timeout, self.lock_strategy).await?;

        let validity = check_entry(
            &path,
            request.dependency.name(),
            &request.platforms,
            self.extractor.as_ref(),
        )
        .await;
        if validity.is_valid() {
            debug!(target: LOG_TARGET, path = %path, ?validity, "cache hit");
            return Ok(CacheOutcome::Hit(CachedArtifact { path, lock }));
        }
        if validity != EntryValidity::Missing {
            discard(&path, validity).await?;
        }

        let context = FetchContext {
            request,
            destination: &path,
            events: &self.events,
        };
        self.fetcher.download(&context).await?;

        if tokio::fs::try_exists(&path)
            .await
            .map_err(|err| CacheError::io(format!("failed to inspect {path}"), err))?
        {
            info!(target: LOG_TARGET, path = %path, "cache entry populated");
            Ok(CacheOutcome::Hit(CachedArtifact { path, lock }))
        } else {
            lock.release();
            debug!(target: LOG_TARGET, path = %path, "cache miss");
            Ok(CacheOutcome::Miss)
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("fetcher", &self.fetcher)
            .field("lock_strategy", &self.lock_strategy)
            .finish_non_exhaustive()
    }
}

/// Removes an artifact that failed validation.
async fn discard(path: &Utf8Path, validity: EntryValidity) -> CacheResult<()> {
    warn!(target: LOG_TARGET, path = %path, ?validity, "discarding invalid cache entry");
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CacheError::io(format!("failed to remove invalid entry {path}"), err)),
    }
}
