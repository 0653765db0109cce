//! Release assets published on a source-hosting service.
//!
//! Lookups that find nothing usable are not errors: missing releases, drafts,
//! releases without a matching asset, and structured API errors all end in a
//! miss so the caller can build from source. Only transport and filesystem
//! failures propagate.

mod github;

use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;
use reqwest::Url;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub use github::GitHubReleases;

use super::http::HttpCredentials;
use super::{FetchContext, persist, staging_dir};
use crate::error::{CacheError, CacheResult};
use crate::model::{DependencySource, HostedRepository};
use crate::observability::FETCH_LOG_TARGET;

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Tag the release was cut from.
    pub tag_name: String,
    /// Whether the release is an unpublished draft.
    #[serde(default)]
    pub draft: bool,
    /// Uploaded files, in publication order.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

/// A file attached to a release.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Declared media type.
    pub content_type: String,
    /// API URL that serves the asset bytes.
    #[serde_as(as = "DisplayFromStr")]
    pub url: Url,
}

/// Why a release lookup produced no asset.
#[derive(Debug, Error)]
pub enum ReleaseLookupError {
    /// No release exists for the tag.
    #[error("no release exists for the requested tag")]
    NotFound,
    /// The service answered with a structured error.
    #[error("hosting API error (HTTP {status}): {message}")]
    Api {
        /// Response status.
        status: u16,
        /// Message reported by the service.
        message: String,
    },
    /// The request could not be completed.
    #[error(transparent)]
    Transport(#[from] CacheError),
}

/// Capability to look up releases and download their assets.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Looks up the release published for `tag`.
    async fn release_for_tag(
        &self,
        repository: &HostedRepository,
        tag: &str,
        credentials: Option<&HttpCredentials>,
    ) -> Result<Release, ReleaseLookupError>;

    /// Downloads an asset into a new file inside `staging_dir`.
    async fn download_asset(
        &self,
        asset: &ReleaseAsset,
        credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> Result<NamedTempFile, ReleaseLookupError>;
}

/// Decides which release assets are framework archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFilter {
    name_patterns: Vec<String>,
    content_types: Vec<String>,
}

impl Default for AssetFilter {
    fn default() -> Self {
        Self::new(
            [".framework"],
            [
                "application/zip",
                "application/x-zip-compressed",
                "application/octet-stream",
            ],
        )
    }
}

impl AssetFilter {
    /// Accepts assets whose name contains any pattern and whose media type is
    /// one of `content_types`.
    #[must_use]
    pub fn new<P, C>(name_patterns: P, content_types: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            name_patterns: name_patterns.into_iter().map(Into::into).collect(),
            content_types: content_types
                .into_iter()
                .map(|value| value.into().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Reports whether `asset` is acceptable.
    #[must_use]
    pub fn matches(&self, asset: &ReleaseAsset) -> bool {
        let media_type = asset
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.name_patterns
            .iter()
            .any(|pattern| asset.name.contains(pattern.as_str()))
            && self.content_types.iter().any(|accepted| *accepted == media_type)
    }
}

/// Result of picking an asset from a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSelection<'a> {
    /// The release is a draft.
    Draft,
    /// The release has no assets at all.
    NoAssets,
    /// No asset passes the filter.
    NoMatchingAsset,
    /// The first acceptable asset in publication order.
    Asset(&'a ReleaseAsset),
}

/// Picks the first acceptable asset of `release`.
#[must_use]
pub fn select_asset<'a>(release: &'a Release, filter: &AssetFilter) -> AssetSelection<'a> {
    if release.draft {
        return AssetSelection::Draft;
    }
    if release.assets.is_empty() {
        return AssetSelection::NoAssets;
    }
    release
        .assets
        .iter()
        .find(|asset| filter.matches(asset))
        .map_or(AssetSelection::NoMatchingAsset, AssetSelection::Asset)
}

/// Fetches release assets for hosted dependencies.
#[derive(Clone)]
pub struct HostedReleaseFetcher {
    source: Arc<dyn ReleaseSource>,
    filter: AssetFilter,
}

impl HostedReleaseFetcher {
    /// Creates a fetcher over `source` with the default asset filter.
    #[must_use]
    pub fn new(source: Arc<dyn ReleaseSource>) -> Self {
        Self {
            source,
            filter: AssetFilter::default(),
        }
    }

    /// Creates a fetcher that talks to the real hosting API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_reqwest() -> CacheResult<Self> {
        Ok(Self::new(Arc::new(GitHubReleases::new()?)))
    }

    /// Replaces the asset filter.
    #[must_use]
    pub fn with_filter(mut self, filter: AssetFilter) -> Self {
        self.filter = filter;
        self
    }

    pub(crate) async fn download(&self, context: &FetchContext<'_>) -> CacheResult<()> {
        let request = context.request;
        let dependency = &request.dependency;
        let DependencySource::Hosted(repository) = dependency.source() else {
            context
                .events
                .skipped(dependency, "dependency is not hosted on a release service");
            return Ok(());
        };

        let credentials = request.credentials.as_ref();
        let outcome = match self.attempt(repository, context, credentials).await {
            Err(err) if credentials.is_some() => {
                debug!(
                    target: FETCH_LOG_TARGET,
                    repository = %repository,
                    error = %err,
                    "authenticated release lookup failed; retrying anonymously"
                );
                self.attempt(repository, context, None).await
            }
            other => other,
        };

        match outcome {
            Ok(Some(file)) => persist(file, context.destination),
            Ok(None) => Ok(()),
            Err(ReleaseLookupError::NotFound) => {
                debug!(
                    target: FETCH_LOG_TARGET,
                    repository = %repository,
                    tag = request.version.as_str(),
                    "no release for tag"
                );
                Ok(())
            }
            Err(err @ ReleaseLookupError::Api { .. }) => {
                context.events.skipped(dependency, err.to_string());
                Ok(())
            }
            Err(ReleaseLookupError::Transport(err)) => {
                let kind = err.kind();
                Err(CacheError::new(
                    kind,
                    err.into_report().wrap_err(format!(
                        "failed to fetch release binaries for {}",
                        dependency.name()
                    )),
                ))
            }
        }
    }

    async fn attempt(
        &self,
        repository: &HostedRepository,
        context: &FetchContext<'_>,
        credentials: Option<&HttpCredentials>,
    ) -> Result<Option<NamedTempFile>, ReleaseLookupError> {
        let dependency = &context.request.dependency;
        let tag = context.request.version.as_str();
        let release = self
            .source
            .release_for_tag(repository, tag, credentials)
            .await?;

        let asset = match select_asset(&release, &self.filter) {
            AssetSelection::Asset(asset) => asset,
            AssetSelection::Draft => {
                context
                    .events
                    .skipped(dependency, format!("release {tag} is a draft"));
                return Ok(None);
            }
            AssetSelection::NoAssets => {
                context
                    .events
                    .skipped(dependency, format!("release {tag} has no assets"));
                return Ok(None);
            }
            AssetSelection::NoMatchingAsset => {
                context.events.skipped(
                    dependency,
                    format!("release {tag} has no framework archive asset"),
                );
                return Ok(None);
            }
        };

        context.events.downloading(dependency, release.tag_name.as_str());
        let staging = staging_dir(context.destination)?;
        let file = self
            .source
            .download_asset(asset, credentials, staging)
            .await?;
        Ok(Some(file))
    }
}

impl std::fmt::Debug for HostedReleaseFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostedReleaseFetcher")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
