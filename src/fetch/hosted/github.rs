//! REST client for the public service and its enterprise installs.

use async_trait::async_trait;
use camino::Utf8Path;
use color_eyre::eyre::eyre;
use reqwest::header::ACCEPT;
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Release, ReleaseAsset, ReleaseLookupError, ReleaseSource};
use crate::error::CacheError;
use crate::fetch::http::{HttpCredentials, authorize, build_client, write_body};
use crate::model::HostedRepository;
use crate::observability::FETCH_LOG_TARGET;

const API_MEDIA_TYPE: &str = "application/vnd.github+json";
const ASSET_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

/// [`ReleaseSource`] backed by the hosting service's REST API.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
}

impl GitHubReleases {
    /// Creates a client with the crate's user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, CacheError> {
        Ok(Self::with_client(build_client()?))
    }

    /// Wraps an existing `reqwest` client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Builds `<api>/repos/<owner>/<name>/releases/tags/<tag>`.
///
/// Each component is pushed as a single percent-encoded segment, so tags
/// containing `/` stay intact.
fn release_url(repository: &HostedRepository, tag: &str) -> Result<Url, ReleaseLookupError> {
    let mut url = repository
        .server
        .api_base()
        .map_err(CacheError::from)?;
    url.path_segments_mut()
        .map_err(|()| CacheError::from(eyre!("API base {repository} cannot carry a path")))?
        .pop_if_empty()
        .extend([
            "repos",
            repository.owner.as_str(),
            repository.name.as_str(),
            "releases",
            "tags",
            tag,
        ]);
    Ok(url)
}

/// Converts a non-success response into a lookup error.
async fn failure(response: Response) -> ReleaseLookupError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return ReleaseLookupError::NotFound;
    }
    let fallback = status.canonical_reason().unwrap_or("unexpected status").to_owned();
    let message = response
        .json::<ApiMessage>()
        .await
        .map_or(fallback, |body| body.message);
    ReleaseLookupError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn release_for_tag(
        &self,
        repository: &HostedRepository,
        tag: &str,
        credentials: Option<&HttpCredentials>,
    ) -> Result<Release, ReleaseLookupError> {
        let url = release_url(repository, tag)?;
        debug!(
            target: FETCH_LOG_TARGET,
            %url,
            authenticated = credentials.is_some(),
            "looking up release"
        );
        let response = authorize(self.client.get(url.clone()), credentials)
            .header(ACCEPT, API_MEDIA_TYPE)
            .send()
            .await
            .map_err(|err| CacheError::from(eyre!("failed to request {url}: {err}")))?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        response
            .json::<Release>()
            .await
            .map_err(|err| {
                ReleaseLookupError::from(CacheError::from(eyre!(
                    "malformed release for {repository} tag {tag}: {err}"
                )))
            })
    }

    async fn download_asset(
        &self,
        asset: &ReleaseAsset,
        credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> Result<NamedTempFile, ReleaseLookupError> {
        let url = &asset.url;
        let response = authorize(self.client.get(url.clone()), credentials)
            .header(ACCEPT, ASSET_MEDIA_TYPE)
            .send()
            .await
            .map_err(|err| CacheError::from(eyre!("failed to request {url}: {err}")))?;
        if !response.status().is_success() {
            return Err(failure(response).await);
        }
        Ok(write_body(response, staging_dir).await?)
    }
}
