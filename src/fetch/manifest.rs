//! Downloads from URLs declared by a binary project manifest.

use std::sync::Arc;

use color_eyre::eyre::eyre;
use tracing::debug;

use super::http::{HttpClient, ReqwestHttpClient};
use super::{FetchContext, persist, staging_dir};
use crate::error::{CacheError, CacheErrorKind, CacheResult};
use crate::observability::FETCH_LOG_TARGET;

/// Fetches the archive a manifest maps the pinned version to.
///
/// Unlike the hosted fetcher, every failure here is fatal: a manifest that
/// names a version is a promise that the binary exists.
#[derive(Clone)]
pub struct StaticManifestFetcher {
    http: Arc<dyn HttpClient>,
}

impl StaticManifestFetcher {
    /// Creates a fetcher that downloads through `http`.
    #[must_use]
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self { http }
    }

    /// Creates a fetcher backed by a real HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_reqwest() -> CacheResult<Self> {
        Ok(Self::new(Arc::new(ReqwestHttpClient::new()?)))
    }

    pub(crate) async fn download(&self, context: &FetchContext<'_>) -> CacheResult<()> {
        let request = context.request;
        let dependency = &request.dependency;
        let url = request
            .manifest
            .as_ref()
            .and_then(|manifest| {
                manifest.url_for(&request.version, &request.configuration, &request.toolchain)
            })
            .ok_or_else(|| {
                CacheError::new(
                    CacheErrorKind::VersionNotFound,
                    eyre!(
                        "required version not found: {} {}",
                        dependency.name(),
                        request.version.specifier()
                    ),
                )
            })?;

        context.events.downloading(dependency, request.version.as_str());
        let staging = staging_dir(context.destination)?;
        let download = self
            .http
            .get(url, request.credentials.as_ref(), staging)
            .await?;
        if !(200..300).contains(&download.status) {
            return Err(CacheError::new(
                CacheErrorKind::HttpStatus,
                eyre!(
                    "failed to download {url} for {}: HTTP status {}",
                    dependency.name(),
                    download.status
                ),
            ));
        }

        debug!(target: FETCH_LOG_TARGET, %url, path = %context.destination, "manifest download complete");
        persist(download.file, context.destination)
    }
}

impl std::fmt::Debug for StaticManifestFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticManifestFetcher").finish_non_exhaustive()
    }
}
