//! HTTP downloads into staging files beside the cache entry.

use async_trait::async_trait;
use camino::Utf8Path;
use color_eyre::eyre::eyre;
use reqwest::{RequestBuilder, Response, Url};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use super::staging_file;
use crate::error::{CacheError, CacheResult};

/// User agent sent with every request.
pub(crate) const USER_AGENT: &str = concat!("prebuilt-cache/", env!("CARGO_PKG_VERSION"));

/// Time allowed to establish a connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential material for authenticated downloads.
#[derive(Debug, Clone)]
pub enum HttpCredentials {
    /// A bearer or personal access token.
    Token(SecretString),
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password or token.
        password: SecretString,
    },
}

impl HttpCredentials {
    /// Wraps a token.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(SecretString::from(token.into()))
    }

    /// Adds the matching `Authorization` header to `request`.
    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::Token(token) => request.bearer_auth(token.expose_secret()),
            Self::Basic { username, password } => {
                request.basic_auth(username, Some(password.expose_secret()))
            }
        }
    }
}

/// Applies optional credentials to a request.
pub(crate) fn authorize(
    request: RequestBuilder,
    credentials: Option<&HttpCredentials>,
) -> RequestBuilder {
    match credentials {
        Some(credentials) => credentials.authorize(request),
        None => request,
    }
}

/// A completed GET whose body has been written to a staging file.
#[derive(Debug)]
pub struct HttpDownload {
    /// Response status code.
    pub status: u16,
    /// Staging file holding the response body.
    pub file: NamedTempFile,
}

/// Capability to GET a URL into a staging file.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Downloads `url` into a new file inside `staging_dir`.
    ///
    /// A non-success status is reported through [`HttpDownload::status`];
    /// errors mean the transfer itself failed.
    async fn get(
        &self,
        url: &Url,
        credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> CacheResult<HttpDownload>;
}

/// Builds the shared `reqwest` client.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub(crate) fn build_client() -> CacheResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|err| CacheError::from(eyre!("failed to build HTTP client: {err}")))
}

/// Streams a response body into a staging file.
pub(crate) async fn write_body(
    mut response: Response,
    staging_dir: &Utf8Path,
) -> CacheResult<NamedTempFile> {
    let url = response.url().clone();
    let file = staging_file(staging_dir)?;
    let handle = file
        .as_file()
        .try_clone()
        .map_err(|err| CacheError::io("failed to open staging file", err))?;
    let mut writer = tokio::fs::File::from_std(handle);
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| CacheError::from(eyre!("failed to read body of {url}: {err}")))?
    {
        writer
            .write_all(&chunk)
            .await
            .map_err(|err| CacheError::io("failed to write staging file", err))?;
    }
    writer
        .flush()
        .await
        .map_err(|err| CacheError::io("failed to flush staging file", err))?;
    writer
        .sync_all()
        .await
        .map_err(|err| CacheError::io("failed to sync staging file", err))?;
    Ok(file)
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Creates a client with the crate's user agent and timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> CacheResult<Self> {
        Ok(Self::with_client(build_client()?))
    }

    /// Wraps an existing `reqwest` client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(
        &self,
        url: &Url,
        credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> CacheResult<HttpDownload> {
        let response = authorize(self.client.get(url.clone()), credentials)
            .send()
            .await
            .map_err(|err| CacheError::from(eyre!("failed to request {url}: {err}")))?;
        let status = response.status().as_u16();
        let file = write_body(response, staging_dir).await?;
        Ok(HttpDownload { status, file })
    }
}
