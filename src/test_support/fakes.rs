//! In-memory stand-ins for the store's collaborators.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use camino::Utf8Path;
use color_eyre::eyre::eyre;
use reqwest::Url;
use tempfile::NamedTempFile;

use crate::archive::ArchiveExtractor;
use crate::error::{CacheError, CacheErrorKind, CacheResult};
use crate::fetch::{
    HttpClient, HttpCredentials, HttpDownload, Release, ReleaseAsset, ReleaseLookupError,
    ReleaseSource, TARGET_PATH_ENV, staging_file,
};
use crate::model::HostedRepository;
use crate::process::{CommandInvocation, CommandOutput, ProcessRunner};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn write_staged(dir: &Utf8Path, body: &[u8]) -> CacheResult<NamedTempFile> {
    let mut file = staging_file(dir)?;
    file.write_all(body)
        .map_err(|err| CacheError::io("failed to write fake body", err))?;
    Ok(file)
}

/// Extractor whose archives either lack the version file or contain fixed
/// contents for it.
#[derive(Debug, Default)]
pub struct FakeExtractor {
    contents: Option<String>,
    requested: Mutex<Vec<String>>,
}

impl FakeExtractor {
    /// Every extraction fails as if the entry were absent.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }

    /// Every extraction yields `contents`.
    #[must_use]
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Some(contents.into()),
            requested: Mutex::default(),
        }
    }

    /// Entries requested so far, in call order.
    #[must_use]
    pub fn requested_entries(&self) -> Vec<String> {
        lock(&self.requested).clone()
    }
}

#[async_trait]
impl ArchiveExtractor for FakeExtractor {
    async fn extract_entry(
        &self,
        archive: &Utf8Path,
        entry: &str,
        destination: &Utf8Path,
    ) -> CacheResult<()> {
        lock(&self.requested).push(entry.to_owned());
        let Some(contents) = &self.contents else {
            return Err(CacheError::new(
                CacheErrorKind::CommandFailed,
                eyre!("{entry} not found in {archive}"),
            ));
        };
        let target = destination.join(entry);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }
}

/// A request observed by [`FakeHttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Requested URL.
    pub url: String,
    /// Whether credentials accompanied the request.
    pub authenticated: bool,
}

/// HTTP client serving canned responses; unknown URLs answer 404.
#[derive(Debug, Default)]
pub struct FakeHttpClient {
    responses: HashMap<String, (u16, Vec<u8>)>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeHttpClient {
    /// Creates a client with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `body` with `status` for `url`.
    #[must_use]
    pub fn with_response(mut self, url: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.responses.insert(url.to_owned(), (status, body.into()));
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn get(
        &self,
        url: &Url,
        credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> CacheResult<HttpDownload> {
        lock(&self.requests).push(RecordedRequest {
            url: url.as_str().to_owned(),
            authenticated: credentials.is_some(),
        });
        let (status, body) = self
            .responses
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| (404, b"not found".to_vec()));
        let file = write_staged(staging_dir, &body)?;
        Ok(HttpDownload { status, file })
    }
}

/// Canned answer of [`FakeReleaseSource`] to a release lookup.
#[derive(Debug, Clone)]
pub enum FakeLookup {
    /// The release exists.
    Found(Release),
    /// No release for the tag.
    NotFound,
    /// A structured API error.
    Api {
        /// Response status.
        status: u16,
        /// Reported message.
        message: String,
    },
    /// A transport failure.
    Transport(String),
}

impl FakeLookup {
    fn to_result(&self) -> Result<Release, ReleaseLookupError> {
        match self {
            Self::Found(release) => Ok(release.clone()),
            Self::NotFound => Err(ReleaseLookupError::NotFound),
            Self::Api { status, message } => Err(ReleaseLookupError::Api {
                status: *status,
                message: message.clone(),
            }),
            Self::Transport(message) => Err(ReleaseLookupError::Transport(CacheError::from(
                eyre!("{message}"),
            ))),
        }
    }
}

/// Release source with separate answers for authenticated and anonymous
/// lookups.
#[derive(Debug)]
pub struct FakeReleaseSource {
    authenticated: FakeLookup,
    anonymous: FakeLookup,
    bodies: HashMap<String, Vec<u8>>,
    lookups: Mutex<Vec<bool>>,
    downloads: Mutex<Vec<String>>,
}

impl FakeReleaseSource {
    /// Answers every lookup with `lookup`.
    #[must_use]
    pub fn new(lookup: FakeLookup) -> Self {
        Self {
            authenticated: lookup.clone(),
            anonymous: lookup,
            bodies: HashMap::new(),
            lookups: Mutex::default(),
            downloads: Mutex::default(),
        }
    }

    /// Overrides the answer given when credentials are supplied.
    #[must_use]
    pub fn with_authenticated(mut self, lookup: FakeLookup) -> Self {
        self.authenticated = lookup;
        self
    }

    /// Serves `body` for the asset called `name`.
    #[must_use]
    pub fn with_asset_body(mut self, name: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(name.to_owned(), body.into());
        self
    }

    /// Whether each lookup so far carried credentials.
    #[must_use]
    pub fn lookups(&self) -> Vec<bool> {
        lock(&self.lookups).clone()
    }

    /// Names of assets downloaded so far.
    #[must_use]
    pub fn downloaded_assets(&self) -> Vec<String> {
        lock(&self.downloads).clone()
    }
}

#[async_trait]
impl ReleaseSource for FakeReleaseSource {
    async fn release_for_tag(
        &self,
        _repository: &HostedRepository,
        _tag: &str,
        credentials: Option<&HttpCredentials>,
    ) -> Result<Release, ReleaseLookupError> {
        lock(&self.lookups).push(credentials.is_some());
        if credentials.is_some() {
            self.authenticated.to_result()
        } else {
            self.anonymous.to_result()
        }
    }

    async fn download_asset(
        &self,
        asset: &ReleaseAsset,
        _credentials: Option<&HttpCredentials>,
        staging_dir: &Utf8Path,
    ) -> Result<NamedTempFile, ReleaseLookupError> {
        lock(&self.downloads).push(asset.name.clone());
        let body = self
            .bodies
            .get(&asset.name)
            .ok_or(ReleaseLookupError::NotFound)?;
        Ok(write_staged(staging_dir, body)?)
    }
}

/// Builds a published release.
#[must_use]
pub fn release(tag: &str, assets: Vec<ReleaseAsset>) -> Release {
    Release {
        tag_name: tag.to_owned(),
        draft: false,
        assets,
    }
}

/// Builds an asset served from a fake API URL.
///
/// # Panics
///
/// Panics if `name` cannot form a URL path segment.
#[must_use]
pub fn asset(name: &str, content_type: &str) -> ReleaseAsset {
    let url = Url::parse(&format!("https://api.example.test/assets/{name}"))
        .unwrap_or_else(|err| panic!("asset name {name} should form a URL: {err}"));
    ReleaseAsset {
        name: name.to_owned(),
        content_type: content_type.to_owned(),
        url,
    }
}

/// Process runner that records invocations and simulates a command that
/// writes to `CACHE_TARGET_PATH`.
#[derive(Debug)]
pub struct RecordingRunner {
    exit_code: i32,
    artifact: Option<Vec<u8>>,
    delay: Duration,
    invocations: Mutex<Vec<CommandInvocation>>,
}

impl RecordingRunner {
    /// Succeeds after writing `artifact` to the target path.
    #[must_use]
    pub fn producing(artifact: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: 0,
            artifact: Some(artifact.into()),
            delay: Duration::ZERO,
            invocations: Mutex::default(),
        }
    }

    /// Succeeds without writing anything.
    #[must_use]
    pub fn producing_nothing() -> Self {
        Self {
            exit_code: 0,
            artifact: None,
            delay: Duration::ZERO,
            invocations: Mutex::default(),
        }
    }

    /// Exits with `code` after writing `partial` to the target path.
    #[must_use]
    pub fn failing(code: i32, partial: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: code,
            artifact: Some(partial.into()),
            delay: Duration::ZERO,
            invocations: Mutex::default(),
        }
    }

    /// Sleeps for `delay` before finishing each run.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Invocations received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Number of runs so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.invocations).len()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, invocation: &CommandInvocation) -> CacheResult<CommandOutput> {
        lock(&self.invocations).push(invocation.clone());
        if let (Some(artifact), Some(target)) =
            (&self.artifact, invocation.env_value(TARGET_PATH_ENV))
        {
            tokio::fs::write(target, artifact).await?;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut output = CommandOutput::with_exit_code(self.exit_code);
        if self.exit_code != 0 {
            output.stderr = b"simulated failure".to_vec();
        }
        Ok(output)
    }
}
