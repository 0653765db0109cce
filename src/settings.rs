//! Environment-driven configuration for a single cache resolution.
//!
//! [`CacheSettings`] is loaded through `OrthoConfig` from variables
//! prefixed with `PREBUILT_CACHE_` (for example `PREBUILT_CACHE_VERSION`)
//! and translated into a [`CacheStore`] and a [`CacheRequest`].

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheRequest, CacheStore, DEFAULT_CONFIGURATION, resolve_cache_dir};
use crate::error::{ConfigError, ConfigResult, Result};
use crate::fetch::{
    ExternalCommandFetcher, Fetcher, HostedReleaseFetcher, HttpCredentials, StaticManifestFetcher,
};
use crate::manifest::BinaryProjectManifest;
use crate::model::{
    Dependency, DependencySource, HostedRepository, PinnedVersion, PlatformSet, parse_platforms,
};

/// Download strategy selected by `PREBUILT_CACHE_FETCHER`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetcherKind {
    /// Never download; serve only what is already cached.
    #[default]
    None,
    /// Run `PREBUILT_CACHE_EXTERNAL_COMMAND`.
    Command,
    /// Download release assets from the hosting service.
    Hosted,
    /// Download URLs from `PREBUILT_CACHE_MANIFEST_PATH`.
    Manifest,
}

impl FromStr for FetcherKind {
    type Err = ConfigError;

    fn from_str(raw: &str) -> ConfigResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "local" => Ok(Self::None),
            "command" => Ok(Self::Command),
            "hosted" | "github" => Ok(Self::Hosted),
            "manifest" | "binary" => Ok(Self::Manifest),
            _ => Err(ConfigError::from(eyre!(
                "unknown fetcher '{raw}'; expected none, command, hosted, or manifest"
            ))),
        }
    }
}

/// Captures cache settings supplied via environment variables.
///
/// # Examples
/// ```
/// use prebuilt_cache::CacheSettings;
///
/// let cfg = CacheSettings::default();
/// assert!(cfg.lock_timeout().is_none());
/// ```
#[derive(Clone, Default, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "PREBUILT_CACHE")]
pub struct CacheSettings {
    /// Cache root; discovered from XDG conventions when absent.
    pub cache_dir: Option<Utf8PathBuf>,
    /// Seconds to wait for an entry lock; absent waits forever.
    pub lock_timeout_secs: Option<u64>,
    /// Whether the resolved dependency hash participates in the key.
    pub strict_match: Option<bool>,
    /// Comma-separated platforms the artifact must contain.
    pub platforms: Option<String>,
    /// `none`, `command`, `hosted`, or `manifest`.
    pub fetcher: Option<String>,
    /// Shell command used by the `command` fetcher.
    pub external_command: Option<String>,
    /// Seconds before the external command is killed.
    pub command_timeout_secs: Option<u64>,
    /// Access token for authenticated downloads.
    pub token: Option<String>,
    /// JSON binary project manifest for the `manifest` fetcher.
    pub manifest_path: Option<Utf8PathBuf>,
    /// Dependency name.
    pub dependency: Option<String>,
    /// `owner/name` coordinates of a hosted dependency.
    pub repository: Option<String>,
    /// Pinned version.
    #[ortho_config(cli_long = "pinned-version")]
    pub version: Option<String>,
    /// Build configuration; defaults to `Release`.
    pub configuration: Option<String>,
    /// Toolchain version.
    pub toolchain: Option<String>,
    /// Fingerprint of the resolved dependency graph.
    pub resolved_hash: Option<String>,
}

impl fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSettings")
            .field("cache_dir", &self.cache_dir)
            .field("lock_timeout_secs", &self.lock_timeout_secs)
            .field("strict_match", &self.strict_match)
            .field("platforms", &self.platforms)
            .field("fetcher", &self.fetcher)
            .field("external_command", &self.external_command)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("manifest_path", &self.manifest_path)
            .field("dependency", &self.dependency)
            .field("repository", &self.repository)
            .field("version", &self.version)
            .field("configuration", &self.configuration)
            .field("toolchain", &self.toolchain)
            .field("resolved_hash", &self.resolved_hash)
            .finish()
    }
}

/// Returns the trimmed value when it is not blank.
fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|raw| raw.trim()).filter(|raw| !raw.is_empty())
}

fn required<'a>(value: Option<&'a String>, name: &str) -> ConfigResult<&'a str> {
    non_blank(value)
        .ok_or_else(|| ConfigError::from(eyre!("PREBUILT_CACHE_{name} must be set")))
}

impl CacheSettings {
    /// Loads configuration from environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable cannot be parsed into its field.
    pub fn load() -> ConfigResult<Self> {
        let args = [OsString::from("prebuilt-cache")];
        Self::load_from_iter(args).map_err(|err| ConfigError::from(eyre!(err)))
    }

    /// Cache root, falling back to discovery.
    #[must_use]
    pub fn cache_root(&self) -> Utf8PathBuf {
        self.cache_dir
            .clone()
            .filter(|dir| !dir.as_str().trim().is_empty())
            .unwrap_or_else(resolve_cache_dir)
    }

    /// Lock wait limit.
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    /// External command time limit.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Selected download strategy.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown strategy name.
    pub fn fetcher_kind(&self) -> ConfigResult<FetcherKind> {
        self.fetcher
            .as_deref()
            .map_or(Ok(FetcherKind::None), FetcherKind::from_str)
    }

    /// Requested platforms; every platform when unset.
    ///
    /// # Errors
    ///
    /// Returns an error naming an unknown platform.
    pub fn platform_set(&self) -> ConfigResult<PlatformSet> {
        parse_platforms(self.platforms.as_deref().unwrap_or_default())
    }

    /// Token credentials, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<HttpCredentials> {
        non_blank(self.token.as_ref()).map(HttpCredentials::token)
    }

    /// Loads the binary project manifest, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error when the manifest cannot be read or parsed.
    pub fn manifest(&self) -> ConfigResult<Option<BinaryProjectManifest>> {
        self.manifest_path
            .as_deref()
            .map(BinaryProjectManifest::load)
            .transpose()
    }

    /// Builds the configured download strategy.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for inconsistent settings and a cache
    /// error when an HTTP client cannot be built.
    pub fn to_fetcher(&self) -> Result<Fetcher> {
        let fetcher = match self.fetcher_kind()? {
            FetcherKind::None => Fetcher::local_only(),
            FetcherKind::Command => {
                let command = required(self.external_command.as_ref(), "EXTERNAL_COMMAND")?;
                ExternalCommandFetcher::new(command)
                    .with_timeout(self.command_timeout())
                    .into()
            }
            FetcherKind::Hosted => HostedReleaseFetcher::with_reqwest()?.into(),
            FetcherKind::Manifest => StaticManifestFetcher::with_reqwest()?.into(),
        };
        Ok(fetcher)
    }

    /// Builds a store rooted at [`CacheSettings::cache_root`].
    ///
    /// # Errors
    ///
    /// See [`CacheSettings::to_fetcher`].
    pub fn to_store(&self) -> Result<CacheStore> {
        Ok(CacheStore::new(self.cache_root(), self.to_fetcher()?))
    }

    /// Builds the request described by these settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the version, toolchain, or dependency identity
    /// is missing, or when a referenced manifest is unreadable.
    pub fn to_request(&self) -> ConfigResult<CacheRequest> {
        let version = required(self.version.as_ref(), "VERSION")?;
        let toolchain = required(self.toolchain.as_ref(), "TOOLCHAIN")?;
        let dependency = self.to_dependency()?;

        let mut request = CacheRequest::new(dependency, PinnedVersion::new(version), toolchain)
            .with_configuration(
                non_blank(self.configuration.as_ref()).unwrap_or(DEFAULT_CONFIGURATION),
            )
            .with_strict_match(self.strict_match.unwrap_or(false))
            .with_platforms(self.platform_set()?)
            .with_lock_timeout(self.lock_timeout());
        if let Some(hash) = non_blank(self.resolved_hash.as_ref()) {
            request = request.with_resolved_hash(hash);
        }
        if let Some(credentials) = self.credentials() {
            request = request.with_credentials(credentials);
        }
        if let Some(manifest) = self.manifest()? {
            request = request.with_manifest(manifest);
        }
        Ok(request)
    }

    fn to_dependency(&self) -> ConfigResult<Dependency> {
        let explicit = non_blank(self.dependency.as_ref());
        if let Some(raw) = non_blank(self.repository.as_ref()) {
            let repository = HostedRepository::parse(raw)?;
            let name = explicit.map_or_else(|| repository.name.clone(), str::to_owned);
            return Ok(Dependency::new(name, DependencySource::Hosted(repository)));
        }
        let name = explicit.ok_or_else(|| {
            ConfigError::from(eyre!(
                "PREBUILT_CACHE_DEPENDENCY or PREBUILT_CACHE_REPOSITORY must be set"
            ))
        })?;
        match self.manifest_path.as_deref() {
            Some(path) => Ok(Dependency::binary(name, manifest_url(path)?)),
            None => Ok(Dependency::new(name, DependencySource::Git(name.to_owned()))),
        }
    }
}

/// Converts a manifest path into a `file://` URL.
fn manifest_url(path: &Utf8Path) -> ConfigResult<Url> {
    let absolute = std::path::absolute(path)
        .map_err(|err| ConfigError::from(eyre!("failed to resolve manifest path {path}: {err}")))?;
    Url::from_file_path(&absolute)
        .map_err(|()| ConfigError::from(eyre!("manifest path {path} cannot form a URL")))
}
