//! Identities and version types that key cache entries.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use color_eyre::eyre::eyre;
use reqwest::Url;

use crate::error::ConfigError;

/// Host of a source-control service that publishes releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostingServer {
    /// The public service reachable through `api.github.com`.
    Public,
    /// A self-hosted enterprise instance rooted at the given URL.
    Enterprise(Url),
}

impl HostingServer {
    /// Returns the REST API base URL for this server.
    ///
    /// # Errors
    ///
    /// Returns an error if the enterprise URL cannot be extended with the API
    /// path.
    pub fn api_base(&self) -> Result<Url, ConfigError> {
        match self {
            Self::Public => Url::parse("https://api.github.com")
                .map_err(|err| ConfigError::from(eyre!("invalid public API URL: {err}"))),
            Self::Enterprise(root) => {
                let mut base = root.clone();
                if !base.path().ends_with('/') {
                    let directory = format!("{}/", base.path());
                    base.set_path(&directory);
                }
                base.join("api/v3").map_err(|err| {
                    ConfigError::from(eyre!("invalid enterprise API URL from {root}: {err}"))
                })
            }
        }
    }
}

/// Coordinates of a repository on a hosting server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostedRepository {
    /// Server the repository lives on.
    pub server: HostingServer,
    /// Account or organisation owning the repository.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl HostedRepository {
    /// Creates coordinates for a repository on the public server.
    #[must_use]
    pub fn public(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            server: HostingServer::Public,
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name` coordinates for the public server.
    ///
    /// # Errors
    ///
    /// Returns an error when either half is missing or blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use prebuilt_cache::HostedRepository;
    ///
    /// let repo = HostedRepository::parse("acme/Widgets")?;
    /// assert_eq!(repo.owner, "acme");
    /// assert_eq!(repo.name, "Widgets");
    /// # Ok::<(), prebuilt_cache::ConfigError>(())
    /// ```
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim().trim_end_matches('/');
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(ConfigError::from(eyre!(
                "repository '{raw}' must be written as owner/name"
            )));
        };
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(ConfigError::from(eyre!(
                "repository '{raw}' must be written as owner/name"
            )));
        }
        Ok(Self::public(owner, name))
    }
}

impl fmt::Display for HostedRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server {
            HostingServer::Public => write!(f, "{}/{}", self.owner, self.name),
            HostingServer::Enterprise(root) => {
                write!(f, "{}/{}/{}", root.as_str().trim_end_matches('/'), self.owner, self.name)
            }
        }
    }
}

/// Where a dependency's sources or binaries come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencySource {
    /// A repository on a hosting server that may publish release assets.
    Hosted(HostedRepository),
    /// An arbitrary git remote.
    Git(String),
    /// A binary-only dependency described by a version manifest.
    Binary(Url),
}

/// Opaque identity of a dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    name: String,
    source: DependencySource,
}

impl Dependency {
    /// Creates a dependency from a name and source location.
    #[must_use]
    pub fn new(name: impl Into<String>, source: DependencySource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }

    /// Creates a dependency hosted on the public server, named after the
    /// repository.
    #[must_use]
    pub fn hosted(repository: HostedRepository) -> Self {
        let name = repository.name.clone();
        Self::new(name, DependencySource::Hosted(repository))
    }

    /// Creates a binary-only dependency described by the manifest at `url`.
    #[must_use]
    pub fn binary(name: impl Into<String>, url: Url) -> Self {
        Self::new(name, DependencySource::Binary(url))
    }

    /// Name used for cache paths and archive metadata.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location the dependency is fetched from.
    #[must_use]
    pub const fn source(&self) -> &DependencySource {
        &self.source
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            DependencySource::Hosted(repo) => write!(f, "{} ({repo})", self.name),
            DependencySource::Git(url) => write!(f, "{} ({url})", self.name),
            DependencySource::Binary(url) => write!(f, "{} ({url})", self.name),
        }
    }
}

/// A resolved version: a tag, semantic version, or commit-like reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PinnedVersion {
    commitish: String,
}

impl PinnedVersion {
    /// Wraps the resolved reference string.
    #[must_use]
    pub fn new(commitish: impl Into<String>) -> Self {
        Self {
            commitish: commitish.into(),
        }
    }

    /// Returns the reference string exactly as resolved.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.commitish
    }

    /// Interprets the reference as a semantic version, tolerating a leading
    /// `v`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prebuilt_cache::PinnedVersion;
    ///
    /// let version = PinnedVersion::new("v1.2.3");
    /// assert_eq!(version.semantic().map(|v| v.to_string()), Some("1.2.3".into()));
    /// assert!(PinnedVersion::new("a1b2c3d").semantic().is_none());
    /// ```
    #[must_use]
    pub fn semantic(&self) -> Option<semver::Version> {
        let raw = self.commitish.trim();
        let stripped = raw.strip_prefix('v').unwrap_or(raw);
        semver::Version::parse(stripped).ok()
    }

    /// Returns the specifier form used in diagnostics.
    #[must_use]
    pub fn specifier(&self) -> VersionSpecifier {
        self.semantic().map_or_else(
            || VersionSpecifier::GitReference(self.commitish.clone()),
            VersionSpecifier::Exactly,
        )
    }
}

impl fmt::Display for PinnedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.commitish)
    }
}

/// The version requirement a pinned version satisfies exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpecifier {
    /// An exact semantic version.
    Exactly(semver::Version),
    /// An opaque branch, tag, or commit reference.
    GitReference(String),
}

impl fmt::Display for VersionSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(version) => write!(f, "== {version}"),
            Self::GitReference(reference) => write!(f, "\"{reference}\""),
        }
    }
}

/// Target platform an artifact can contain binaries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    /// iOS devices and simulators.
    Ios,
    /// macOS.
    MacOs,
    /// tvOS devices and simulators.
    TvOs,
    /// watchOS devices and simulators.
    WatchOs,
}

impl Platform {
    /// All known platforms, in display order.
    pub const ALL: [Self; 4] = [Self::Ios, Self::MacOs, Self::TvOs, Self::WatchOs];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ios => "iOS",
            Self::MacOs => "macOS",
            Self::TvOs => "tvOS",
            Self::WatchOs => "watchOS",
        };
        f.write_str(name)
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "macos" | "mac" | "osx" => Ok(Self::MacOs),
            "tvos" => Ok(Self::TvOs),
            "watchos" => Ok(Self::WatchOs),
            _ => Err(ConfigError::from(eyre!("unknown platform '{raw}'"))),
        }
    }
}

/// Set of platforms requested from an artifact.
pub type PlatformSet = BTreeSet<Platform>;

/// Parses a comma-separated platform list; blank input selects every
/// platform.
///
/// # Errors
///
/// Returns an error naming the first unrecognised platform.
///
/// # Examples
///
/// ```
/// use prebuilt_cache::{Platform, parse_platforms};
///
/// let platforms = parse_platforms("iOS, macOS")?;
/// assert!(platforms.contains(&Platform::Ios));
/// assert_eq!(platforms.len(), 2);
/// # Ok::<(), prebuilt_cache::ConfigError>(())
/// ```
pub fn parse_platforms(raw: &str) -> Result<PlatformSet, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Platform::ALL.into_iter().collect());
    }
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(Platform::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1.2.3", Some("1.2.3"))]
    #[case("v1.2.3", Some("1.2.3"))]
    #[case("main", None)]
    #[case("0f3c2e1", None)]
    fn semantic_parses_tags(#[case] raw: &str, #[case] expected: Option<&str>) {
        let parsed = PinnedVersion::new(raw).semantic().map(|v| v.to_string());
        assert_eq!(parsed.as_deref(), expected);
    }

    #[test]
    fn specifier_distinguishes_exact_versions_from_references() {
        assert_eq!(PinnedVersion::new("v2.0.0").specifier().to_string(), "== 2.0.0");
        assert_eq!(
            PinnedVersion::new("feature/login").specifier().to_string(),
            "\"feature/login\""
        );
    }

    #[rstest]
    #[case("iOS", Platform::Ios)]
    #[case("Mac", Platform::MacOs)]
    #[case("macos", Platform::MacOs)]
    #[case(" tvOS ", Platform::TvOs)]
    #[case("WATCHOS", Platform::WatchOs)]
    fn platform_parses_known_names(#[case] raw: &str, #[case] expected: Platform) {
        assert_eq!(raw.parse::<Platform>().expect("parse platform"), expected);
    }

    #[test]
    fn parse_platforms_rejects_unknown_names() {
        let err = parse_platforms("iOS,Android").expect_err("unknown platform");
        assert!(err.to_string().contains("Android"));
    }

    #[test]
    fn parse_platforms_defaults_to_all() {
        let platforms = parse_platforms("  ").expect("parse");
        assert_eq!(platforms.len(), Platform::ALL.len());
    }

    #[test]
    fn repository_parse_requires_owner_and_name() {
        assert!(HostedRepository::parse("acme").is_err());
        assert!(HostedRepository::parse("/Widgets").is_err());
        assert!(HostedRepository::parse("a/b/c").is_err());
        let repo = HostedRepository::parse("acme/Widgets/").expect("parse");
        assert_eq!(repo.to_string(), "acme/Widgets");
    }

    #[test]
    fn enterprise_api_base_appends_api_path() {
        let root = Url::parse("https://git.example.com/").expect("url");
        let base = HostingServer::Enterprise(root).api_base().expect("api base");
        assert_eq!(base.as_str(), "https://git.example.com/api/v3");
    }

    #[test]
    fn enterprise_api_base_keeps_a_path_prefix() {
        let root = Url::parse("https://git.example.com/ghe").expect("url");
        let base = HostingServer::Enterprise(root).api_base().expect("api base");
        assert_eq!(base.as_str(), "https://git.example.com/ghe/api/v3");
    }
}
