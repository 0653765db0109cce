//! Per-artifact platform metadata and the validity check built on it.
//!
//! Archives carry a JSON version file at `Carthage/Build/.<name>.version`
//! recording which platforms they were built for. Validation extracts only
//! that entry into a scratch directory that is removed when the check ends.
//!
//! The check is deliberately asymmetric: an archive without a version file
//! predates the metadata and is accepted for any platform, whereas a version
//! file that exists but cannot be parsed condemns the archive.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tracing::{debug, warn};

use crate::archive::ArchiveExtractor;
use crate::model::{Platform, PlatformSet};
use crate::observability::LOG_TARGET;

/// Directory inside an archive that holds version files.
pub const METADATA_DIR: &str = "Carthage/Build";

/// A framework recorded for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFramework {
    /// Framework name.
    pub name: String,
    /// Content fingerprint of the built framework.
    pub hash: String,
    /// Toolchain that produced the framework, when recorded.
    #[serde(
        rename = "swiftToolchainVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub toolchain: Option<String>,
}

/// Metadata describing what an archive was built for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionFile {
    /// Version the archive was built from.
    #[serde(default)]
    pub commitish: String,
    /// Fingerprint of the dependency graph at build time.
    #[serde(
        rename = "resolvedDependenciesHash",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resolved_dependencies_hash: Option<String>,
    /// Frameworks built for iOS.
    #[serde(rename = "iOS", default, skip_serializing_if = "Option::is_none")]
    pub ios: Option<Vec<CachedFramework>>,
    /// Frameworks built for macOS.
    #[serde(rename = "Mac", default, skip_serializing_if = "Option::is_none")]
    pub mac_os: Option<Vec<CachedFramework>>,
    /// Frameworks built for tvOS.
    #[serde(rename = "tvOS", default, skip_serializing_if = "Option::is_none")]
    pub tv_os: Option<Vec<CachedFramework>>,
    /// Frameworks built for watchOS.
    #[serde(rename = "watchOS", default, skip_serializing_if = "Option::is_none")]
    pub watch_os: Option<Vec<CachedFramework>>,
}

impl VersionFile {
    /// Parses a version file.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the document is malformed.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Serialises the version file as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialisation fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Frameworks recorded for `platform`, if the platform was built.
    #[must_use]
    pub fn frameworks(&self, platform: Platform) -> Option<&[CachedFramework]> {
        match platform {
            Platform::Ios => self.ios.as_deref(),
            Platform::MacOs => self.mac_os.as_deref(),
            Platform::TvOs => self.tv_os.as_deref(),
            Platform::WatchOs => self.watch_os.as_deref(),
        }
    }

    /// Records `frameworks` as built for `platform`.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform, frameworks: Vec<CachedFramework>) -> Self {
        let slot = match platform {
            Platform::Ios => &mut self.ios,
            Platform::MacOs => &mut self.mac_os,
            Platform::TvOs => &mut self.tv_os,
            Platform::WatchOs => &mut self.watch_os,
        };
        *slot = Some(frameworks);
        self
    }

    /// Reports whether every requested platform is recorded.
    #[must_use]
    pub fn covers(&self, platforms: &PlatformSet) -> bool {
        platforms
            .iter()
            .all(|platform| self.frameworks(*platform).is_some())
    }
}

/// Returns the in-archive path of a dependency's version file.
///
/// # Examples
///
/// ```
/// use prebuilt_cache::cache::version_file_entry;
///
/// assert_eq!(version_file_entry("Foo"), "Carthage/Build/.Foo.version");
/// ```
#[must_use]
pub fn version_file_entry(dependency: &str) -> String {
    format!("{METADATA_DIR}/.{dependency}.version")
}

/// Outcome of inspecting a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryValidity {
    /// No file exists at the entry path.
    Missing,
    /// The archive carries no readable version file.
    Unversioned,
    /// The version file records every requested platform.
    Covered,
    /// The version file lacks at least one requested platform.
    Uncovered,
    /// The version file exists but is malformed.
    Corrupt,
}

impl EntryValidity {
    /// Reports whether the entry can be served without fetching.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Unversioned | Self::Covered)
    }
}

/// Inspects the archive at `archive` for the requested platforms.
pub async fn check_entry(
    archive: &Utf8Path,
    dependency: &str,
    platforms: &PlatformSet,
    extractor: &dyn ArchiveExtractor,
) -> EntryValidity {
    if !tokio::fs::try_exists(archive).await.unwrap_or(false) {
        return EntryValidity::Missing;
    }

    let scratch = match tempfile::Builder::new()
        .prefix("prebuilt-cache-version-")
        .tempdir()
    {
        Ok(dir) => dir,
        Err(err) => {
            warn!(target: LOG_TARGET, error = %err, "failed to create scratch directory; skipping metadata check");
            return EntryValidity::Unversioned;
        }
    };
    let Some(scratch_path) = Utf8Path::from_path(scratch.path()) else {
        warn!(target: LOG_TARGET, path = ?scratch.path(), "scratch directory is not UTF-8; skipping metadata check");
        return EntryValidity::Unversioned;
    };

    let entry = version_file_entry(dependency);
    if let Err(err) = extractor.extract_entry(archive, &entry, scratch_path).await {
        debug!(
            target: LOG_TARGET,
            path = %archive,
            error = %err,
            "no version file in archive; accepting as legacy artifact"
        );
        return EntryValidity::Unversioned;
    }

    let raw = match tokio::fs::read_to_string(scratch_path.join(&entry)).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return EntryValidity::Unversioned,
        Err(err) => {
            warn!(target: LOG_TARGET, path = %archive, error = %err, "unreadable version file");
            return EntryValidity::Corrupt;
        }
    };

    match VersionFile::from_json(&raw) {
        Ok(version_file) if version_file.covers(platforms) => EntryValidity::Covered,
        Ok(_) => {
            debug!(
                target: LOG_TARGET,
                path = %archive,
                platforms = ?platforms,
                "archive does not cover requested platforms"
            );
            EntryValidity::Uncovered
        }
        Err(err) => {
            warn!(target: LOG_TARGET, path = %archive, error = %err, "malformed version file");
            EntryValidity::Corrupt
        }
    }
}

/// Reports whether the archive at `archive` may be served for `platforms`.
pub async fn is_valid(
    archive: &Utf8Path,
    dependency: &str,
    platforms: &PlatformSet,
    extractor: &dyn ArchiveExtractor,
) -> bool {
    check_entry(archive, dependency, platforms, extractor)
        .await
        .is_valid()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeExtractor;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::tempdir;

    fn framework(name: &str) -> CachedFramework {
        CachedFramework {
            name: name.to_owned(),
            hash: "deadbeef".to_owned(),
            toolchain: Some("5.9".to_owned()),
        }
    }

    fn ios_and_mac() -> String {
        VersionFile::default()
            .with_platform(Platform::Ios, vec![framework("Foo")])
            .with_platform(Platform::MacOs, vec![framework("Foo")])
            .to_json()
            .expect("serialise")
    }

    fn platforms(list: &[Platform]) -> PlatformSet {
        list.iter().copied().collect()
    }

    fn archive_in(temp: &tempfile::TempDir) -> Utf8PathBuf {
        let path = Utf8Path::from_path(temp.path())
            .expect("utf8 path")
            .join("Foo.framework.zip");
        std::fs::write(&path, b"archive").expect("write archive");
        path
    }

    #[test]
    fn parses_platform_keys() {
        let parsed = VersionFile::from_json(
            r#"{"commitish":"1.0.0","iOS":[{"name":"Foo","hash":"abc"}],"Mac":[]}"#,
        )
        .expect("parse");
        assert!(parsed.frameworks(Platform::Ios).is_some());
        assert_eq!(parsed.frameworks(Platform::MacOs), Some(&[][..]));
        assert!(parsed.frameworks(Platform::TvOs).is_none());
    }

    #[tokio::test]
    async fn missing_archive_is_missing() {
        let temp = tempdir().expect("tempdir");
        let archive = Utf8Path::from_path(temp.path()).expect("utf8").join("absent.zip");
        let validity =
            check_entry(&archive, "Foo", &platforms(&[Platform::Ios]), &FakeExtractor::missing()).await;
        assert_eq!(validity, EntryValidity::Missing);
        assert!(!validity.is_valid());
    }

    #[tokio::test]
    async fn archive_without_metadata_is_valid_for_any_platforms() {
        let temp = tempdir().expect("tempdir");
        let archive = archive_in(&temp);
        let all = platforms(&Platform::ALL);
        assert!(is_valid(&archive, "Foo", &all, &FakeExtractor::missing()).await);
    }

    #[tokio::test]
    async fn malformed_metadata_is_always_invalid() {
        let temp = tempdir().expect("tempdir");
        let archive = archive_in(&temp);
        let extractor = FakeExtractor::with_contents("{ not json");
        let validity = check_entry(&archive, "Foo", &platforms(&[Platform::Ios]), &extractor).await;
        assert_eq!(validity, EntryValidity::Corrupt);
    }

    #[rstest]
    #[case(&[Platform::Ios], true)]
    #[case(&[Platform::Ios, Platform::MacOs], true)]
    #[case(&[Platform::Ios, Platform::TvOs], false)]
    #[tokio::test]
    async fn coverage_decides_validity(#[case] requested: &[Platform], #[case] expected: bool) {
        let temp = tempdir().expect("tempdir");
        let archive = archive_in(&temp);
        let extractor = FakeExtractor::with_contents(ios_and_mac());
        assert_eq!(
            is_valid(&archive, "Foo", &platforms(requested), &extractor).await,
            expected
        );
    }

    #[tokio::test]
    async fn extractor_receives_dependency_specific_entry() {
        let temp = tempdir().expect("tempdir");
        let archive = archive_in(&temp);
        let extractor = FakeExtractor::with_contents(ios_and_mac());
        let _ = check_entry(&archive, "Bar", &platforms(&[Platform::Ios]), &extractor).await;
        assert_eq!(extractor.requested_entries(), vec![version_file_entry("Bar")]);
    }
}
