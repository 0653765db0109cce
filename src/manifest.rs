//! Version-to-download mapping for binary-only dependencies.
//!
//! A manifest is a JSON object whose keys are versions and whose values are
//! either a download URL or an object with a base URL plus variants scoped to
//! a build configuration and/or toolchain:
//!
//! ```json
//! {
//!   "1.0.0": "https://example.com/Foo-1.0.0.zip",
//!   "1.1.0": {
//!     "url": "https://example.com/Foo-1.1.0.zip",
//!     "variants": [
//!       { "configuration": "Debug", "url": "https://example.com/Foo-1.1.0-debug.zip" }
//!     ]
//!   }
//! }
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;

use camino::Utf8Path;
use color_eyre::eyre::{Context, eyre};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};
use crate::model::PinnedVersion;

/// Download URLs declared by a binary-only dependency, keyed by version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct BinaryProjectManifest {
    versions: BTreeMap<String, ManifestEntry>,
}

/// Download location for a single version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawEntry")]
pub struct ManifestEntry {
    url: Url,
    variants: Vec<ManifestVariant>,
}

/// A download location restricted to a configuration and/or toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestVariant {
    configuration: Option<String>,
    toolchain: Option<String>,
    url: Url,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Plain(String),
    Detailed {
        url: String,
        #[serde(default)]
        variants: Vec<RawVariant>,
    },
}

#[derive(Deserialize)]
struct RawVariant {
    configuration: Option<String>,
    toolchain: Option<String>,
    url: String,
}

fn parse_url(raw: &str) -> Result<Url, String> {
    Url::parse(raw).map_err(|err| format!("invalid download URL '{raw}': {err}"))
}

impl TryFrom<RawEntry> for ManifestEntry {
    type Error = String;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        match raw {
            RawEntry::Plain(url) => Ok(Self::new(parse_url(&url)?)),
            RawEntry::Detailed { url, variants } => {
                let parsed = variants
                    .into_iter()
                    .map(|variant| {
                        Ok(ManifestVariant {
                            configuration: variant.configuration,
                            toolchain: variant.toolchain,
                            url: parse_url(&variant.url)?,
                        })
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                Ok(Self {
                    url: parse_url(&url)?,
                    variants: parsed,
                })
            }
        }
    }
}

impl ManifestEntry {
    /// Creates an entry with a single URL for every configuration.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            variants: Vec::new(),
        }
    }

    /// Adds a variant used when the configuration and/or toolchain match.
    #[must_use]
    pub fn with_variant(
        mut self,
        configuration: Option<&str>,
        toolchain: Option<&str>,
        url: Url,
    ) -> Self {
        self.variants.push(ManifestVariant {
            configuration: configuration.map(str::to_owned),
            toolchain: toolchain.map(str::to_owned),
            url,
        });
        self
    }

    /// Selects the most specific URL for the configuration and toolchain.
    ///
    /// A variant matching both fields wins over one matching a single field,
    /// which wins over the base URL. Ties keep declaration order.
    #[must_use]
    pub fn url_for(&self, configuration: &str, toolchain: &str) -> &Url {
        let mut best: Option<(usize, &Url)> = None;
        for variant in &self.variants {
            let Some(score) = variant.score(configuration, toolchain) else {
                continue;
            };
            if best.is_none_or(|(current, _)| score > current) {
                best = Some((score, &variant.url));
            }
        }
        best.map_or(&self.url, |(_, url)| url)
    }
}

impl ManifestVariant {
    fn score(&self, configuration: &str, toolchain: &str) -> Option<usize> {
        let mut score = 0;
        if let Some(wanted) = &self.configuration {
            if wanted != configuration {
                return None;
            }
            score += 1;
        }
        if let Some(wanted) = &self.toolchain {
            if wanted != toolchain {
                return None;
            }
            score += 1;
        }
        Some(score)
    }
}

impl BinaryProjectManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `version`.
    #[must_use]
    pub fn with_entry(mut self, version: impl Into<String>, entry: ManifestEntry) -> Self {
        self.versions.insert(version.into(), entry);
        self
    }

    /// Parses a manifest from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is not an object of versions to
    /// valid URLs.
    pub fn from_json(raw: &str) -> ConfigResult<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ConfigError::from(eyre!("invalid binary project manifest: {err}")))
    }

    /// Reads and parses a manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read binary project manifest {path}"))?;
        Self::from_json(&raw)
    }

    /// Finds the entry for a pinned version.
    ///
    /// Keys are compared verbatim first, then by semantic version so that
    /// `v1.2.3` finds an entry declared as `1.2.3`.
    #[must_use]
    pub fn entry_for(&self, version: &PinnedVersion) -> Option<&ManifestEntry> {
        if let Some(entry) = self.versions.get(version.as_str()) {
            return Some(entry);
        }
        let wanted = version.semantic()?;
        self.versions
            .iter()
            .find(|(key, _)| PinnedVersion::new(key.as_str()).semantic().as_ref() == Some(&wanted))
            .map(|(_, entry)| entry)
    }

    /// Resolves the download URL for a version, configuration, and toolchain.
    #[must_use]
    pub fn url_for(
        &self,
        version: &PinnedVersion,
        configuration: &str,
        toolchain: &str,
    ) -> Option<&Url> {
        self.entry_for(version)
            .map(|entry| entry.url_for(configuration, toolchain))
    }

    /// Returns the archive file name declared by the resolved URL, if any.
    #[must_use]
    pub fn filename_for(
        &self,
        version: &PinnedVersion,
        configuration: &str,
        toolchain: &str,
    ) -> Option<Cow<'_, str>> {
        self.url_for(version, configuration, toolchain)
            .and_then(last_path_segment)
    }
}

/// Returns the final non-empty path segment of `url`, percent-decoded.
#[must_use]
pub fn last_path_segment(url: &Url) -> Option<Cow<'_, str>> {
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?;
    Some(percent_decode_str(segment).decode_utf8_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("valid url")
    }

    #[test]
    fn parses_plain_and_detailed_entries() {
        let manifest = BinaryProjectManifest::from_json(
            r#"{
                "1.0.0": "https://example.com/Foo-1.0.0.zip",
                "1.1.0": {
                    "url": "https://example.com/Foo-1.1.0.zip",
                    "variants": [
                        { "configuration": "Debug", "url": "https://example.com/Foo-debug.zip" }
                    ]
                }
            }"#,
        )
        .expect("parse manifest");

        let release = PinnedVersion::new("1.1.0");
        assert_eq!(
            manifest.url_for(&release, "Debug", "5.9").map(Url::as_str),
            Some("https://example.com/Foo-debug.zip")
        );
        assert_eq!(
            manifest.url_for(&release, "Release", "5.9").map(Url::as_str),
            Some("https://example.com/Foo-1.1.0.zip")
        );
    }

    #[test]
    fn rejects_invalid_urls() {
        let err = BinaryProjectManifest::from_json(r#"{ "1.0.0": "not a url" }"#)
            .expect_err("invalid url");
        assert!(err.to_string().contains("invalid binary project manifest"));
    }

    #[test]
    fn matches_tags_with_leading_v() {
        let manifest = BinaryProjectManifest::new()
            .with_entry("1.2.3", ManifestEntry::new(url("https://example.com/a.zip")));
        assert!(manifest.entry_for(&PinnedVersion::new("v1.2.3")).is_some());
        assert!(manifest.entry_for(&PinnedVersion::new("1.2.4")).is_none());
    }

    #[test]
    fn most_specific_variant_wins() {
        let entry = ManifestEntry::new(url("https://example.com/base.zip"))
            .with_variant(Some("Release"), None, url("https://example.com/release.zip"))
            .with_variant(
                Some("Release"),
                Some("5.9"),
                url("https://example.com/release-5.9.zip"),
            )
            .with_variant(None, Some("6.0"), url("https://example.com/any-6.0.zip"));

        assert_eq!(entry.url_for("Release", "5.9").as_str(), "https://example.com/release-5.9.zip");
        assert_eq!(entry.url_for("Release", "5.8").as_str(), "https://example.com/release.zip");
        assert_eq!(entry.url_for("Debug", "6.0").as_str(), "https://example.com/any-6.0.zip");
        assert_eq!(entry.url_for("Debug", "5.8").as_str(), "https://example.com/base.zip");
    }

    #[test]
    fn filename_is_last_path_segment() {
        let manifest = BinaryProjectManifest::new().with_entry(
            "1.0.0",
            ManifestEntry::new(url("https://example.com/dl/Foo.xcframework.tar.gz?token=1")),
        );
        assert_eq!(
            manifest.filename_for(&PinnedVersion::new("1.0.0"), "Release", "5.9"),
            Some("Foo.xcframework.tar.gz".into())
        );
    }

    #[test]
    fn filename_is_percent_decoded() {
        let encoded = url("https://example.com/dl/Foo%20Kit.framework.zip");
        assert_eq!(
            last_path_segment(&encoded).as_deref(),
            Some("Foo Kit.framework.zip")
        );
    }

    #[test]
    fn filename_is_absent_for_bare_hosts() {
        assert_eq!(last_path_segment(&url("https://example.com/")), None);
    }
}
