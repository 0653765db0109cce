//! Deterministic mapping from cache keys to storage paths.
//!
//! Every entry lives at
//! `<root>/<toolchain>/<dependency>/<version>/<configuration>/<filename>`.
//! Segments are percent-escaped so that distinct inputs never share a path.

use std::borrow::Cow;

use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Suffix of synthesised archive names.
const ARCHIVE_SUFFIX: &str = ".framework.zip";

/// Bytes escaped inside a path segment; `%` keeps the escape reversible.
const SEGMENT_ESCAPES: &AsciiSet = &CONTROLS.add(b'%').add(b'/').add(b'\\');

/// Inputs that identify a single cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey<'a> {
    /// Dependency name.
    pub dependency: &'a str,
    /// Pinned version string.
    pub version: &'a str,
    /// Build configuration tag.
    pub configuration: &'a str,
    /// Fingerprint of the resolved dependency graph, present only in
    /// strict-match mode.
    pub resolved_hash: Option<&'a str>,
    /// Toolchain version the artifact was built with.
    pub toolchain: &'a str,
    /// Archive name declared by a manifest download URL, already decoded.
    pub manifest_filename: Option<Cow<'a, str>>,
}

impl CacheKey<'_> {
    /// Returns the archive file name for this key.
    ///
    /// A resolved hash takes precedence, then a manifest-declared name, then
    /// the synthesised `<dependency>.framework.zip`.
    ///
    /// # Examples
    ///
    /// ```
    /// use prebuilt_cache::cache::CacheKey;
    ///
    /// let key = CacheKey {
    ///     dependency: "Foo",
    ///     version: "v1.2.3",
    ///     configuration: "Release",
    ///     resolved_hash: None,
    ///     toolchain: "5.0",
    ///     manifest_filename: None,
    /// };
    /// assert_eq!(key.filename(), "Foo.framework.zip");
    /// ```
    #[must_use]
    pub fn filename(&self) -> String {
        let dependency = sanitise_segment(self.dependency);
        if let Some(hash) = self.resolved_hash.filter(|hash| !hash.is_empty()) {
            return format!("{dependency}-{}{ARCHIVE_SUFFIX}", sanitise_segment(hash));
        }
        if let Some(name) = self.manifest_filename.as_deref().filter(|name| !name.is_empty()) {
            return sanitise_segment(name);
        }
        format!("{dependency}{ARCHIVE_SUFFIX}")
    }

    /// Returns the directory holding this entry beneath `root`.
    #[must_use]
    pub fn directory(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(sanitise_segment(self.toolchain))
            .join(sanitise_segment(self.dependency))
            .join(sanitise_segment(self.version))
            .join(sanitise_segment(self.configuration))
    }

    /// Returns the full storage path for this entry beneath `root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use prebuilt_cache::cache::CacheKey;
    ///
    /// let key = CacheKey {
    ///     dependency: "Foo",
    ///     version: "v1.2.3",
    ///     configuration: "Release",
    ///     resolved_hash: None,
    ///     toolchain: "5.0",
    ///     manifest_filename: None,
    /// };
    /// assert_eq!(
    ///     key.entry_path(Utf8Path::new("/cache")).as_str(),
    ///     "/cache/5.0/Foo/v1.2.3/Release/Foo.framework.zip"
    /// );
    /// ```
    #[must_use]
    pub fn entry_path(&self, root: &Utf8Path) -> Utf8PathBuf {
        self.directory(root).join(self.filename())
    }
}

/// Escapes `raw` into exactly one directory level.
///
/// Separators, control bytes, `%`, and a leading `.` are percent-encoded; an
/// empty input becomes a bare `%`, which no escaped input can produce.
fn sanitise_segment(raw: &str) -> String {
    if raw.is_empty() {
        return "%".to_owned();
    }
    let escaped = utf8_percent_encode(raw, SEGMENT_ESCAPES).to_string();
    if escaped.starts_with('.') {
        escaped.replacen('.', "%2E", 1)
    } else {
        escaped
    }
}
