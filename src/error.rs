//! Domain error types for the prebuilt artifact cache.

use color_eyre::Report;
use thiserror::Error;

/// Result alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Result alias for cache-specific fallible operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result alias for configuration fallible operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level error exposed by the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Indicates resolving or populating a cache entry failed.
    #[error("cache resolution failed: {0}")]
    Cache(#[from] CacheError),
    /// Indicates configuration parsing failed.
    #[error("configuration parsing failed: {0}")]
    Config(#[from] ConfigError),
}

/// Categorises cache failures so callers can branch on structured errors.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum CacheErrorKind {
    /// Represents errors without a more specific semantic meaning.
    #[default]
    Other,
    /// The entry lock could not be acquired before the timeout elapsed.
    LockTimeout,
    /// A binary-only dependency has no download declared for the pinned
    /// version.
    VersionNotFound,
    /// A download answered with a non-success HTTP status.
    HttpStatus,
    /// An external command exited unsuccessfully or could not be run.
    CommandFailed,
    /// A filesystem operation on the cache failed.
    Io,
}

/// Captures cache-specific failures.
#[derive(Debug, Error)]
#[error("{report}")]
pub struct CacheError {
    kind: CacheErrorKind,
    #[source]
    report: Report,
}

impl CacheError {
    /// Constructs a new cache error with the provided kind and diagnostic
    /// report.
    #[must_use]
    pub const fn new(kind: CacheErrorKind, report: Report) -> Self {
        Self { kind, report }
    }

    /// Wraps a filesystem error with a description of the failed operation.
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::new(CacheErrorKind::Io, Report::new(source).wrap_err(context.into()))
    }

    /// Returns the semantic category for this cache failure.
    #[must_use]
    pub const fn kind(&self) -> CacheErrorKind {
        self.kind
    }

    /// Borrows the underlying diagnostic report.
    #[must_use]
    pub const fn report(&self) -> &Report {
        &self.report
    }

    /// Extracts the underlying diagnostic report.
    pub fn into_report(self) -> Report {
        self.report
    }
}

impl From<Report> for CacheError {
    fn from(report: Report) -> Self {
        Self::new(CacheErrorKind::Other, report)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::new(CacheErrorKind::Io, Report::new(err))
    }
}

impl From<ConfigError> for CacheError {
    fn from(err: ConfigError) -> Self {
        let ConfigError(report) = err;
        Self::new(CacheErrorKind::Other, report)
    }
}

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);
