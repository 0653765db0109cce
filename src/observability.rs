//! Shared tracing configuration for observability instrumentation.
//!
//! Centralises the log targets used by the crate so subscribers can filter
//! cache events without pulling in unrelated application logs.

/// Target used by cache orchestration spans and logs.
pub(crate) const LOG_TARGET: &str = "prebuilt_cache::cache";

/// Target used by entry lock acquisition and release.
pub(crate) const LOCK_LOG_TARGET: &str = "prebuilt_cache::lock";

/// Target used by the download strategies.
pub(crate) const FETCH_LOG_TARGET: &str = "prebuilt_cache::fetch";
