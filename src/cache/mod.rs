//! Local cache of prebuilt framework archives.
//!
//! Each archive is stored under a path derived from its cache key, so
//! unrelated dependencies, versions, configurations, and toolchains never
//! collide. Misses are filled by the configured [`Fetcher`](crate::Fetcher).
//!
//! # Cache Location
//!
//! The cache root is resolved in the following order:
//!
//! 1. `PREBUILT_CACHE_DIR` environment variable if set
//! 2. `$XDG_CACHE_HOME/prebuilt-cache/binaries` if `XDG_CACHE_HOME` is set
//! 3. `~/.cache/prebuilt-cache/binaries` as fallback
//! 4. the system temporary directory when no home directory is known
//!
//! # Cross-Process Coordination
//!
//! Every entry has a sibling `.lock` file. The lock is taken before the
//! entry is inspected and held until the caller releases the artifact, so
//! concurrent resolutions of one entry fetch at most once while different
//! entries proceed in parallel.

mod config;
mod events;
mod lock;
mod path;
mod store;
mod version_file;

pub use config::{CACHE_DIR_ENV, resolve_cache_dir};
pub use events::{CacheEvent, EventSink};
pub use lock::{EntryLock, LockStrategy, lock_path_for};
pub use path::CacheKey;
pub use store::{CacheOutcome, CacheRequest, CacheStore, CachedArtifact, DEFAULT_CONFIGURATION};
pub use version_file::{
    CachedFramework, EntryValidity, METADATA_DIR, VersionFile, check_entry, is_valid,
    version_file_entry,
};
