//! Local cache of prebuilt framework archives for a dependency manager.
//!
//! The library maps a dependency, version, build configuration, and
//! toolchain to a single archive path, serialises access to each entry
//! across processes, validates archives against the platforms a build
//! needs, and fills misses from one of three backing stores: URLs in a
//! binary project manifest, release assets on a hosting service, or a
//! user-supplied command.
//!
//! ```no_run
//! use prebuilt_cache::{
//!     CacheOutcome, CacheRequest, CacheStore, Dependency, Fetcher, HostedReleaseFetcher,
//!     HostedRepository, PinnedVersion,
//! };
//!
//! # async fn demo() -> prebuilt_cache::Result<()> {
//! let fetcher = Fetcher::from(HostedReleaseFetcher::with_reqwest()?);
//! let store = CacheStore::new("/tmp/prebuilt-cache", fetcher);
//! let request = CacheRequest::new(
//!     Dependency::hosted(HostedRepository::public("acme", "Widgets")),
//!     PinnedVersion::new("v1.2.3"),
//!     "5.9",
//! );
//! match store.resolve(&request).await? {
//!     CacheOutcome::Hit(artifact) => println!("using {}", artifact.path()),
//!     CacheOutcome::Miss => println!("building from source"),
//! }
//! # Ok(())
//! # }
//! ```

mod app;
mod archive;
pub mod cache;
mod error;
pub mod fetch;
mod manifest;
mod model;
mod observability;
mod process;
mod settings;
#[doc(hidden)]
pub mod test_support;

pub use app::run;
pub use archive::{ArchiveExtractor, UnzipExtractor};
pub use cache::{
    CacheEvent, CacheOutcome, CacheRequest, CacheStore, CachedArtifact, EntryLock, EventSink,
    LockStrategy,
};
pub use error::{
    CacheError, CacheErrorKind, CacheResult, ConfigError, ConfigResult, Error, Result,
};
pub use fetch::{
    AssetFilter, ExternalCommandFetcher, FetchContext, Fetcher, HostedReleaseFetcher,
    HttpCredentials, StaticManifestFetcher,
};
pub use manifest::{BinaryProjectManifest, ManifestEntry, ManifestVariant};
pub use model::{
    Dependency, DependencySource, HostedRepository, HostingServer, PinnedVersion, Platform,
    PlatformSet, VersionSpecifier, parse_platforms,
};
pub use process::{CommandInvocation, CommandOutput, ProcessRunner, TokioProcessRunner};
pub use settings::{CacheSettings, FetcherKind};
