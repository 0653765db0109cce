//! Entry point shared by the binary: resolve one entry from the environment.

use color_eyre::eyre::Context;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::cache::CacheOutcome;
use crate::error::{CacheError, Result};
use crate::observability::LOG_TARGET;
use crate::settings::CacheSettings;

/// Constructs the current-thread runtime the binary drives resolution on.
fn build_runtime() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create Tokio runtime")
        .map_err(|err| CacheError::from(err).into())
}

#[expect(
    clippy::print_stdout,
    reason = "the archive path on stdout is the binary's output contract"
)]
fn print_path(path: &camino::Utf8Path) {
    println!("{path}");
}

/// Resolves the entry described by `PREBUILT_CACHE_*` variables.
///
/// On a hit the archive path is printed to standard output; a miss is
/// logged and is not an error.
///
/// # Errors
///
/// Returns configuration errors, lock timeouts, and fatal fetch failures.
pub fn run() -> Result<()> {
    let settings = CacheSettings::load()?;
    let store = settings.to_store()?;
    let request = settings.to_request()?;
    let runtime = build_runtime()?;

    match runtime.block_on(store.resolve(&request))? {
        CacheOutcome::Hit(artifact) => {
            let path = artifact.release();
            info!(target: LOG_TARGET, path = %path, "cached binaries available");
            print_path(&path);
        }
        CacheOutcome::Miss => {
            info!(
                target: LOG_TARGET,
                dependency = request.dependency.name(),
                version = request.version.as_str(),
                "no cached binaries; build from source"
            );
        }
    }
    Ok(())
}
