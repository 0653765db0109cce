//! Resolves a single prebuilt framework archive from the local cache,
//! fetching it with the configured strategy when it is missing.
//!
//! Configuration is provided via `PREBUILT_CACHE_*` environment variables
//! parsed by [`OrthoConfig`](https://github.com/leynos/ortho-config). On a
//! hit the archive path is printed to standard output. The binary exits with
//! status code `0` on a hit or a miss and `1` on error.

use tracing_subscriber::EnvFilter;

fn main() -> color_eyre::eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    prebuilt_cache::run().map_err(|err| color_eyre::eyre::eyre!(err))?;
    Ok(())
}
