//! Configuration for the shared artifact cache root.
//!
//! Resolves the cache directory from environment variables with XDG-compliant
//! fallback paths.

use camino::Utf8PathBuf;
use std::path::PathBuf;

/// Subdirectory path within the XDG cache home.
const CACHE_SUBDIR: &str = "prebuilt-cache/binaries";

/// Environment variable that overrides the cache root.
pub const CACHE_DIR_ENV: &str = "PREBUILT_CACHE_DIR";

/// Resolves the cache root from environment and XDG conventions.
///
/// The resolution order is:
///
/// 1. `PREBUILT_CACHE_DIR` environment variable if set and valid UTF-8
/// 2. `$XDG_CACHE_HOME/prebuilt-cache/binaries` if `XDG_CACHE_HOME` is set
/// 3. `~/.cache/prebuilt-cache/binaries` as fallback
/// 4. `<temp>/prebuilt-cache/binaries` as last resort
///
/// # Examples
///
/// ```
/// use prebuilt_cache::cache::resolve_cache_dir;
///
/// let cache_dir = resolve_cache_dir();
/// assert!(!cache_dir.as_str().is_empty());
/// ```
#[must_use]
pub fn resolve_cache_dir() -> Utf8PathBuf {
    resolve_from_env()
        .or_else(resolve_from_xdg_cache)
        .or_else(resolve_from_home)
        .unwrap_or_else(resolve_from_temp)
}

/// Reads a non-blank environment variable as a UTF-8 path.
fn env_path(name: &str) -> Option<Utf8PathBuf> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Utf8PathBuf::from_path_buf(PathBuf::from(trimmed)).ok()
}

fn resolve_from_env() -> Option<Utf8PathBuf> {
    env_path(CACHE_DIR_ENV)
}

fn resolve_from_xdg_cache() -> Option<Utf8PathBuf> {
    env_path("XDG_CACHE_HOME").map(|path| path.join(CACHE_SUBDIR))
}

fn resolve_from_home() -> Option<Utf8PathBuf> {
    let home = dirs::home_dir()?;
    let path = Utf8PathBuf::from_path_buf(home).ok()?;
    Some(path.join(".cache").join(CACHE_SUBDIR))
}

fn resolve_from_temp() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(std::env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
        .join(CACHE_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use temp_env::with_vars;

    #[test]
    #[serial]
    fn resolve_cache_dir_respects_explicit_env_var() {
        let expected = "/custom/cache/path";
        let result = with_vars(
            [
                (CACHE_DIR_ENV, Some(expected)),
                ("XDG_CACHE_HOME", None::<&str>),
            ],
            resolve_cache_dir,
        );
        assert_eq!(result.as_str(), expected);
    }

    #[test]
    #[serial]
    fn resolve_cache_dir_uses_xdg_cache_home_when_env_var_unset() {
        let xdg_cache = "/home/testuser/.cache";
        let result = with_vars(
            [
                (CACHE_DIR_ENV, None::<&str>),
                ("XDG_CACHE_HOME", Some(xdg_cache)),
            ],
            resolve_cache_dir,
        );
        assert_eq!(
            result.as_str(),
            format!("{xdg_cache}/{CACHE_SUBDIR}").as_str()
        );
    }

    #[test]
    #[serial]
    fn resolve_cache_dir_ignores_whitespace_only_env_var() {
        let xdg_cache = "/home/testuser/.cache";
        let result = with_vars(
            [
                (CACHE_DIR_ENV, Some("   ")),
                ("XDG_CACHE_HOME", Some(xdg_cache)),
            ],
            resolve_cache_dir,
        );
        assert_eq!(
            result.as_str(),
            format!("{xdg_cache}/{CACHE_SUBDIR}").as_str()
        );
    }
}
