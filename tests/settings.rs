//! Validates translating environment settings into cache requests and stores.

use std::time::Duration;

use camino::Utf8PathBuf;
use prebuilt_cache::{
    CacheSettings, DependencySource, Fetcher, FetcherKind, HostingServer, Platform,
};
use rstest::rstest;
use serial_test::serial;
use temp_env::with_vars;

const BASE_VARS: [(&str, Option<&str>); 3] = [
    ("PREBUILT_CACHE_DEPENDENCY", Some("Foo")),
    ("PREBUILT_CACHE_VERSION", Some("v1.2.3")),
    ("PREBUILT_CACHE_TOOLCHAIN", Some("5.0")),
];

fn with_settings_env<R>(extra: &[(&str, Option<&str>)], body: impl FnOnce() -> R) -> R {
    let mut vars: Vec<(&str, Option<&str>)> = BASE_VARS.to_vec();
    vars.extend_from_slice(extra);
    with_vars(vars, body)
}

#[rstest]
#[serial]
fn loads_request_from_environment() -> color_eyre::Result<()> {
    let settings = with_settings_env(
        &[
            ("PREBUILT_CACHE_CONFIGURATION", Some("Debug")),
            ("PREBUILT_CACHE_PLATFORMS", Some("iOS,tvOS")),
            ("PREBUILT_CACHE_LOCK_TIMEOUT_SECS", Some("30")),
            ("PREBUILT_CACHE_RESOLVED_HASH", Some("cafe")),
            ("PREBUILT_CACHE_STRICT_MATCH", Some("true")),
        ],
        CacheSettings::load,
    )?;
    let request = settings.to_request()?;

    assert_eq!(request.dependency.name(), "Foo");
    assert_eq!(request.version.as_str(), "v1.2.3");
    assert_eq!(request.configuration, "Debug");
    assert_eq!(request.toolchain, "5.0");
    assert_eq!(request.lock_timeout, Some(Duration::from_secs(30)));
    assert_eq!(
        request.platforms,
        [Platform::Ios, Platform::TvOs].into_iter().collect()
    );
    assert!(request.strict_match);
    assert_eq!(request.resolved_hash.as_deref(), Some("cafe"));
    Ok(())
}

#[rstest]
#[serial]
fn token_becomes_request_credentials() -> color_eyre::Result<()> {
    let settings = with_settings_env(
        &[("PREBUILT_CACHE_TOKEN", Some("ghp_example"))],
        CacheSettings::load,
    )?;
    let request = settings.to_request()?;
    assert!(request.credentials.is_some());
    assert!(!format!("{request:?}").contains("ghp_example"));
    Ok(())
}

#[rstest]
#[serial]
fn repository_selects_hosted_source() -> color_eyre::Result<()> {
    let settings = with_settings_env(
        &[
            ("PREBUILT_CACHE_REPOSITORY", Some("acme/Widgets")),
            ("PREBUILT_CACHE_FETCHER", Some("hosted")),
        ],
        CacheSettings::load,
    )?;
    assert_eq!(settings.fetcher_kind()?, FetcherKind::Hosted);

    let request = settings.to_request()?;
    assert_eq!(request.dependency.name(), "Foo");
    let DependencySource::Hosted(repository) = request.dependency.source() else {
        panic!("expected a hosted dependency");
    };
    assert_eq!(repository.server, HostingServer::Public);
    assert_eq!(repository.to_string(), "acme/Widgets");
    Ok(())
}

#[rstest]
#[serial]
fn command_fetcher_is_built_from_environment() -> color_eyre::Result<()> {
    let temp = tempfile::tempdir()?;
    let cache_dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .map_err(|path| color_eyre::eyre::eyre!("non-UTF-8 temp path: {path:?}"))?;
    let settings = with_settings_env(
        &[
            ("PREBUILT_CACHE_FETCHER", Some("command")),
            ("PREBUILT_CACHE_EXTERNAL_COMMAND", Some("./fetch.sh")),
            ("PREBUILT_CACHE_COMMAND_TIMEOUT_SECS", Some("120")),
            ("PREBUILT_CACHE_CACHE_DIR", Some(cache_dir.as_str())),
        ],
        CacheSettings::load,
    )?;

    let store = settings.to_store()?;
    assert_eq!(store.root(), cache_dir);
    assert!(matches!(
        store.fetcher(),
        Fetcher::ExternalCommand(fetcher) if fetcher.is_enabled()
    ));
    Ok(())
}

#[rstest]
#[serial]
fn missing_identity_is_a_configuration_error() -> color_eyre::Result<()> {
    let settings = with_vars(
        [
            ("PREBUILT_CACHE_DEPENDENCY", None::<&str>),
            ("PREBUILT_CACHE_REPOSITORY", None),
            ("PREBUILT_CACHE_VERSION", Some("1.0.0")),
            ("PREBUILT_CACHE_TOOLCHAIN", Some("5.0")),
        ],
        CacheSettings::load,
    )?;
    let err = settings.to_request().expect_err("no dependency");
    assert!(err.to_string().contains("PREBUILT_CACHE_DEPENDENCY"));
    Ok(())
}

#[rstest]
#[case("iOS,Android")]
#[case("windows")]
#[serial]
fn unknown_platforms_are_rejected(#[case] platforms: &str) -> color_eyre::Result<()> {
    let settings = with_settings_env(
        &[("PREBUILT_CACHE_PLATFORMS", Some(platforms))],
        CacheSettings::load,
    )?;
    assert!(settings.to_request().is_err());
    Ok(())
}
