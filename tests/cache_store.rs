//! Behavioural coverage for resolving cache entries end to end.

use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use prebuilt_cache::test_support::{FakeExtractor, RecordingRunner, capture_debug_logs};
use prebuilt_cache::{
    CacheErrorKind, CacheEvent, CacheOutcome, CacheRequest, CacheStore, Dependency, EntryLock,
    EventSink, ExternalCommandFetcher, Fetcher, HostedRepository, PinnedVersion, Platform,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Workspace {
    _temp: TempDir,
    root: Utf8PathBuf,
}

#[fixture]
fn workspace() -> Workspace {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = Utf8Path::from_path(temp.path())
        .expect("utf8 tempdir")
        .join("cache");
    Workspace { _temp: temp, root }
}

#[fixture]
fn foo_request() -> CacheRequest {
    CacheRequest::new(
        Dependency::hosted(HostedRepository::public("acme", "Foo")),
        PinnedVersion::new("v1.2.3"),
        "5.0",
    )
    .with_configuration("Release")
    .with_platforms([Platform::Ios].into_iter().collect())
}

fn command_store(root: &Utf8Path, runner: &Arc<RecordingRunner>) -> CacheStore {
    let fetcher = ExternalCommandFetcher::new("fetch-binaries").with_runner(runner.clone());
    CacheStore::new(root, Fetcher::from(fetcher)).with_extractor(Arc::new(FakeExtractor::missing()))
}

#[rstest]
#[tokio::test]
async fn unconfigured_store_misses_without_error(workspace: Workspace, foo_request: CacheRequest) {
    let store = CacheStore::local_only(&workspace.root)
        .with_extractor(Arc::new(FakeExtractor::missing()));

    assert_eq!(
        store.entry_path(&foo_request),
        workspace.root.join("5.0/Foo/v1.2.3/Release/Foo.framework.zip")
    );
    let outcome = store.resolve(&foo_request).await.expect("resolve");
    assert!(matches!(outcome, CacheOutcome::Miss));

    // A miss releases the lock, so the entry is immediately available again.
    let mut lock = EntryLock::acquire(&store.entry_path(&foo_request), Some(Duration::ZERO))
        .await
        .expect("lock released after miss");
    lock.release();
}

#[rstest]
fn entry_paths_are_deterministic(workspace: Workspace, foo_request: CacheRequest) {
    let store = CacheStore::local_only(&workspace.root);
    let first = store.entry_path(&foo_request);
    let second = store.entry_path(&foo_request.clone());
    assert_eq!(first, second);
}

#[rstest]
#[case(true, false)]
#[case(false, true)]
fn strict_matching_separates_fingerprints(
    workspace: Workspace,
    foo_request: CacheRequest,
    #[case] strict: bool,
    #[case] same_path: bool,
) {
    let store = CacheStore::local_only(&workspace.root);
    let first = foo_request
        .clone()
        .with_resolved_hash("aaaa")
        .with_strict_match(strict);
    let second = foo_request.with_resolved_hash("bbbb").with_strict_match(strict);
    assert_eq!(store.entry_path(&first) == store.entry_path(&second), same_path);
}

#[rstest]
#[tokio::test]
async fn command_fetch_populates_the_entry(workspace: Workspace, foo_request: CacheRequest) {
    let runner = Arc::new(RecordingRunner::producing("zip bytes"));
    let (events, mut receiver) = EventSink::channel();
    let store = command_store(&workspace.root, &runner).with_events(events);

    let outcome = store.resolve(&foo_request).await.expect("resolve");
    let CacheOutcome::Hit(artifact) = outcome else {
        panic!("expected a populated entry");
    };
    assert_eq!(artifact.path(), store.entry_path(&foo_request));
    assert_eq!(std::fs::read(artifact.path()).expect("read"), b"zip bytes");
    assert!(artifact.lock().is_held());
    drop(artifact.release());

    assert_eq!(runner.call_count(), 1);
    assert!(matches!(
        receiver.try_recv(),
        Ok(CacheEvent::DownloadingBinaries { ref version, .. }) if version == "v1.2.3"
    ));
}

#[rstest]
#[tokio::test]
async fn valid_entries_are_served_without_fetching(
    workspace: Workspace,
    foo_request: CacheRequest,
) {
    let runner = Arc::new(RecordingRunner::producing("fresh"));
    let store = command_store(&workspace.root, &runner);
    let path = store.entry_path(&foo_request);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, b"already cached").expect("seed");

    let outcome = store.resolve(&foo_request).await.expect("resolve");
    assert!(outcome.is_hit());
    assert_eq!(runner.call_count(), 0);
    assert_eq!(std::fs::read(&path).expect("read"), b"already cached");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_resolutions_fetch_once(workspace: Workspace, foo_request: CacheRequest) {
    let runner = Arc::new(RecordingRunner::producing("zip").with_delay(Duration::from_millis(50)));
    let store = Arc::new(command_store(&workspace.root, &runner));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let task_store = Arc::clone(&store);
        let request = foo_request.clone();
        handles.push(tokio::spawn(async move {
            match task_store.resolve(&request).await.expect("resolve") {
                CacheOutcome::Hit(artifact) => Some(artifact.release()),
                CacheOutcome::Miss => None,
            }
        }));
    }

    for handle in handles {
        let path = handle.await.expect("join");
        assert_eq!(path, Some(store.entry_path(&foo_request)));
    }
    assert_eq!(runner.call_count(), 1);
}

#[rstest]
#[tokio::test]
async fn failed_command_leaves_no_partial_artifact(
    workspace: Workspace,
    foo_request: CacheRequest,
) {
    let runner = Arc::new(RecordingRunner::failing(3, "half an archive"));
    let store = command_store(&workspace.root, &runner);
    let path = store.entry_path(&foo_request);

    let err = store.resolve(&foo_request).await.expect_err("command failure");
    assert_eq!(err.kind(), CacheErrorKind::CommandFailed);
    assert!(err.to_string().contains("Foo"));
    assert!(!path.exists(), "partial output must never reach the entry path");

    let leftovers: Vec<_> = std::fs::read_dir(path.parent().expect("parent"))
        .expect("list entry dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(".fetch-"))
        .collect();
    assert!(leftovers.is_empty(), "staging directories are cleaned up");
}

#[rstest]
#[tokio::test]
async fn command_without_output_is_a_miss(workspace: Workspace, foo_request: CacheRequest) {
    let runner = Arc::new(RecordingRunner::producing_nothing());
    let store = command_store(&workspace.root, &runner);

    let outcome = store.resolve(&foo_request).await.expect("resolve");
    assert!(!outcome.is_hit());
    assert_eq!(runner.call_count(), 1);
}

#[rstest]
#[tokio::test]
async fn held_entries_time_out_other_resolvers(workspace: Workspace, foo_request: CacheRequest) {
    let store = CacheStore::local_only(&workspace.root)
        .with_extractor(Arc::new(FakeExtractor::missing()));
    let path = store.entry_path(&foo_request);
    let _held = EntryLock::acquire(&path, None).await.expect("hold lock");

    let request = foo_request.with_lock_timeout(Some(Duration::from_millis(100)));
    let err = store.resolve(&request).await.expect_err("timeout");
    assert_eq!(err.kind(), CacheErrorKind::LockTimeout);
}

#[rstest]
#[tokio::test]
async fn uncovered_archives_are_refetched(workspace: Workspace, foo_request: CacheRequest) {
    let metadata = r#"{"commitish":"v1.2.3","Mac":[{"name":"Foo","hash":"abc"}]}"#;
    let runner = Arc::new(RecordingRunner::producing("rebuilt"));
    let fetcher = ExternalCommandFetcher::new("fetch-binaries").with_runner(runner.clone());
    let store = CacheStore::new(&workspace.root, Fetcher::from(fetcher))
        .with_extractor(Arc::new(FakeExtractor::with_contents(metadata)));
    let path = store.entry_path(&foo_request);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, b"macOS only").expect("seed");

    let outcome = store.resolve(&foo_request).await.expect("resolve");
    assert!(outcome.is_hit());
    assert_eq!(runner.call_count(), 1);
    assert_eq!(std::fs::read(&path).expect("read"), b"rebuilt");
}

#[rstest]
fn misses_are_logged_quietly(workspace: Workspace, foo_request: CacheRequest) {
    let store = CacheStore::local_only(&workspace.root)
        .with_extractor(Arc::new(FakeExtractor::missing()));
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    let (logs, outcome) = capture_debug_logs(|| runtime.block_on(store.resolve(&foo_request)));
    assert!(!outcome.expect("resolve").is_hit());
    assert!(logs.iter().any(|line| line.contains("cache miss")));
    assert!(!logs.iter().any(|line| line.contains("WARN")));
}
