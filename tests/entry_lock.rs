//! Cross-process coverage for entry locks.
//!
//! Uses a subprocess pattern: the parent re-runs this test binary as a child
//! which takes the lock on a shared entry, writes a readiness file, and then
//! blocks. The parent confirms it cannot take the lock while the child lives
//! and that the lock becomes available once the child is killed.
#![cfg(unix)]

use std::process::{Child, Command, Stdio};
use std::time::Duration;
use std::{env, fs};

use camino::Utf8Path;
use color_eyre::eyre::{Context, Result, ensure, eyre};
use prebuilt_cache::{CacheErrorKind, EntryLock, LockStrategy};
use rstest::rstest;
use tokio::time::{Instant, sleep};

/// Entry path the child locks; its presence marks the child process.
const CHILD_ENTRY_KEY: &str = "PREBUILT_CACHE_LOCK_CHILD_ENTRY";

/// File the child writes once it holds the lock.
const CHILD_READY_KEY: &str = "PREBUILT_CACHE_LOCK_CHILD_READY";

/// Lock backend the child uses.
const CHILD_STRATEGY_KEY: &str = "PREBUILT_CACHE_LOCK_CHILD_STRATEGY";

/// How long the child holds the lock before giving up on being killed.
const CHILD_HOLD: Duration = Duration::from_secs(60);

/// Maximum time to wait for the child to report that it holds the lock.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ============================================================================
// Parent (test harness)
// ============================================================================

#[rstest]
#[case(LockStrategy::Advisory)]
#[case(LockStrategy::PidFile)]
#[tokio::test]
async fn lock_held_by_another_process_is_released_when_it_dies(
    #[case] strategy: LockStrategy,
) -> Result<()> {
    let temp = tempfile::tempdir().context("create temp dir")?;
    let root = Utf8Path::from_path(temp.path()).ok_or_else(|| eyre!("non-UTF-8 temp path"))?;
    let entry = root.join("5.0/Foo/v1.2.3/Release/Foo.framework.zip");
    let ready = root.join("child.ready");

    let mut holder = LockHolder::spawn(&entry, &ready, strategy)?;
    holder.wait_until_ready(&ready).await?;

    let Err(err) =
        EntryLock::acquire_with(&entry, Some(Duration::from_millis(200)), strategy).await
    else {
        return Err(eyre!("acquired an entry the child process still holds"));
    };
    ensure!(
        err.kind() == CacheErrorKind::LockTimeout,
        "expected a lock timeout, got: {err}"
    );

    holder.kill()?;
    let lock = EntryLock::acquire_with(&entry, Some(Duration::from_secs(5)), strategy)
        .await
        .context("acquire after the holder died")?;
    ensure!(lock.is_held(), "lock should be held after the holder died");
    Ok(())
}

/// Child process holding an entry lock; killed on drop.
struct LockHolder {
    child: Child,
}

impl LockHolder {
    fn spawn(entry: &Utf8Path, ready: &Utf8Path, strategy: LockStrategy) -> Result<Self> {
        let exe = env::current_exe().context("resolve current exe")?;
        let child = Command::new(exe)
            .env(CHILD_ENTRY_KEY, entry.as_str())
            .env(CHILD_READY_KEY, ready.as_str())
            .env(CHILD_STRATEGY_KEY, strategy_name(strategy))
            .arg("--ignored")
            .arg("--exact")
            .arg("entry_lock_child_entry")
            .stdout(Stdio::null())
            .spawn()
            .context("spawn child process")?;
        Ok(Self { child })
    }

    async fn wait_until_ready(&mut self, ready: &Utf8Path) -> Result<()> {
        let deadline = Instant::now() + READY_TIMEOUT;
        while !ready.exists() {
            if let Some(status) = self.child.try_wait().context("poll child")? {
                return Err(eyre!("child exited with {status} before taking the lock"));
            }
            if Instant::now() >= deadline {
                return Err(eyre!("child did not take the lock within {READY_TIMEOUT:?}"));
            }
            sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.child.kill().context("kill child")?;
        self.child.wait().context("reap child")?;
        Ok(())
    }
}

impl Drop for LockHolder {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) && self.child.kill().is_ok() {
            drop(self.child.wait());
        }
    }
}

const fn strategy_name(strategy: LockStrategy) -> &'static str {
    match strategy {
        LockStrategy::Advisory => "advisory",
        LockStrategy::PidFile => "pid-file",
    }
}

fn parse_strategy(raw: &str) -> Result<LockStrategy> {
    match raw {
        "advisory" => Ok(LockStrategy::Advisory),
        "pid-file" => Ok(LockStrategy::PidFile),
        other => Err(eyre!("unknown lock strategy '{other}'")),
    }
}

// ============================================================================
// Child (subprocess entry point)
// ============================================================================

/// Entry point for the child subprocess.
///
/// Does nothing unless `CHILD_ENTRY_KEY` is set. Otherwise it takes the lock,
/// writes its PID to the readiness file, and sleeps until it is killed.
#[test]
#[ignore = "child subprocess entry point, not a standalone test"]
fn entry_lock_child_entry() -> Result<()> {
    let Ok(entry) = env::var(CHILD_ENTRY_KEY) else {
        return Ok(());
    };
    let ready = env::var(CHILD_READY_KEY).context("read readiness path")?;
    let strategy = parse_strategy(&env::var(CHILD_STRATEGY_KEY).context("read strategy")?)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("create child runtime")?;
    runtime.block_on(async {
        let _lock =
            EntryLock::acquire_with(Utf8Path::new(&entry), Some(Duration::from_secs(5)), strategy)
                .await?;
        fs::write(&ready, std::process::id().to_string()).context("write readiness file")?;
        sleep(CHILD_HOLD).await;
        Ok::<(), color_eyre::Report>(())
    })
}
