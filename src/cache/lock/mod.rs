//! Cross-process locking of individual cache entries.
//!
//! Each entry path gets a sibling `<filename>.lock` file holding an OS file
//! lock (`flock(2)` on Unix, `LockFileEx` on Windows). The OS drops the lock
//! when the holder exits, so a crashed process never wedges other waiters.
//! A PID-stamped lock file with staleness detection is available for
//! filesystems where OS locks are unreliable.
//!
//! Waiting never blocks a runtime thread: acquisition polls with a
//! non-blocking attempt and sleeps asynchronously between attempts.

mod pid_file;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::eyre::eyre;
use fs4::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheErrorKind, CacheResult};
use crate::observability::LOCK_LOG_TARGET;

/// Extension appended to an entry's file name to form its lock path.
const LOCK_EXTENSION: &str = "lock";

/// First pause between acquisition attempts.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Upper bound on the pause between acquisition attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(250);

/// Windows `ERROR_LOCK_VIOLATION`, reported for a contended lock.
#[cfg(windows)]
const LOCK_VIOLATION: i32 = 33;

/// Locking primitive used for an entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockStrategy {
    /// OS file lock on the lock file.
    #[default]
    Advisory,
    /// Exclusive-create lock file stamped with the holder's PID.
    PidFile,
}

#[derive(Debug)]
enum HeldLock {
    Advisory(File),
    PidFile,
}

/// Exclusive hold on a single cache entry.
///
/// At most one `EntryLock` exists for a given entry path across all
/// processes. The lock is released by [`EntryLock::release`] or when the
/// guard is dropped, whichever happens first.
#[derive(Debug)]
pub struct EntryLock {
    entry: Utf8PathBuf,
    lock_path: Utf8PathBuf,
    held: Option<HeldLock>,
}

impl EntryLock {
    /// Acquires the lock for `entry` with the default strategy.
    ///
    /// `None` waits indefinitely; a zero timeout makes a single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`CacheErrorKind::LockTimeout`] when the timeout elapses and
    /// [`CacheErrorKind::Io`] when the lock file cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use camino::Utf8Path;
    /// use prebuilt_cache::cache::EntryLock;
    ///
    /// # async fn demo() -> prebuilt_cache::CacheResult<()> {
    /// let entry = Utf8Path::new("/tmp/cache/5.9/Foo/1.0.0/Release/Foo.framework.zip");
    /// let mut lock = EntryLock::acquire(entry, None).await?;
    /// // exclusive access to the entry
    /// lock.release();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn acquire(entry: &Utf8Path, timeout: Option<Duration>) -> CacheResult<Self> {
        Self::acquire_with(entry, timeout, LockStrategy::default()).await
    }

    /// Acquires the lock for `entry` using an explicit strategy.
    ///
    /// # Errors
    ///
    /// See [`EntryLock::acquire`].
    pub async fn acquire_with(
        entry: &Utf8Path,
        timeout: Option<Duration>,
        strategy: LockStrategy,
    ) -> CacheResult<Self> {
        let lock_path = lock_path_for(entry);
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| CacheError::io(format!("failed to create cache directory {parent}"), err))?;
        }

        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut backoff = INITIAL_BACKOFF;
        let mut announced = false;
        loop {
            let attempt = try_lock(&lock_path, strategy)
                .map_err(|err| CacheError::io(format!("failed to lock {lock_path}"), err))?;
            if let Some(held) = attempt {
                debug!(target: LOCK_LOG_TARGET, path = %entry, ?strategy, "entry lock acquired");
                return Ok(Self {
                    entry: entry.to_owned(),
                    lock_path,
                    held: Some(held),
                });
            }

            let pause = match deadline {
                None => backoff,
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        return Err(timeout_error(entry, timeout.unwrap_or_default()));
                    }
                    backoff.min(limit - now)
                }
            };
            if !announced {
                debug!(target: LOCK_LOG_TARGET, path = %entry, "waiting for entry lock");
                announced = true;
            }
            sleep(pause).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Path of the cache entry this lock protects.
    #[must_use]
    pub fn entry_path(&self) -> &Utf8Path {
        &self.entry
    }

    /// Path of the backing lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Utf8Path {
        &self.lock_path
    }

    /// Reports whether the lock is still held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Releases the lock. Calling this more than once has no further effect.
    pub fn release(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        match held {
            HeldLock::Advisory(file) => {
                if let Err(err) = FileExt::unlock(&file) {
                    warn!(
                        target: LOCK_LOG_TARGET,
                        error = %err,
                        "failed to unlock entry; closing the file releases it"
                    );
                }
            }
            HeldLock::PidFile => {
                if let Err(err) = pid_file::release(&self.lock_path) {
                    warn!(
                        target: LOCK_LOG_TARGET,
                        path = %self.lock_path,
                        error = %err,
                        "failed to remove lock file"
                    );
                }
            }
        }
        debug!(target: LOCK_LOG_TARGET, path = %self.entry, "entry lock released");
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Returns the lock file path for an entry.
#[must_use]
pub fn lock_path_for(entry: &Utf8Path) -> Utf8PathBuf {
    let name = entry.file_name().unwrap_or("entry");
    entry.with_file_name(format!("{name}.{LOCK_EXTENSION}"))
}

fn timeout_error(entry: &Utf8Path, timeout: Duration) -> CacheError {
    CacheError::new(
        CacheErrorKind::LockTimeout,
        eyre!(
            "timed out after {}ms waiting for the cache lock on {entry}",
            timeout.as_millis()
        ),
    )
}

fn try_lock(lock_path: &Utf8Path, strategy: LockStrategy) -> io::Result<Option<HeldLock>> {
    match strategy {
        LockStrategy::Advisory => Ok(try_lock_advisory(lock_path)?.map(HeldLock::Advisory)),
        LockStrategy::PidFile => {
            Ok(pid_file::try_acquire(lock_path)?.then_some(HeldLock::PidFile))
        }
    }
}

fn try_lock_advisory(lock_path: &Utf8Path) -> io::Result<Option<File>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(file)),
        Err(err) if is_contended(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

fn is_contended(err: &io::Error) -> bool {
    #[cfg(windows)]
    if err.raw_os_error() == Some(LOCK_VIOLATION) {
        return true;
    }
    err.kind() == io::ErrorKind::WouldBlock
}
