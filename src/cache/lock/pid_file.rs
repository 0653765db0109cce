//! PID-stamped lock files, the last-resort backend where OS file locks are
//! unusable (for example on some network filesystems).
//!
//! A lock is held by whoever creates the file exclusively. A lock whose
//! recorded PID no longer exists is stale and may be taken over; when the
//! PID cannot be checked, only files older than [`STALE_AFTER`] are.
//! Takeovers are serialised through a sibling `<lock>.takeover` marker and
//! re-check the stamp while holding it, so a fresh stamp is never removed.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::time::Duration;
use tracing::warn;

use crate::observability::LOCK_LOG_TARGET;

/// Age beyond which an unverifiable lock file is treated as abandoned.
pub(super) const STALE_AFTER: Duration = Duration::from_secs(600);

/// Age beyond which a takeover marker left by a crashed process is cleared.
const TAKEOVER_STALE_AFTER: Duration = Duration::from_secs(30);

/// Attempts to take the lock once, stealing it if the holder is gone.
pub(super) fn try_acquire(lock_path: &Utf8Path) -> io::Result<bool> {
    match create_stamp(lock_path) {
        Ok(()) => return Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err),
    }

    if !is_stale(lock_path)? {
        return Ok(false);
    }
    let Some(_marker) = TakeoverMarker::try_claim(lock_path)? else {
        return Ok(false);
    };
    // Another waiter may have finished a takeover before the marker was ours.
    if !is_stale(lock_path)? {
        return Ok(false);
    }

    warn!(target: LOCK_LOG_TARGET, path = %lock_path, "taking over stale lock file");
    match fs::remove_file(lock_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    match create_stamp(lock_path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

/// Removes the lock file.
pub(super) fn release(lock_path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(lock_path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Exclusive right to replace a stale stamp; removed on drop.
struct TakeoverMarker {
    path: Utf8PathBuf,
}

impl TakeoverMarker {
    fn try_claim(lock_path: &Utf8Path) -> io::Result<Option<Self>> {
        let path = takeover_path(lock_path);
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Some(Self { path })),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err),
            }
            if !older_than(&path, TAKEOVER_STALE_AFTER).unwrap_or(false) {
                return Ok(None);
            }
            warn!(target: LOCK_LOG_TARGET, path = %path, "clearing abandoned takeover marker");
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

impl Drop for TakeoverMarker {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(target: LOCK_LOG_TARGET, path = %self.path, error = %err, "failed to remove takeover marker");
        }
    }
}

fn takeover_path(lock_path: &Utf8Path) -> Utf8PathBuf {
    let name = lock_path.file_name().unwrap_or("entry.lock");
    lock_path.with_file_name(format!("{name}.takeover"))
}

fn create_stamp(lock_path: &Utf8Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

fn is_stale(lock_path: &Utf8Path) -> io::Result<bool> {
    let contents = match fs::read_to_string(lock_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err),
    };
    // A holder that has created the file but not yet written its PID looks
    // exactly like a corrupt stamp, so only age can condemn it.
    match contents.trim().parse::<u32>() {
        Ok(pid) => match process_alive(pid) {
            Some(alive) => Ok(!alive),
            None => older_than(lock_path, STALE_AFTER),
        },
        Err(_) => older_than(lock_path, STALE_AFTER),
    }
}

fn older_than(lock_path: &Utf8Path, age: Duration) -> io::Result<bool> {
    let modified = fs::metadata(lock_path)?.modified()?;
    Ok(modified.elapsed().is_ok_and(|elapsed| elapsed >= age))
}

#[cfg(unix)]
fn process_alive(pid: u32) -> Option<bool> {
    let raw = libc::pid_t::try_from(pid).ok()?;
    if raw <= 0 {
        return None;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(raw, 0) };
    if result == 0 {
        return Some(true);
    }
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Some(false),
        Some(libc::EPERM) => Some(true),
        _ => None,
    }
}

#[cfg(not(unix))]
const fn process_alive(_pid: u32) -> Option<bool> {
    None
}
