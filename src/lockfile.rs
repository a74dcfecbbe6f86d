//! Advisory per-feature lock files.
//!
//! A lock lives at `<parent>/.lock-feature-<slug>` and contains the owner
//! pid as decimal text; absence means unlocked. The check-then-create
//! window between two simultaneous acquirers is a known limitation of the
//! file scheme and is not closed here.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::ExitError;

/// Lock file path for a slug.
pub fn lock_path(parent: &Path, slug: &str) -> PathBuf {
    parent.join(format!(".lock-feature-{slug}"))
}

/// Owner pid recorded in the lock for `slug`, if a lock file exists and
/// its content parses.
pub fn owner(parent: &Path, slug: &str) -> Option<u32> {
    read_owner(&lock_path(parent, slug))
}

/// Probe `pid` with signal 0. EPERM means the process exists but belongs
/// to another user, which still counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Take the lock for `slug`, reclaiming one whose owner is dead.
///
/// A live owner is a hard error: the feature is already being worked on.
pub fn acquire(parent: &Path, slug: &str) -> anyhow::Result<FeatureLock> {
    let path = lock_path(parent, slug);
    if path.exists() {
        match read_owner(&path) {
            Some(pid) if pid_alive(pid) => {
                return Err(ExitError::AlreadyRunning {
                    slug: slug.to_string(),
                    pid,
                }
                .into());
            }
            Some(pid) => {
                tracing::warn!("reclaiming stale lock for '{slug}': owner pid {pid} is dead");
            }
            None => {
                tracing::warn!(
                    "reclaiming unreadable lock {}: content is not a pid",
                    path.display()
                );
            }
        }
        fs::remove_file(&path)
            .with_context(|| format!("removing stale lock {}", path.display()))?;
    }
    fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("writing lock {}", path.display()))?;
    Ok(FeatureLock { path })
}

/// Held for the lifetime of one worker's claim on a slug. Dropping removes
/// the lock file unconditionally.
#[derive(Debug)]
pub struct FeatureLock {
    path: PathBuf,
}

impl FeatureLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file now. Used by signal handlers, which cannot
    /// rely on drops running.
    pub fn release_path(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove lock {}: {e}", path.display());
            }
        }
    }
}

impl Drop for FeatureLock {
    fn drop(&mut self) {
        Self::release_path(&self.path);
    }
}

fn read_owner(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}
