//! Advisory inter-process locking.
//!
//! The lock lives on a sidecar file (`<archive>.lock`) rather than on the
//! archive itself: compaction renames a fresh file over the archive path, so
//! a lock held on the old inode would stop excluding anybody.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{ArchiverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers: any number may hold it together.
    Shared,
    /// Writers: excludes every other holder.
    Exclusive,
}

/// Held lock. Dropping it closes the descriptor, which releases the lock.
#[derive(Debug)]
pub struct ArchiveLock {
    file: Option<File>,
    path: PathBuf,
}

impl ArchiveLock {
    /// Blocks until the lock for `archive` is granted.
    ///
    /// Readers open an existing lock file read-only, and when the lock file
    /// cannot be created (read-only directory or filesystem) they proceed
    /// unlocked rather than fail.
    pub fn acquire(archive: &Path, mode: LockMode) -> Result<Self> {
        let path = lock_path(archive);
        let opened = match mode {
            LockMode::Exclusive => create_lock_file(&path),
            LockMode::Shared => match OpenOptions::new().read(true).open(&path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => create_lock_file(&path),
                other => other,
            },
        };
        let file = match opened {
            Ok(file) => file,
            Err(e) if mode == LockMode::Shared && cannot_create(&e) => {
                tracing::warn!(lock = %path.display(), error = %e, "lock file unavailable, reading without a lock");
                return Ok(Self { file: None, path });
            }
            Err(e) => return Err(ArchiverError::io(&path, e)),
        };
        flock(&file, mode).map_err(|e| ArchiverError::io(&path, e))?;
        tracing::debug!(lock = %path.display(), ?mode, "acquired archive lock");
        Ok(Self { file: Some(file), path })
    }

    /// Acquires the lock only when `enabled`; otherwise returns an inert guard.
    pub fn acquire_if(enabled: bool, archive: &Path, mode: LockMode) -> Result<Self> {
        if enabled {
            Self::acquire(archive, mode)
        } else {
            Ok(Self { file: None, path: lock_path(archive) })
        }
    }

    /// Like [`ArchiveLock::acquire_if`] for operations that need the archive
    /// to exist already: a missing archive fails with `NotFound` before any
    /// lock file is created.
    pub fn acquire_existing(enabled: bool, archive: &Path, mode: LockMode) -> Result<Self> {
        std::fs::metadata(archive).map_err(|e| ArchiverError::io(archive, e))?;
        Self::acquire_if(enabled, archive, mode)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        if self.file.is_some() {
            tracing::debug!(lock = %self.path.display(), "released archive lock");
        }
    }
}

fn create_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).read(true).write(true).open(path)
}

fn cannot_create(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::PermissionDenied || is_read_only_fs(e)
}

#[cfg(unix)]
fn is_read_only_fs(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EROFS)
}

#[cfg(not(unix))]
fn is_read_only_fs(_e: &io::Error) -> bool {
    false
}

/// `<archive>.lock`, next to the archive.
pub fn lock_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

#[cfg(unix)]
fn flock(file: &File, mode: LockMode) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let op = match mode {
        LockMode::Shared => libc::LOCK_SH,
        LockMode::Exclusive => libc::LOCK_EX,
    };
    loop {
        // SAFETY: the descriptor is owned by `file` and open for the whole call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), op) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn flock(_file: &File, _mode: LockMode) -> io::Result<()> {
    Ok(())
}
