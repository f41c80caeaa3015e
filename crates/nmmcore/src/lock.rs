//! Exclusive lock on a managed storage root.
//!
//! Only one manager may mutate a storage root at a time. The lock is held
//! for the lifetime of [`StorageLock`] and released on drop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Lock file name inside the storage root.
pub const LOCK_FILE: &str = ".nativemm.lock";

#[derive(Debug)]
pub struct StorageLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
}

impl StorageLock {
    /// Take the lock, failing with `StorageLocked` if another holder exists.
    pub fn acquire(storage_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(storage_root).with_path("create storage root", storage_root)?;
        let path = storage_root.join(LOCK_FILE);
        let file = open_locked(&path)?;
        tracing::debug!("Acquired storage lock {:?}", path);
        Ok(StorageLock { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_locked(path: &Path) -> Result<File> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .with_path("open lock file", path)?;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Err(Error::StorageLocked(path.to_path_buf()));
        }
        return Err(Error::io(format!("lock {path:?}"), err));
    }
    Ok(file)
}

#[cfg(windows)]
fn open_locked(path: &Path) -> Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const ERROR_SHARING_VIOLATION: i32 = 32;

    // No sharing: the handle is the lock and the OS drops it on exit
    match OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .share_mode(0)
        .open(path)
    {
        Ok(file) => Ok(file),
        Err(e) if e.raw_os_error() == Some(ERROR_SHARING_VIOLATION) => {
            Err(Error::StorageLocked(path.to_path_buf()))
        }
        Err(e) => Err(Error::io(format!("lock {path:?}"), e)),
    }
}

/// Fallback for platforms without an OS file lock.
///
/// The lock is the file's existence. If a process dies while holding it,
/// delete `.nativemm.lock` from the storage root to recover.
#[cfg(not(any(unix, windows)))]
fn open_locked(path: &Path) -> Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::StorageLocked(path.to_path_buf()))
        }
        Err(e) => Err(Error::io(format!("lock {path:?}"), e)),
    }
}

#[cfg(not(any(unix, windows)))]
impl Drop for StorageLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
