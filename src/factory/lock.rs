//! Cross-process file locking for shared template builds.
//!
//! On Unix the lock is an exclusive `flock(2)` on
//! `<cache_root>/.locks/<key>.lock`; other platforms get a no-op guard.

use camino::Utf8Path;
use std::fs::{File, OpenOptions};
use std::io;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Subdirectory within the cache root for lock files.
pub(crate) const LOCKS_SUBDIR: &str = ".locks";

/// Guard that holds the template lock until dropped.
#[derive(Debug)]
pub(crate) struct TemplateLock {
    _file: File,
}

impl TemplateLock {
    /// Blocks until the exclusive lock for `key` is held.
    #[cfg(unix)]
    pub(crate) fn acquire(cache_root: &Utf8Path, key: &str) -> io::Result<Self> {
        let locks_dir = cache_root.join(LOCKS_SUBDIR);
        std::fs::create_dir_all(&locks_dir)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(locks_dir.join(format!("{key}.lock")))?;

        // SAFETY: `file` owns the descriptor for the duration of this call and
        // nothing else closes or moves it meanwhile.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { _file: file })
    }

    #[cfg(not(unix))]
    pub(crate) fn acquire(cache_root: &Utf8Path, key: &str) -> io::Result<Self> {
        let locks_dir = cache_root.join(LOCKS_SUBDIR);
        std::fs::create_dir_all(&locks_dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(locks_dir.join(format!("{key}.lock")))?;
        Ok(Self { _file: file })
    }
}
