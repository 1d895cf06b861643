//! Advisory whole-file locking with an optional acquisition timeout.
//!
//! On Unix this is `flock(2)`: the lock belongs to the open file description,
//! so two handles opened separately contend even inside one process, and the
//! kernel drops the lock when the holder's descriptor is closed (including
//! when the process dies).

use log::{debug, warn};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::publisher::types::{PublishError, PublishResult};

/// First sleep between non-blocking lock attempts
const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Upper bound for the sleep between lock attempts
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers; any number may hold it together
    Shared,
    /// Writers; excludes every other holder
    Exclusive,
}

/// Held lock on an open file. Released on drop, before the file is closed.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    mode: LockMode,
}

impl FileLock {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock anyway.
        if let Err(err) = sys::unlock(&self.file) {
            warn!("Failed to release {:?} file lock: {}", self.mode, err);
        }
    }
}

/// Lock `file` (opened from `path`), waiting at most `timeout`.
///
/// `None` blocks until the lock is granted, which never returns if a holder
/// hangs without exiting. A timeout too large to form a deadline waits the same way.
pub fn acquire(
    file: File,
    path: &Path,
    mode: LockMode,
    timeout: Option<Duration>,
) -> PublishResult<FileLock> {
    let lock_error = |source| PublishError::LockAcquisition {
        path: path.to_path_buf(),
        source,
    };

    let started = Instant::now();
    let Some((timeout, deadline)) =
        timeout.and_then(|timeout| started.checked_add(timeout).map(|deadline| (timeout, deadline)))
    else {
        sys::lock(&file, mode, true).map_err(lock_error)?;
        debug!("Acquired {:?} lock on {}", mode, path.display());
        return Ok(FileLock { file, mode });
    };

    let mut interval = INITIAL_POLL_INTERVAL;

    loop {
        if sys::lock(&file, mode, false).map_err(lock_error)? {
            debug!(
                "Acquired {:?} lock on {} after {:?}",
                mode,
                path.display(),
                started.elapsed()
            );
            return Ok(FileLock { file, mode });
        }

        let now = Instant::now();
        if now >= deadline {
            warn!(
                "Gave up waiting for {:?} lock on {} after {:?}",
                mode,
                path.display(),
                timeout
            );
            return Err(PublishError::LockTimeout {
                path: path.to_path_buf(),
                waited: timeout,
            });
        }

        thread::sleep(interval.min(deadline - now));
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}

/// Whether `path` still names the file a lock was taken on.
///
/// A waiter can be granted the lock on a file that was deleted or replaced in
/// the meantime; anything it wrote there would be lost.
pub fn is_current(lock: &FileLock, path: &Path) -> io::Result<bool> {
    let on_disk = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    Ok(sys::same_file(&lock.file.metadata()?, &on_disk))
}

#[cfg(unix)]
mod sys {
    use nix::errno::Errno;
    use nix::fcntl::{FlockArg, flock};
    use std::fs::{File, Metadata};
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    use super::LockMode;

    /// Returns `Ok(false)` when a non-blocking attempt finds the lock taken
    pub(super) fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<bool> {
        let arg = match (mode, blocking) {
            (LockMode::Shared, true) => FlockArg::LockShared,
            (LockMode::Shared, false) => FlockArg::LockSharedNonblock,
            (LockMode::Exclusive, true) => FlockArg::LockExclusive,
            (LockMode::Exclusive, false) => FlockArg::LockExclusiveNonblock,
        };

        loop {
            match flock(file.as_raw_fd(), arg) {
                Ok(()) => return Ok(true),
                Err(Errno::EINTR) => continue,
                Err(errno) if errno == Errno::EWOULDBLOCK => return Ok(false),
                Err(errno) => return Err(io::Error::from(errno)),
            }
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        flock(file.as_raw_fd(), FlockArg::Unlock).map_err(io::Error::from)
    }

    pub(super) fn same_file(a: &Metadata, b: &Metadata) -> bool {
        a.dev() == b.dev() && a.ino() == b.ino()
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::{File, Metadata, TryLockError};
    use std::io;

    use super::LockMode;

    pub(super) fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<bool> {
        if blocking {
            match mode {
                LockMode::Shared => file.lock_shared()?,
                LockMode::Exclusive => file.lock()?,
            }
            return Ok(true);
        }

        let attempt = match mode {
            LockMode::Shared => file.try_lock_shared(),
            LockMode::Exclusive => file.try_lock(),
        };
        match attempt {
            Ok(()) => Ok(true),
            Err(TryLockError::WouldBlock) => Ok(false),
            Err(TryLockError::Error(err)) => Err(err),
        }
    }

    pub(super) fn unlock(file: &File) -> io::Result<()> {
        file.unlock()
    }

    // Open files cannot be deleted or replaced here without share-delete access.
    pub(super) fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
        true
    }
}
