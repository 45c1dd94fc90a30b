//! Cross-process exclusion for one namespace's read-modify-write cycle.
//!
//! Every namespace has a lock file `.<namespace>.lock` next to its data.
//! The file is created on first use and never removed: all processes must
//! `flock` the same inode. Unlinking it would let a newcomer lock a fresh
//! file while a waiter on the old inode also gets in.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Held for the duration of one guarded cycle. Closing the file releases it.
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not open lock file {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("could not lock {path}: {source}")]
    Flock { path: PathBuf, source: io::Error },
}

#[derive(Clone, Copy)]
enum Wait {
    Block,
    NonBlocking,
}

impl StoreLock {
    /// Block until no other holder has `namespace`. Callers on an async
    /// runtime must run this on a blocking thread.
    pub fn acquire(dir: &Path, namespace: &str) -> Result<Self, LockError> {
        let (path, file) = open(dir, namespace)?;
        if !flock(&file, Wait::NonBlocking).map_err(|e| flock_error(&path, e))? {
            tracing::debug!(lock = %path.display(), "namespace busy, waiting");
            flock(&file, Wait::Block).map_err(|e| flock_error(&path, e))?;
        }
        Ok(StoreLock { _file: file })
    }

    /// Take the lock only if it is free right now.
    pub fn try_acquire(dir: &Path, namespace: &str) -> Result<Option<Self>, LockError> {
        let (path, file) = open(dir, namespace)?;
        let locked = flock(&file, Wait::NonBlocking).map_err(|e| flock_error(&path, e))?;
        Ok(locked.then_some(StoreLock { _file: file }))
    }
}

pub fn lock_path(dir: &Path, namespace: &str) -> PathBuf {
    dir.join(format!(".{}.lock", namespace))
}

fn open(dir: &Path, namespace: &str) -> Result<(PathBuf, File), LockError> {
    let path = lock_path(dir, namespace);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path);
    match file {
        Ok(file) => Ok((path, file)),
        Err(source) => Err(LockError::Open { path, source }),
    }
}

fn flock_error(path: &Path, source: io::Error) -> LockError {
    LockError::Flock {
        path: path.to_path_buf(),
        source,
    }
}

/// `Ok(false)` only for a non-blocking attempt on a held lock.
#[cfg(unix)]
fn flock(file: &File, wait: Wait) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    let op = match wait {
        Wait::Block => libc::LOCK_EX,
        Wait::NonBlocking => libc::LOCK_EX | libc::LOCK_NB,
    };
    loop {
        if unsafe { libc::flock(file.as_raw_fd(), op) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::Interrupted => continue,
            io::ErrorKind::WouldBlock => return Ok(false),
            _ => return Err(err),
        }
    }
}

// Advisory locking is unix-only; elsewhere a single process is assumed.
#[cfg(not(unix))]
fn flock(_file: &File, _wait: Wait) -> io::Result<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const NS: &str = "todo.tasks.v1";

    #[test]
    fn held_lock_is_not_free() {
        let tmp = TempDir::new().unwrap();
        let held = StoreLock::acquire(tmp.path(), NS).unwrap();
        assert!(StoreLock::try_acquire(tmp.path(), NS).unwrap().is_none());

        drop(held);
        assert!(StoreLock::try_acquire(tmp.path(), NS).unwrap().is_some());
    }

    #[test]
    fn lock_file_outlives_the_lock() {
        let tmp = TempDir::new().unwrap();
        let path = lock_path(tmp.path(), NS);

        drop(StoreLock::acquire(tmp.path(), NS).unwrap());
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let inode = std::fs::metadata(&path).unwrap().ino();
            drop(StoreLock::acquire(tmp.path(), NS).unwrap());
            assert_eq!(std::fs::metadata(&path).unwrap().ino(), inode);
        }
    }

    #[test]
    fn waiter_gets_in_after_release() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let held = StoreLock::acquire(&dir, NS).unwrap();

        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            let _lock = StoreLock::acquire(&dir, NS).unwrap();
            tx.send(Instant::now()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        let released = Instant::now();
        drop(held);
        let entered = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(entered >= released);
        waiter.join().unwrap();
    }

    #[test]
    fn namespaces_lock_independently() {
        let tmp = TempDir::new().unwrap();
        let _work = StoreLock::acquire(tmp.path(), "work").unwrap();
        assert!(StoreLock::try_acquire(tmp.path(), "home").unwrap().is_some());
    }

    #[test]
    fn missing_directory_is_an_open_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone");
        assert!(matches!(
            StoreLock::acquire(&missing, NS),
            Err(LockError::Open { .. })
        ));
    }
}
