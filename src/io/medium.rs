//! Local persistence media the task store reads and writes.
//!
//! A medium holds one serialized collection under a namespace and knows
//! nothing about its contents. The store always reads and writes the whole
//! payload; partial writes never happen.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tempfile::NamedTempFile;

use crate::io::lock::{LockError, StoreLock};

/// Error type for medium access
#[derive(Debug, thiserror::Error)]
pub enum MediumError {
    #[error("could not read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("could not write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("{0}")]
    Injected(String),
}

/// Scope guard for a read-modify-write cycle. Dropping it releases the medium.
pub struct MediumGuard {
    _lock: Option<StoreLock>,
}

impl MediumGuard {
    pub fn unlocked() -> Self {
        MediumGuard { _lock: None }
    }
}

/// A single-slot store for one serialized collection.
pub trait Medium: Send + Sync + 'static {
    /// Current payload, or `None` if nothing was ever written.
    fn read(&self) -> Result<Option<String>, MediumError>;

    /// Replace the payload as one unit.
    fn write(&self, payload: &str) -> Result<(), MediumError>;

    /// Exclusive access for the duration of a read-modify-write.
    fn guard(&self) -> Result<MediumGuard, MediumError> {
        Ok(MediumGuard::unlocked())
    }

    /// Human-readable location, for logs and `--json` output.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// File medium
// ---------------------------------------------------------------------------

/// `<dir>/<namespace>.json`, written atomically and locked with `flock`.
#[derive(Debug, Clone)]
pub struct FileMedium {
    dir: PathBuf,
    namespace: String,
}

impl FileMedium {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        FileMedium {
            dir: dir.into(),
            namespace: namespace.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.namespace))
    }
}

impl Medium for FileMedium {
    fn read(&self) -> Result<Option<String>, MediumError> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MediumError::Read { path, source: e }),
        }
    }

    fn write(&self, payload: &str) -> Result<(), MediumError> {
        let path = self.path();
        fs::create_dir_all(&self.dir)
            .and_then(|_| atomic_write(&path, payload.as_bytes()))
            .map_err(|e| MediumError::Write { path, source: e })
    }

    fn guard(&self) -> Result<MediumGuard, MediumError> {
        fs::create_dir_all(&self.dir).map_err(|e| MediumError::Write {
            path: self.dir.clone(),
            source: e,
        })?;
        let lock = StoreLock::acquire(&self.dir, &self.namespace)?;
        Ok(MediumGuard { _lock: Some(lock) })
    }

    fn describe(&self) -> String {
        self.path().display().to_string()
    }
}

/// Write `content` to `path` atomically using a temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Memory medium
// ---------------------------------------------------------------------------

/// In-process medium with switchable failures, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    namespace: String,
    slots: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryMedium {
    pub fn new(namespace: impl Into<String>) -> Self {
        MemoryMedium {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Seed the slot with a raw payload.
    pub fn with_payload(self, payload: impl Into<String>) -> Self {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(self.namespace.clone(), payload.into());
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Raw payload currently stored, bypassing injected failures.
    pub fn payload(&self) -> Option<String> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.namespace)
            .cloned()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Medium for MemoryMedium {
    fn read(&self) -> Result<Option<String>, MediumError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MediumError::Injected(format!(
                "read of {} rejected",
                self.namespace
            )));
        }
        Ok(self.payload())
    }

    fn write(&self, payload: &str) -> Result<(), MediumError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MediumError::Injected(format!(
                "write of {} rejected",
                self.namespace
            )));
        }
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(self.namespace.clone(), payload.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.namespace)
    }
}
