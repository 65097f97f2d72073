// ABOUTME: Path-scoped writer lock serializing mutating sessions on a snapshot file.
// ABOUTME: Combines an in-process mutex registry with an advisory lock on a sidecar file, both bounded by a timeout.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use fs2::FileExt;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use thiserror::Error;

/// How long a writer waits for the lock when no timeout is configured.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const FILE_LOCK_POLL: Duration = Duration::from_millis(10);

/// One mutex per normalized snapshot path, shared by every session in the process.
static REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Errors that can occur while acquiring a writer lock.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for writer lock on {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("io error on lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive right to mutate one snapshot file. Released on drop.
pub struct WriterLock {
    path: PathBuf,
    file: File,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl WriterLock {
    /// Acquire the writer lock for `path`, waiting at most `timeout` in total
    /// across the in-process and cross-process stages. Creates the parent
    /// directory if needed so the sidecar lock file can be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let started = Instant::now();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let key = normalize(path);

        let slot = {
            let mut registry = REGISTRY.lock();
            Arc::clone(registry.entry(key.clone()).or_default())
        };
        let guard = slot
            .try_lock_arc_for(timeout)
            .ok_or_else(|| LockError::Timeout {
                path: key.clone(),
                waited: started.elapsed(),
            })?;

        let lock_path = sidecar(&key, "lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| LockError::Io {
                path: lock_path.clone(),
                source,
            })?;

        // Another process may hold the file lock; poll until the shared deadline.
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout { path: key, waited });
                    }
                    std::thread::sleep(FILE_LOCK_POLL.min(timeout - waited));
                }
                Err(source) => {
                    return Err(LockError::Io {
                        path: lock_path,
                        source,
                    });
                }
            }
        }

        tracing::debug!(path = %key.display(), waited = ?started.elapsed(), "writer lock acquired");
        Ok(Self {
            path: key,
            file,
            guard: Some(guard),
        })
    }

    /// The normalized snapshot path this lock protects.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        // File lock first, then the in-process guard.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), "failed to release file lock: {}", e);
        }
        drop(self.guard.take());

        // Waiters clone the slot under the registry lock, so a slot only the
        // registry references has nobody waiting on it.
        let mut registry = REGISTRY.lock();
        if registry
            .get(&self.path)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            registry.remove(&self.path);
        }
        tracing::debug!(path = %self.path.display(), "writer lock released");
    }
}

/// Absolute path with a canonicalized parent, so different spellings of the
/// same file share one registry entry. The file itself may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

/// `<path>.<suffix>` next to the snapshot file.
pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_lock_file_and_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("discounts.db");

        let lock = WriterLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();

        assert!(dir.path().join("nested").join("discounts.db.lock").exists());
        assert!(lock.path().ends_with("discounts.db"));
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discounts.db");

        let _held = WriterLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        let result = WriterLock::acquire(&path, Duration::from_millis(50));

        match result {
            Err(LockError::Timeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(50));
            }
            Err(other) => panic!("expected timeout, got {other}"),
            Ok(_) => panic!("expected timeout, lock was granted twice"),
        }
    }

    #[test]
    fn lock_is_reacquirable_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discounts.db");

        let first = WriterLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        drop(first);

        WriterLock::acquire(&path, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn different_spellings_share_one_lock() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        let plain = dir.path().join("discounts.db");
        let dotted = dir.path().join("a").join("..").join("discounts.db");

        let _held = WriterLock::acquire(&plain, DEFAULT_LOCK_TIMEOUT).unwrap();
        let result = WriterLock::acquire(&dotted, Duration::from_millis(30));

        assert!(matches!(result, Err(LockError::Timeout { .. })));
    }

    #[test]
    fn waiting_writer_proceeds_when_holder_releases() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discounts.db");

        let held = WriterLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        let (tx, rx) = mpsc::channel();
        let waiter_path = path.clone();
        let waiter = std::thread::spawn(move || {
            tx.send(()).unwrap();
            WriterLock::acquire(&waiter_path, Duration::from_secs(5)).is_ok()
        });

        rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn held_file_lock_times_out_acquire() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discounts.db");
        // Stands in for a writer in another process: only the file lock is held.
        let other = File::create(sidecar(&path, "lock")).unwrap();
        other.lock_exclusive().unwrap();

        let result = WriterLock::acquire(&path, Duration::from_millis(60));
        match result {
            Err(LockError::Timeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(60));
            }
            Err(err) => panic!("expected timeout, got {err}"),
            Ok(_) => panic!("expected timeout, file lock was ignored"),
        }

        FileExt::unlock(&other).unwrap();
        WriterLock::acquire(&path, Duration::from_millis(60)).unwrap();
    }

    #[test]
    fn released_lock_leaves_no_registry_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discounts.db");

        let lock = WriterLock::acquire(&path, DEFAULT_LOCK_TIMEOUT).unwrap();
        let key = lock.path().to_path_buf();
        assert!(REGISTRY.lock().contains_key(&key));

        drop(lock);
        assert!(!REGISTRY.lock().contains_key(&key));
    }

    #[test]
    fn sidecar_appends_suffix() {
        let path = Path::new("/tmp/discounts.db");
        assert_eq!(sidecar(path, "tmp"), PathBuf::from("/tmp/discounts.db.tmp"));
    }
}
