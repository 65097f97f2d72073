// ABOUTME: Generic ordered key-value store held in memory and persisted as one atomic JSON snapshot.
// ABOUTME: Commits write to a .tmp sibling, fsync, then rename over the target so readers never see a partial file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lock::{DEFAULT_LOCK_TIMEOUT, LockError, WriterLock, sidecar};

const FORMAT_VERSION: u32 = 1;

/// How a snapshot file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Load an existing snapshot; every mutation is refused and nothing is written.
    Read,
    /// Load the snapshot if present, otherwise start empty. A missing file
    /// is only created once something is put.
    CreateOrOpen,
    /// Ignore any existing snapshot and start empty. The old file is only
    /// replaced on commit.
    ForceNew,
}

impl OpenMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// The underlying cause of a failed commit.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during snapshot store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot not found or unreadable: {path}")]
    NotFound { path: PathBuf },

    #[error("snapshot {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("snapshot {path} is open read-only")]
    ReadOnly { path: PathBuf },

    #[error("snapshot session for {path} is closed")]
    Closed { path: PathBuf },

    #[error("failed to persist snapshot {path}: {source}")]
    PersistFailure {
        path: PathBuf,
        #[source]
        source: PersistError,
    },

    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),
}

#[derive(Serialize)]
struct SnapshotOut<'a, K, V> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    entries: &'a BTreeMap<K, V>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "K: Ord + DeserializeOwned, V: DeserializeOwned"))]
struct SnapshotIn<K, V> {
    format_version: u32,
    entries: BTreeMap<K, V>,
}

/// An ordered in-memory mapping mirrored to a single file. Writable sessions
/// hold the file's [`WriterLock`] from open until close or drop, so the
/// snapshot loaded at open is the latest committed one for the whole session.
pub struct SnapshotStore<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    path: PathBuf,
    mode: OpenMode,
    entries: BTreeMap<K, V>,
    dirty: bool,
    closed: bool,
    file_mode: Option<u32>,
    lock: Option<WriterLock>,
}

impl<K, V> SnapshotStore<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Open a snapshot with the default writer lock timeout.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, mode, DEFAULT_LOCK_TIMEOUT)
    }

    /// Open a snapshot. Writable modes wait at most `lock_timeout` for the
    /// writer lock before loading anything.
    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        mode: OpenMode,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let lock = if mode.is_writable() {
            Some(WriterLock::acquire(&path, lock_timeout)?)
        } else {
            None
        };

        let (entries, dirty) = match mode {
            OpenMode::ForceNew => (BTreeMap::new(), true),
            OpenMode::Read => match fs::read(&path) {
                Ok(bytes) => (
                    Self::parse(&path, &bytes).map_err(|e| {
                        tracing::warn!("refusing unreadable snapshot: {}", e);
                        StoreError::NotFound { path: path.clone() }
                    })?,
                    false,
                ),
                Err(_) => return Err(StoreError::NotFound { path }),
            },
            OpenMode::CreateOrOpen => match fs::read(&path) {
                Ok(bytes) => (Self::parse(&path, &bytes)?, false),
                // Nothing to persist until the first mutation.
                Err(e) if e.kind() == io::ErrorKind::NotFound => (BTreeMap::new(), false),
                Err(source) => return Err(StoreError::Io { path, source }),
            },
        };

        tracing::debug!(
            path = %path.display(),
            ?mode,
            entries = entries.len(),
            "snapshot session opened"
        );

        Ok(Self {
            path,
            mode,
            entries,
            dirty,
            closed: false,
            file_mode: None,
            lock,
        })
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<BTreeMap<K, V>, StoreError> {
        let snapshot: SnapshotIn<K, V> =
            serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {}", snapshot.format_version),
            });
        }
        Ok(snapshot.entries)
    }

    /// Unix permission bits (e.g. `0o600`) given to the snapshot file on
    /// every commit. Ignored on other platforms.
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries in key order, as they are at the time of the call.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Insert or replace the value for `key`, returning the previous value.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>, StoreError> {
        self.ensure_writable()?;
        self.dirty = true;
        Ok(self.entries.insert(key, value))
    }

    /// Remove `key`, returning its value if it was present.
    pub fn delete(&mut self, key: &K) -> Result<Option<V>, StoreError> {
        self.ensure_writable()?;
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        Ok(removed)
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed {
                path: self.path.clone(),
            });
        }
        if !self.mode.is_writable() {
            return Err(StoreError::ReadOnly {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Persist the whole mapping. A no-op in read mode and when nothing has
    /// changed since the last successful commit. On failure the previous
    /// file is untouched and the in-memory state is kept.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if !self.mode.is_writable() {
            return Ok(());
        }
        if self.closed {
            return Err(StoreError::Closed {
                path: self.path.clone(),
            });
        }
        if !self.dirty {
            return Ok(());
        }

        self.write_snapshot()?;
        self.dirty = false;
        Ok(())
    }

    /// Commit (unless read-only) and release the writer lock. Calling it
    /// again is a no-op. The lock is released even if the commit fails.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        let result = self.commit();
        self.closed = true;
        self.lock = None;
        tracing::debug!(path = %self.path.display(), "snapshot session closed");
        result
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let tmp_path = sidecar(&self.path, "tmp");

        let result = self
            .write_tmp(&tmp_path)
            .and_then(|()| fs::rename(&tmp_path, &self.path).map_err(PersistError::from));

        match result {
            Ok(()) => {
                // Fsync the parent directory so the rename itself is durable.
                // Best-effort: the rename already happened.
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty())
                    && let Ok(dir) = File::open(parent)
                {
                    let _ = dir.sync_all();
                }
                tracing::debug!(
                    path = %self.path.display(),
                    entries = self.entries.len(),
                    "snapshot committed"
                );
                Ok(())
            }
            Err(source) => {
                let _ = fs::remove_file(&tmp_path);
                tracing::error!(path = %self.path.display(), "snapshot commit failed: {}", source);
                Err(StoreError::PersistFailure {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }

    fn write_tmp(&self, tmp_path: &Path) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut writer = BufWriter::new(File::create(tmp_path)?);
        let snapshot = SnapshotOut {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            entries: &self.entries,
        };
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if let Some(mode) = self.file_mode {
            set_permissions(&file, mode)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_permissions(file: &File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}

impl<K, V> Drop for SnapshotStore<K, V>
where
    K: Ord + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        if self.closed || !self.mode.is_writable() || !self.dirty {
            return;
        }
        if let Err(e) = self.write_snapshot() {
            tracing::warn!("snapshot session dropped without a successful commit: {}", e);
        }
    }
}
