//! Disk-backed storage backend.
//!
//! Each key maps to one file under the root directory: `sections/hero` with
//! extension `json` lives at `<root>/sections/hero.json`. Writes go to a
//! hidden temp file in the same directory and are then renamed over the
//! target, so readers see either the old or the new value, never a torn one.
//!
//! Directory walks for [`list`](StorageBackend::list) start at the prefix's
//! directory and run on the blocking pool via [`tokio::task::spawn_blocking`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::{StorageBackend, StorageError, validate_key};

/// A storage backend that keeps one file per key.
///
/// # Examples
///
/// ```no_run
/// # use fantea_storage::FileBackend;
/// let backend = FileBackend::open("./data").unwrap().with_extension("json");
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
    extension: Option<String>,
    tmp_counter: Arc<AtomicU64>,
}

impl FileBackend {
    /// Open (and create if missing) a file store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| StorageError::Open {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            extension: None,
            tmp_counter: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Append `.{ext}` to every file name. Keys stay extension-free.
    #[must_use]
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    /// Return the root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(segment);
        }
        if let Some(ext) = &self.extension {
            let mut name = path.file_name().unwrap_or_default().to_os_string();
            name.push(".");
            name.push(ext);
            path.set_file_name(name);
        }
        Ok(path)
    }

    fn tmp_path_for(&self, target: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let write_err = |e: std::io::Error| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp = self.tmp_path_for(&path);
        tokio::fs::write(&tmp, value).await.map_err(write_err)?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(key, bytes = value.len(), "file record written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let (start, rel) = scan_start(&self.root, prefix)?;
        let extension = self.extension.clone();
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            walk(&start, &rel, extension.as_deref(), &mut keys).map_err(|e| {
                StorageError::List {
                    prefix: prefix.clone(),
                    reason: e.to_string(),
                }
            })?;
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::List {
            prefix: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }
}

/// The directory a prefix scan starts from, with its key-relative path.
///
/// Only the part of `prefix` up to its last `/` names a directory; sibling
/// trees such as `backups/` are never entered for a `sections/` scan.
fn scan_start(root: &Path, prefix: &str) -> Result<(PathBuf, String), StorageError> {
    let Some((dir, _)) = prefix.rsplit_once('/') else {
        return Ok((root.to_path_buf(), String::new()));
    };
    if dir.is_empty() {
        return Ok((root.to_path_buf(), String::new()));
    }
    validate_key(dir)?;
    let mut start = root.to_path_buf();
    start.extend(dir.split('/'));
    Ok((start, dir.to_owned()))
}

/// Recursively collect keys below `dir`. Hidden entries (temp files) are skipped.
fn walk(
    dir: &Path,
    rel: &str,
    extension: Option<&str>,
    out: &mut Vec<String>,
) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let child_rel = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };

        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &child_rel, extension, out)?;
            continue;
        }

        match extension {
            Some(ext) => {
                if let Some(stem) = child_rel.strip_suffix(&format!(".{ext}")) {
                    out.push(stem.to_owned());
                }
            }
            None => out.push(child_rel),
        }
    }
    Ok(())
}
