//! File-per-key persistence
//!
//! Each key is hex-encoded into a file name inside a single directory, so
//! arbitrary dataset ids never escape the storage root. Writes go through a
//! temporary file that is persisted over the target, which leaves either the
//! old value or the new one on disk, never a partial write.

use crate::error::{StorageError, StorageResult};
use crate::KeyValueStore;
use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const VALUE_EXTENSION: &str = "kv";

/// Directory-backed store
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        let dir = root.clone();
        run_blocking(move || ensure_directory_exists(&dir)).await?;
        log::debug!("Disk store ready at {}", root.display());
        Ok(Self { root })
    }

    /// Directory holding the stored values
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self
            .root
            .join(format!("{}.{}", hex::encode(key), VALUE_EXTENSION)))
    }
}

#[async_trait]
impl KeyValueStore for DiskStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        run_blocking(move || match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read { path, source: e }),
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let root = self.root.clone();
        run_blocking(move || write_atomic(&root, &path, &value)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        run_blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Write { path, source: e }),
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        let root = self.root.clone();
        run_blocking(move || {
            for path in value_files(&root)? {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(StorageError::Write { path, source: e }),
                }
            }
            Ok(())
        })
        .await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        run_blocking(move || {
            let mut keys: Vec<String> = value_files(&root)?
                .iter()
                .filter_map(|path| decode_key(path))
                .collect();
            keys.sort();
            Ok(keys)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

fn ensure_directory_exists(path: &Path) -> StorageResult<()> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| StorageError::DirectoryCreation {
            path: path.to_path_buf(),
            source: e,
        })?;
        log::info!("Created storage directory: {}", path.display());
    }
    Ok(())
}

fn write_atomic(root: &Path, path: &Path, value: &[u8]) -> StorageResult<()> {
    let mut temp_file = NamedTempFile::new_in(root).map_err(|e| StorageError::Write {
        path: path.to_path_buf(),
        source: e,
    })?;

    temp_file
        .write_all(value)
        .and_then(|_| temp_file.flush())
        .map_err(|e| StorageError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;

    temp_file.persist(path).map_err(|e| StorageError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}

fn value_files(root: &Path) -> StorageResult<Vec<PathBuf>> {
    let entries = fs::read_dir(root).map_err(|e| StorageError::Read {
        path: root.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some(VALUE_EXTENSION) {
            files.push(path);
        }
    }
    Ok(files)
}

fn decode_key(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let bytes = hex::decode(stem).ok()?;
    String::from_utf8(bytes).ok()
}
