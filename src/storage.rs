//! Uploaded file storage.
//!
//! Files live under a single root directory; callers only ever see paths
//! relative to it. Any path that would escape the root reads as absent.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Read access to stored uploads.
pub trait FileStorage: Send + Sync {
    /// `Ok(None)` when the file does not exist or the path is not allowed.
    fn read_bytes(&self, relative_path: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Disk-backed storage rooted at one directory.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join a relative path onto the root, rejecting anything that could leave it.
    fn resolve(&self, relative_path: &str) -> Option<PathBuf> {
        let relative = Path::new(relative_path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        (resolved != self.root).then_some(resolved)
    }
}

impl FileStorage for LocalFileStorage {
    fn read_bytes(&self, relative_path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(path) = self.resolve(relative_path) else {
            tracing::warn!(path = relative_path, "Rejected storage path outside root");
            return Ok(None);
        };
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── In-memory storage ─────────────────────────────────────

/// Map-backed storage for tests and embedding.
#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, relative_path: &str, bytes: Vec<u8>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(relative_path.to_string(), bytes);
        }
    }
}

impl FileStorage for MemoryStorage {
    fn read_bytes(&self, relative_path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let files = self
            .files
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(files.get(relative_path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("project")).unwrap();
        std::fs::write(dir.path().join("project/report.pdf"), b"%PDF-1.7").unwrap();

        let storage = LocalFileStorage::new(dir.path());
        let bytes = storage.read_bytes("./project/report.pdf").unwrap().unwrap();
        assert_eq!(bytes, b"%PDF-1.7");
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path());
        assert!(storage.read_bytes("nope/missing.pdf").unwrap().is_none());
    }

    #[test]
    fn traversal_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        let storage = LocalFileStorage::new(&root);
        assert!(storage.read_bytes("../secret.txt").unwrap().is_none());
        assert!(storage.read_bytes("/etc/passwd").unwrap().is_none());
        assert!(storage.read_bytes("").unwrap().is_none());
    }

    #[test]
    fn memory_storage_serves_inserted_files() {
        let storage = MemoryStorage::new();
        storage.insert("p/a.pdf", vec![1, 2, 3]);
        assert_eq!(storage.read_bytes("p/a.pdf").unwrap(), Some(vec![1, 2, 3]));
        assert!(storage.read_bytes("p/b.pdf").unwrap().is_none());
    }
}
