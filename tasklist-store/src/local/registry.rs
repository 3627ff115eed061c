//! Open file table - table files currently open in this process
//!
//! Handles to the same path share one `TableFile`; the table counts
//! references and flushes the file when the last handle closes.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::file::TableFile;
use crate::client::CreateMode;
use crate::error::{StatusCode, StoreResult};

pub type SharedFile = Arc<Mutex<TableFile>>;

struct Entry {
    file: SharedFile,
    ref_count: u32,
}

/// Table of all open files
pub struct OpenFileTable {
    files: RwLock<HashMap<PathBuf, Entry>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        OpenFileTable {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Open a file, or take another reference if it is already open
    pub fn open(&self, path: &Path, writable: bool, sync_writes: bool) -> StoreResult<SharedFile> {
        let canonical = canonical_path(path);

        let mut files = self.files.write();
        if let Some(entry) = files.get_mut(&canonical) {
            if writable {
                entry.file.lock().make_writable()?;
            }
            entry.ref_count += 1;
            return Ok(entry.file.clone());
        }

        let file = Arc::new(Mutex::new(TableFile::open(path, writable, sync_writes)?));
        files.insert(
            canonical,
            Entry {
                file: file.clone(),
                ref_count: 1,
            },
        );
        Ok(file)
    }

    /// Create a file on disk. Overwriting a file that is open fails.
    pub fn create(&self, path: &Path, record_length: u16, mode: CreateMode) -> StoreResult<()> {
        let canonical = canonical_path(path);

        // Hold the lock so nobody opens the path while it is being replaced.
        let files = self.files.write();
        if mode == CreateMode::Overwrite && files.contains_key(&canonical) {
            return Err(StatusCode::FileInUse.into());
        }
        TableFile::create(path, record_length, mode)
    }

    /// Drop a reference; returns true when the file was actually closed
    pub fn close(&self, path: &Path) -> StoreResult<bool> {
        let canonical = canonical_path(path);

        let mut files = self.files.write();
        let Some(entry) = files.get_mut(&canonical) else {
            return Ok(false);
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return Ok(false);
        }

        if let Some(entry) = files.remove(&canonical) {
            entry.file.lock().flush()?;
        }
        debug!("Closed table file {}", canonical.display());
        Ok(true)
    }

    pub fn is_open(&self, path: &Path) -> bool {
        self.files.read().contains_key(&canonical_path(path))
    }

    /// Number of open files
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical form of `path`, usable before the file itself exists
fn canonical_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()))
        .unwrap_or_default();
    parent.join(path.file_name().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_shared_open_and_refcount() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.btr");
        let files = OpenFileTable::new();
        files.create(&path, 36, CreateMode::NoOverwrite).unwrap();

        let a = files.open(&path, true, false).unwrap();
        let b = files.open(&dir.path().join(".").join("t.btr"), true, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(files.len(), 1);

        assert!(!files.close(&path).unwrap());
        assert!(files.is_open(&path));
        assert!(files.close(&path).unwrap());
        assert!(files.is_empty());
        assert!(!files.close(&path).unwrap());
    }

    #[test]
    fn test_overwrite_open_file_is_in_use() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.btr");
        let files = OpenFileTable::new();
        files.create(&path, 36, CreateMode::NoOverwrite).unwrap();
        let _file = files.open(&path, true, false).unwrap();

        let err = files.create(&path, 36, CreateMode::Overwrite).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FileInUse);
        let err = files.create(&path, 36, CreateMode::NoOverwrite).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FileAlreadyExists);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let files = OpenFileTable::new();
        let err = files
            .open(&dir.path().join("missing.btr"), true, false)
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::FileNotFound);
        assert!(files.is_empty());
    }
}
