//! Local file backend
//!
//! Tables live in files on the local filesystem and are operated on
//! in-process. All handles in a process share the engine's open file table.

mod file;
mod registry;

pub use file::{FileHeader, TableFile, HEADER_SIZE};
pub use registry::{OpenFileTable, SharedFile};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::client::{track, CreateMode, FileAttributes, ObjectHandle, OpenMode, StoreClient};
use crate::engine::EngineContext;
use crate::error::{StatusCode, StoreError, StoreResult};
use crate::key::{Index, KeySegment, LockMode};
use crate::location::Location;

/// Client for tables on the local filesystem
#[derive(Clone)]
pub struct LocalClient {
    files: Arc<OpenFileTable>,
    base_dir: Option<PathBuf>,
    sync_writes: bool,
}

impl LocalClient {
    /// Client resolving relative paths against the configured data directory
    pub fn new(ctx: &EngineContext) -> Self {
        LocalClient {
            files: ctx.files.clone(),
            base_dir: ctx.config.data_dir.clone(),
            sync_writes: ctx.config.sync_writes,
        }
    }

    /// Client resolving relative paths against `dir`
    pub fn with_base_dir(ctx: &EngineContext, dir: &Path) -> Self {
        LocalClient {
            base_dir: Some(dir.to_path_buf()),
            ..Self::new(ctx)
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn local_path(&self, location: &Location) -> StoreResult<PathBuf> {
        match location {
            Location::LocalFile(path) => Ok(self.resolve(path)),
            Location::RemoteEngine(_) => Err(StoreError::InvalidLocation(format!(
                "{} is not a local file",
                location
            ))),
        }
    }

    pub fn create_path(
        &self,
        path: &Path,
        attrs: &FileAttributes,
        mode: CreateMode,
    ) -> StoreResult<()> {
        attrs.validate()?;
        self.files.create(path, attrs.record_length, mode)?;
        info!("Created table {} ({:?})", path.display(), mode);
        Ok(())
    }

    pub fn open_path(&self, path: &Path, mode: OpenMode) -> StoreResult<LocalHandle> {
        let writable = mode != OpenMode::ReadOnly;
        let file = self.files.open(path, writable, self.sync_writes)?;
        debug!("Opened handle on {} ({:?})", path.display(), mode);
        Ok(LocalHandle {
            files: self.files.clone(),
            file: Some(file),
            path: path.to_path_buf(),
            writable,
            position: Position::Unpositioned,
            generation: 0,
            deleted: false,
            last: StatusCode::Success,
        })
    }
}

impl StoreClient for LocalClient {
    fn create(
        &self,
        location: &Location,
        attrs: &FileAttributes,
        mode: CreateMode,
    ) -> StoreResult<()> {
        let path = self.local_path(location)?;
        self.create_path(&path, attrs, mode)
    }

    fn open(&self, location: &Location, mode: OpenMode) -> StoreResult<Box<dyn ObjectHandle>> {
        let path = self.local_path(location)?;
        Ok(Box::new(self.open_path(&path, mode)?))
    }
}

/// Current position of a handle
#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Unpositioned,
    /// Physical order
    Physical { slot: u32 },
    /// Key order
    Keyed { key_number: u16, key: Vec<u8>, slot: u32 },
}

impl Position {
    fn slot(&self) -> Option<u32> {
        match self {
            Position::Unpositioned => None,
            Position::Physical { slot } | Position::Keyed { slot, .. } => Some(*slot),
        }
    }
}

/// Handle on a local table
pub struct LocalHandle {
    files: Arc<OpenFileTable>,
    /// `None` once closed
    file: Option<SharedFile>,
    path: PathBuf,
    writable: bool,
    position: Position,
    /// Generation of the record at the current position
    generation: u64,
    /// The record at the current position has been deleted
    deleted: bool,
    last: StatusCode,
}

impl LocalHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> StoreResult<SharedFile> {
        self.file
            .clone()
            .ok_or(StoreError::Status(StatusCode::FileNotOpen))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StatusCode::AccessDenied.into())
        }
    }

    /// Move to `position` and return the record there
    fn land(&mut self, table: &TableFile, position: Position) -> StoreResult<Vec<u8>> {
        let slot = position
            .slot()
            .ok_or(StoreError::Status(StatusCode::InvalidPositioning))?;
        let record = table
            .record(slot)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| StoreError::Internal("index refers to an empty slot".into()))?;
        self.generation = table.generation(slot);
        self.position = position;
        self.deleted = false;
        Ok(record)
    }

    fn do_create_index(&mut self, segment: &KeySegment) -> StoreResult<()> {
        self.check_writable()?;
        let file = self.file()?;
        let result = file.lock().add_key(segment);
        result
    }

    fn do_insert(&mut self, record: &[u8]) -> StoreResult<Vec<u8>> {
        self.check_writable()?;
        let file = self.file()?;
        let mut table = file.lock();
        let (slot, image) = table.insert(record)?;
        self.generation = table.generation(slot);

        self.position = if table.keys().is_empty() {
            Position::Physical { slot }
        } else {
            Position::Keyed {
                key_number: 0,
                key: table.key_of(0, &image)?,
                slot,
            }
        };
        self.deleted = false;
        Ok(image)
    }

    fn do_get_equal(&mut self, index: Index, key: &[u8]) -> StoreResult<Vec<u8>> {
        let Index::Key(key_number) = index else {
            return Err(StatusCode::InvalidKeyNumber.into());
        };
        let file = self.file()?;
        let table = file.lock();
        let slot = table.find_equal(key_number, key)?;
        let record = table.record(slot).unwrap_or_default().to_vec();
        let position = Position::Keyed {
            key_number,
            key: table.key_of(key_number, &record)?,
            slot,
        };
        self.land(&table, position)
    }

    fn do_get_first(&mut self, index: Index) -> StoreResult<Vec<u8>> {
        let file = self.file()?;
        let table = file.lock();
        let position = match index {
            Index::None => table
                .next_used_slot(0)
                .map(|slot| Position::Physical { slot }),
            Index::Key(key_number) => table
                .first_by_key(key_number)?
                .map(|(key, slot)| Position::Keyed { key_number, key, slot }),
        };
        match position {
            Some(position) => self.land(&table, position),
            None => Err(StatusCode::EndOfFile.into()),
        }
    }

    fn do_get_next(&mut self) -> StoreResult<Vec<u8>> {
        let file = self.file()?;
        let table = file.lock();
        let next = match &self.position {
            Position::Unpositioned => return Err(StatusCode::InvalidPositioning.into()),
            Position::Physical { slot } => table
                .next_used_slot(slot + 1)
                .map(|slot| Position::Physical { slot }),
            Position::Keyed {
                key_number,
                key,
                slot,
            } => {
                let key_number = *key_number;
                table
                    .next_by_key(key_number, key, *slot)?
                    .map(|(key, slot)| Position::Keyed { key_number, key, slot })
            }
        };
        match next {
            Some(position) => self.land(&table, position),
            None => Err(StatusCode::EndOfFile.into()),
        }
    }

    fn do_delete(&mut self) -> StoreResult<()> {
        self.check_writable()?;
        let slot = match self.position.slot() {
            Some(slot) if !self.deleted => slot,
            _ => return Err(StatusCode::InvalidPositioning.into()),
        };
        let file = self.file()?;
        let mut table = file.lock();
        // Another handle may have deleted the record and refilled its slot.
        if table.generation(slot) != self.generation {
            return Err(StatusCode::InvalidPositioning.into());
        }
        table.delete(slot)?;
        self.deleted = true;
        Ok(())
    }

    fn do_close(&mut self) -> StoreResult<()> {
        if self.file.take().is_none() {
            return Err(StatusCode::FileNotOpen.into());
        }
        self.position = Position::Unpositioned;
        self.files.close(&self.path)?;
        debug!("Closed handle on {}", self.path.display());
        Ok(())
    }
}

impl ObjectHandle for LocalHandle {
    fn create_index(&mut self, segment: &KeySegment) -> StoreResult<()> {
        let result = self.do_create_index(segment);
        track(&mut self.last, result)
    }

    fn insert(&mut self, record: &[u8]) -> StoreResult<Vec<u8>> {
        let result = self.do_insert(record);
        track(&mut self.last, result)
    }

    fn get_equal(&mut self, index: Index, key: &[u8], lock: LockMode) -> StoreResult<Vec<u8>> {
        // Single-process backend: lock requests are accepted and not enforced.
        trace!("get_equal on {} ({:?}, {:?})", self.path.display(), index, lock);
        let result = self.do_get_equal(index, key);
        track(&mut self.last, result)
    }

    fn get_first(&mut self, index: Index) -> StoreResult<Vec<u8>> {
        let result = self.do_get_first(index);
        track(&mut self.last, result)
    }

    fn get_next(&mut self) -> StoreResult<Vec<u8>> {
        let result = self.do_get_next();
        track(&mut self.last, result)
    }

    fn delete(&mut self) -> StoreResult<()> {
        let result = self.do_delete();
        track(&mut self.last, result)
    }

    fn close(&mut self) -> StoreResult<()> {
        let result = self.do_close();
        track(&mut self.last, result)
    }

    fn last_status(&self) -> StatusCode {
        self.last
    }
}

impl Drop for LocalHandle {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.do_close() {
                warn!("Failed to close {} on drop: {}", self.path.display(), e);
            }
        }
    }
}
