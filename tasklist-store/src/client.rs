//! Store capability interface
//!
//! `StoreClient` creates and opens tables; `ObjectHandle` operates on one
//! open table and tracks the engine-side position. `Client` selects the
//! backend from the location scheme.

use crate::engine;
use crate::error::{StatusCode, StoreResult};
use crate::key::{Index, KeySegment, LockMode};
use crate::local::LocalClient;
use crate::location::Location;
use crate::remote::RemoteClient;

/// Largest fixed record length a table may declare
pub const MAX_RECORD_LENGTH: u16 = 4096;

/// Attributes of a table, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes {
    /// Fixed record length in bytes
    pub record_length: u16,
}

impl FileAttributes {
    pub fn fixed(record_length: u16) -> Self {
        FileAttributes { record_length }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.record_length == 0 || self.record_length > MAX_RECORD_LENGTH {
            return Err(StatusCode::InvalidRecordLength.into());
        }
        Ok(())
    }
}

/// What create does when the table already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Replace the existing table
    Overwrite,
    /// Fail with `FileAlreadyExists`
    NoOverwrite,
}

impl CreateMode {
    /// Key number carried by a Create request
    pub fn to_raw(self) -> i16 {
        match self {
            CreateMode::Overwrite => 0,
            CreateMode::NoOverwrite => -1,
        }
    }

    pub fn from_raw(raw: i16) -> Self {
        if raw == -1 {
            CreateMode::NoOverwrite
        } else {
            CreateMode::Overwrite
        }
    }
}

/// Open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    Normal,
    ReadOnly,
}

impl OpenMode {
    pub fn to_raw(self) -> i16 {
        match self {
            OpenMode::Normal => 0,
            OpenMode::ReadOnly => -2,
        }
    }

    pub fn from_raw(raw: i16) -> Self {
        if raw == -2 {
            OpenMode::ReadOnly
        } else {
            OpenMode::Normal
        }
    }
}

/// Creates and opens tables
pub trait StoreClient: Send + Sync {
    /// Create the table at `location`
    fn create(
        &self,
        location: &Location,
        attrs: &FileAttributes,
        mode: CreateMode,
    ) -> StoreResult<()>;

    /// Open a handle to an existing table
    fn open(&self, location: &Location, mode: OpenMode) -> StoreResult<Box<dyn ObjectHandle>>;
}

/// A handle bound to one open table
///
/// Retrieval operations return the raw record image and leave the handle
/// positioned on it. Every failing call records its status, which stays
/// queryable through `last_status`.
pub trait ObjectHandle: Send {
    /// Add an index to the table
    fn create_index(&mut self, segment: &KeySegment) -> StoreResult<()>;

    /// Insert a record; returns the stored image with auto-increment fields assigned
    fn insert(&mut self, record: &[u8]) -> StoreResult<Vec<u8>>;

    /// Retrieve the record whose key equals `key` on `index`
    fn get_equal(&mut self, index: Index, key: &[u8], lock: LockMode) -> StoreResult<Vec<u8>>;

    /// Retrieve the first record in `index` order
    fn get_first(&mut self, index: Index) -> StoreResult<Vec<u8>>;

    /// Retrieve the record after the current position
    fn get_next(&mut self) -> StoreResult<Vec<u8>>;

    /// Delete the record at the current position
    fn delete(&mut self) -> StoreResult<()>;

    /// Release the handle. Later calls fail with `FileNotOpen`.
    fn close(&mut self) -> StoreResult<()>;

    /// Status of the last operation
    fn last_status(&self) -> StatusCode;
}

/// Backend chosen from a location's scheme
pub enum Client {
    LocalFile(LocalClient),
    RemoteEngine(RemoteClient),
}

impl Client {
    /// Build the client for `location`. The engine must be initialized.
    pub fn for_location(location: &Location) -> StoreResult<Self> {
        let ctx = engine::context()?;
        Ok(match location {
            Location::LocalFile(_) => Client::LocalFile(LocalClient::new(&ctx)),
            Location::RemoteEngine(_) => Client::RemoteEngine(RemoteClient::new(&ctx.config)),
        })
    }
}

impl StoreClient for Client {
    fn create(
        &self,
        location: &Location,
        attrs: &FileAttributes,
        mode: CreateMode,
    ) -> StoreResult<()> {
        match self {
            Client::LocalFile(c) => c.create(location, attrs, mode),
            Client::RemoteEngine(c) => c.create(location, attrs, mode),
        }
    }

    fn open(&self, location: &Location, mode: OpenMode) -> StoreResult<Box<dyn ObjectHandle>> {
        match self {
            Client::LocalFile(c) => c.open(location, mode),
            Client::RemoteEngine(c) => c.open(location, mode),
        }
    }
}

/// Record the status of `result` in `last` and pass it through
pub(crate) fn track<T>(last: &mut StatusCode, result: StoreResult<T>) -> StoreResult<T> {
    *last = match &result {
        Ok(_) => StatusCode::Success,
        Err(e) => e.status_code(),
    };
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_length_bounds() {
        assert!(FileAttributes::fixed(36).validate().is_ok());
        assert_eq!(
            FileAttributes::fixed(0).validate().unwrap_err().status_code(),
            StatusCode::InvalidRecordLength
        );
        assert!(FileAttributes::fixed(MAX_RECORD_LENGTH + 1).validate().is_err());
    }

    #[test]
    fn test_mode_raw_values() {
        assert_eq!(CreateMode::from_raw(CreateMode::NoOverwrite.to_raw()), CreateMode::NoOverwrite);
        assert_eq!(CreateMode::from_raw(0), CreateMode::Overwrite);
        assert_eq!(OpenMode::from_raw(OpenMode::ReadOnly.to_raw()), OpenMode::ReadOnly);
    }

    #[test]
    fn test_track_records_status() {
        let mut last = StatusCode::Success;
        let result: StoreResult<()> = track(&mut last, Err(StatusCode::EndOfFile.into()));
        assert!(result.is_err());
        assert_eq!(last, StatusCode::EndOfFile);

        track(&mut last, Ok(())).unwrap();
        assert_eq!(last, StatusCode::Success);
    }
}
