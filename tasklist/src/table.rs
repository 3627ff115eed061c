//! The task table
//!
//! A `Table` binds the record layout to a store client and a location, and
//! makes sure the backing store object exists with its id index.

use std::sync::Arc;

use tasklist_store::{
    Client, CreateMode, FileAttributes, Index, KeySegment, Location, OpenMode, StatusCode,
    StoreClient,
};
use tracing::{debug, info, warn};

use crate::cursor::Cursor;
use crate::error::TaskResult;
use crate::iter::StartMode;
use crate::record::{Record, RecordCodec};

/// The auto-increment index on the id field
pub const ID_INDEX: Index = Index::Key(0);

pub struct Table {
    client: Arc<dyn StoreClient>,
    location: Location,
    codec: RecordCodec,
}

impl Table {
    /// Bind to the table at `location`, creating it if absent.
    ///
    /// The engine must be initialized first.
    pub fn open_or_create(location: &str) -> TaskResult<Self> {
        let location = Location::parse(location)?;
        let client = Client::for_location(&location)?;
        Self::with_client(Arc::new(client), location)
    }

    /// Bind to the table at `location` through `client`, creating it if absent
    pub fn with_client(client: Arc<dyn StoreClient>, location: Location) -> TaskResult<Self> {
        let table = Table {
            client,
            location,
            codec: RecordCodec::default(),
        };
        table.create_if_needed()?;
        Ok(table)
    }

    /// Create the store object and its id index unless it already exists
    fn create_if_needed(&self) -> TaskResult<()> {
        let layout = self.codec.layout();
        let attrs = FileAttributes::fixed(self.record_size() as u16);

        match self.client.create(&self.location, &attrs, CreateMode::NoOverwrite) {
            Ok(()) => {}
            Err(e) if e.status_code() == StatusCode::FileAlreadyExists => {
                debug!("Table {} already exists", self.location);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let mut handle = self.client.open(&self.location, OpenMode::Normal)?;
        let id_key = KeySegment::autoincrement(layout.id_offset as u16, layout.id_size as u16);
        let indexed = handle.create_index(&id_key);
        let closed = handle.close();
        indexed?;
        if let Err(e) = closed {
            warn!("Closing {} after index creation failed: {}", self.location, e);
        }

        info!("Created table {}", self.location);
        Ok(())
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    pub(crate) fn client(&self) -> &dyn StoreClient {
        self.client.as_ref()
    }

    pub fn record_size(&self) -> usize {
        self.codec.record_size()
    }

    /// Title field width; titles keep at most `title_capacity() - 1` bytes
    pub fn title_capacity(&self) -> usize {
        self.codec.title_capacity()
    }

    pub fn encode(&self, record: &Record) -> TaskResult<Vec<u8>> {
        self.codec.encode(record)
    }

    pub fn decode(&self, data: &[u8]) -> TaskResult<Record> {
        self.codec.decode(data)
    }

    /// Open a cursor on this table
    pub fn cursor(&self) -> TaskResult<Cursor<'_>> {
        Cursor::open(self)
    }

    /// Every record, in id order
    pub fn scan(&self) -> TaskResult<Vec<Record>> {
        let mut cursor = self.cursor()?;
        let records = cursor
            .records(ID_INDEX, StartMode::FromBeginning)
            .collect::<TaskResult<Vec<_>>>()?;
        cursor.close()?;
        Ok(records)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("location", &self.location)
            .field("layout", self.codec.layout())
            .finish()
    }
}
