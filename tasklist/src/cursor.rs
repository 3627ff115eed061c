//! Cursor - a positioned handle on an open table
//!
//! The store tracks the current record. `lookup_by_id` and the retrieval
//! calls move that position; `delete_by_id` deletes the record it lands on.
//! The handle is released by `close()` or, failing that, on drop.

use tasklist_store::{Index, LockMode, ObjectHandle, OpenMode, StatusCode, StoreError};
use tracing::{debug, trace, warn};

use crate::error::{TaskError, TaskResult};
use crate::iter::{RecordIterator, StartMode};
use crate::record::Record;
use crate::table::{Table, ID_INDEX};

pub struct Cursor<'t> {
    table: &'t Table,
    handle: Box<dyn ObjectHandle>,
    open: bool,
}

impl<'t> Cursor<'t> {
    /// Open a handle on `table`
    pub fn open(table: &'t Table) -> TaskResult<Self> {
        let handle = table.client().open(table.location(), OpenMode::Normal)?;
        debug!("Cursor opened on {}", table.location());
        Ok(Cursor {
            table,
            handle,
            open: true,
        })
    }

    pub fn table(&self) -> &'t Table {
        self.table
    }

    /// Insert a new record. Returns it with the id the store assigned.
    pub fn insert(&mut self, record: &Record) -> TaskResult<Record> {
        if record.id != 0 {
            return Err(TaskError::IdAlreadyAssigned(record.id));
        }
        let image = self.handle.insert(&self.table.encode(record)?)?;
        let stored = self.table.decode(&image)?;
        trace!("Inserted task {}", stored.id);
        Ok(stored)
    }

    /// Find the record with `id`, leaving the cursor positioned on it
    pub fn lookup_by_id(&mut self, id: u32) -> TaskResult<Option<Record>> {
        let key = id.to_le_bytes();
        match self.handle.get_equal(ID_INDEX, &key, LockMode::None) {
            Ok(image) => Ok(Some(self.table.decode(&image)?)),
            Err(e) if e.status_code() == StatusCode::KeyNotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// First record in `index` order, or physical order for `Index::None`
    pub fn retrieve_first(&mut self, index: Index) -> TaskResult<Option<Record>> {
        let result = self.handle.get_first(index);
        self.retrieved(result)
    }

    /// Record after the current position
    pub fn retrieve_next(&mut self) -> TaskResult<Option<Record>> {
        let result = self.handle.get_next();
        self.retrieved(result)
    }

    fn retrieved(&self, result: Result<Vec<u8>, StoreError>) -> TaskResult<Option<Record>> {
        match result {
            Ok(image) => Ok(Some(self.table.decode(&image)?)),
            Err(e) if e.status_code().is_eof() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the record with `id`
    pub fn delete_by_id(&mut self, id: u32) -> TaskResult<()> {
        if self.lookup_by_id(id)?.is_none() {
            return Err(TaskError::NotFound(id));
        }
        self.handle.delete()?;
        trace!("Deleted task {}", id);
        Ok(())
    }

    /// Iterate over the records in `index` order
    pub fn records(&mut self, index: Index, start: StartMode) -> RecordIterator<'_, 't> {
        RecordIterator::new(self, index, start)
    }

    /// Iterate over every record in id order
    pub fn iter(&mut self) -> RecordIterator<'_, 't> {
        self.records(ID_INDEX, StartMode::FromBeginning)
    }

    /// Status of the last store operation
    pub fn last_status(&self) -> StatusCode {
        self.handle.last_status()
    }

    /// Release the handle
    pub fn close(mut self) -> TaskResult<()> {
        self.open = false;
        self.handle.close()?;
        debug!("Cursor closed on {}", self.table.location());
        Ok(())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.handle.close() {
                warn!("Failed to close cursor on {}: {}", self.table.location(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::tests::ScriptedClient;
    use std::sync::Arc;
    use tasklist_store::{engine, EngineConfig, Location};
    use tempfile::tempdir;

    fn local_table(dir: &std::path::Path) -> Table {
        engine::initialize_with(EngineConfig::default());
        let path = dir.join("tasks.btr");
        Table::open_or_create(&path.to_string_lossy()).unwrap()
    }

    #[test]
    fn test_insert_assigns_ids() {
        let dir = tempdir().unwrap();
        let table = local_table(dir.path());
        let mut cursor = table.cursor().unwrap();

        let first = cursor.insert(&Record::new("Buy milk")).unwrap();
        let second = cursor.insert(&Record::new("Call Bob")).unwrap();
        assert_eq!(first.title, "Buy milk");
        assert!(first.id > 0);
        assert!(second.id > first.id);

        let err = cursor.insert(&first).unwrap_err();
        assert!(matches!(err, TaskError::IdAlreadyAssigned(id) if id == first.id));
        cursor.close().unwrap();
    }

    #[test]
    fn test_lookup_and_delete() {
        let dir = tempdir().unwrap();
        let table = local_table(dir.path());
        let mut cursor = table.cursor().unwrap();
        let task = cursor.insert(&Record::new("Water plants")).unwrap();

        assert_eq!(cursor.lookup_by_id(task.id).unwrap(), Some(task.clone()));
        assert_eq!(cursor.lookup_by_id(task.id + 100).unwrap(), None);
        assert_eq!(cursor.last_status(), StatusCode::KeyNotFound);

        cursor.delete_by_id(task.id).unwrap();
        assert_eq!(cursor.lookup_by_id(task.id).unwrap(), None);
        assert!(matches!(
            cursor.delete_by_id(task.id),
            Err(TaskError::NotFound(id)) if id == task.id
        ));
    }

    #[test]
    fn test_retrieve_first_and_next() {
        let dir = tempdir().unwrap();
        let table = local_table(dir.path());
        let mut cursor = table.cursor().unwrap();

        assert_eq!(cursor.retrieve_first(ID_INDEX).unwrap(), None);
        cursor.insert(&Record::new("one")).unwrap();
        cursor.insert(&Record::new("two")).unwrap();

        let first = cursor.retrieve_first(Index::None).unwrap().unwrap();
        assert_eq!(first.title, "one");
        let second = cursor.retrieve_next().unwrap().unwrap();
        assert_eq!(second.title, "two");
        assert_eq!(cursor.retrieve_next().unwrap(), None);
        assert_eq!(cursor.last_status(), StatusCode::EndOfFile);
    }

    #[test]
    fn test_store_failures_propagate() {
        let table =
            Table::with_client(Arc::new(ScriptedClient::default()), Location::parse("t.btr").unwrap())
                .unwrap();
        let mut cursor = table.cursor().unwrap();

        let err = cursor.insert(&Record::new("x")).unwrap_err();
        assert_eq!(err.status_code(), Some(StatusCode::InvalidOperation));

        // Not positioned: the lookup finds nothing, so delete is never attempted.
        assert!(matches!(cursor.delete_by_id(1), Err(TaskError::NotFound(1))));
    }

    #[test]
    fn test_drop_releases_handle() {
        let client = ScriptedClient::default();
        let calls = client.calls.clone();
        let table = Table::with_client(Arc::new(client), Location::parse("t.btr").unwrap()).unwrap();
        calls.lock().clear();

        drop(table.cursor().unwrap());
        assert_eq!(*calls.lock(), vec!["open".to_string(), "close".to_string()]);

        calls.lock().clear();
        table.cursor().unwrap().close().unwrap();
        assert_eq!(*calls.lock(), vec!["open".to_string(), "close".to_string()]);
    }
}
