//! Forward iteration over a cursor
//!
//! The store cannot say whether another record exists without fetching it,
//! so the iterator keeps a one-record lookahead. Once the end has been
//! reached it stays there.

use tasklist_store::Index;

use crate::cursor::Cursor;
use crate::error::{TaskError, TaskResult};
use crate::record::Record;

/// Where the first fetch of an iterator starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Retrieve the first record of the index
    FromBeginning,
    /// Continue after the record the cursor is positioned on
    FromCurrentPosition,
}

pub struct RecordIterator<'c, 't> {
    cursor: &'c mut Cursor<'t>,
    index: Index,
    seek_first: bool,
    prefetched: Option<Record>,
    exhausted: bool,
}

impl<'c, 't> RecordIterator<'c, 't> {
    pub fn new(cursor: &'c mut Cursor<'t>, index: Index, start: StartMode) -> Self {
        RecordIterator {
            cursor,
            index,
            seek_first: start == StartMode::FromBeginning,
            prefetched: None,
            exhausted: false,
        }
    }

    /// Check for another record, fetching it into the lookahead if needed
    pub fn has_more(&mut self) -> TaskResult<bool> {
        if self.prefetched.is_some() {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }

        let fetched = if self.seek_first {
            self.cursor.retrieve_first(self.index)
        } else {
            self.cursor.retrieve_next()
        };
        self.seek_first = false;

        match fetched {
            Ok(Some(record)) => {
                self.prefetched = Some(record);
                Ok(true)
            }
            Ok(None) => {
                self.exhausted = true;
                Ok(false)
            }
            Err(e) => {
                self.exhausted = true;
                Err(e)
            }
        }
    }

    /// Take the next record; fails with `EndOfSequence` past the end
    pub fn take_next(&mut self) -> TaskResult<Record> {
        if self.has_more()? {
            if let Some(record) = self.prefetched.take() {
                return Ok(record);
            }
        }
        Err(TaskError::EndOfSequence)
    }
}

impl Iterator for RecordIterator<'_, '_> {
    type Item = TaskResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.take_next() {
            Ok(record) => Some(Ok(record)),
            Err(TaskError::EndOfSequence) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl std::iter::FusedIterator for RecordIterator<'_, '_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Table, ID_INDEX};
    use tasklist_store::{engine, EngineConfig};
    use tempfile::tempdir;

    fn table_with(dir: &std::path::Path, titles: &[&str]) -> Table {
        engine::initialize_with(EngineConfig::default());
        let table = Table::open_or_create(&dir.join("tasks.btr").to_string_lossy()).unwrap();
        let mut cursor = table.cursor().unwrap();
        for title in titles {
            cursor.insert(&Record::new(*title)).unwrap();
        }
        cursor.close().unwrap();
        table
    }

    #[test]
    fn test_has_more_is_idempotent() {
        let dir = tempdir().unwrap();
        let table = table_with(dir.path(), &["a"]);
        let mut cursor = table.cursor().unwrap();
        let mut iter = cursor.iter();

        assert!(iter.has_more().unwrap());
        assert!(iter.has_more().unwrap());
        assert_eq!(iter.take_next().unwrap().title, "a");
        assert!(!iter.has_more().unwrap());
        assert!(matches!(iter.take_next(), Err(TaskError::EndOfSequence)));
        assert!(matches!(iter.take_next(), Err(TaskError::EndOfSequence)));
    }

    #[test]
    fn test_empty_table() {
        let dir = tempdir().unwrap();
        let table = table_with(dir.path(), &[]);
        let mut cursor = table.cursor().unwrap();
        assert_eq!(cursor.iter().count(), 0);
    }

    #[test]
    fn test_from_current_position() {
        let dir = tempdir().unwrap();
        let table = table_with(dir.path(), &["a", "b", "c"]);
        let mut cursor = table.cursor().unwrap();

        let second = table.scan().unwrap()[1].id;
        cursor.lookup_by_id(second).unwrap().unwrap();

        let rest: Vec<String> = cursor
            .records(ID_INDEX, StartMode::FromCurrentPosition)
            .map(|r| r.unwrap().title)
            .collect();
        assert_eq!(rest, vec!["c".to_string()]);
    }

    #[test]
    fn test_unpositioned_start_is_an_error() {
        let dir = tempdir().unwrap();
        let table = table_with(dir.path(), &["a"]);
        let mut cursor = table.cursor().unwrap();
        let mut iter = cursor.records(ID_INDEX, StartMode::FromCurrentPosition);

        assert!(matches!(iter.next(), Some(Err(TaskError::Store(_)))));
        assert!(iter.next().is_none());
    }
}
