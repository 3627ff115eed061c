//! Tasklist - record access layer for the task table
//!
//! Tasks are fixed-layout records kept in a keyed store. This crate defines
//! the record layout and codec, creates the table and its auto-increment id
//! index on first use, and provides a cursor and iterator over it.
//!
//! ```no_run
//! use tasklist::{Record, Table};
//! use tasklist_store::engine;
//!
//! # fn main() -> tasklist::TaskResult<()> {
//! engine::initialize(std::path::Path::new("."))?;
//! let table = Table::open_or_create("tasks.btr")?;
//! let mut cursor = table.cursor()?;
//! let task = cursor.insert(&Record::new("Buy milk"))?;
//! cursor.delete_by_id(task.id)?;
//! cursor.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod error;
pub mod iter;
pub mod record;
pub mod table;

pub use cursor::Cursor;
pub use error::{TaskError, TaskResult};
pub use iter::{RecordIterator, StartMode};
pub use record::{Layout, Record, RecordCodec, TASK_LAYOUT};
pub use table::{Table, ID_INDEX};
