//! Task records and their fixed byte layout
//!
//! Record layout (36 bytes):
//!   0x00: id (u32, little-endian)
//!   0x04: title (32 bytes, UTF-8, zero-terminated, zero-padded)

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{TaskError, TaskResult};

/// One task
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// Assigned by the store on insert; 0 until then
    pub id: u32,
    pub title: String,
}

impl Record {
    /// A record not yet stored
    pub fn new(title: impl Into<String>) -> Self {
        Record {
            id: 0,
            title: title.into(),
        }
    }

    pub fn with_id(id: u32, title: impl Into<String>) -> Self {
        Record {
            id,
            title: title.into(),
        }
    }
}

/// Field offsets and widths of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub id_offset: usize,
    pub id_size: usize,
    pub title_offset: usize,
    pub title_size: usize,
}

/// Layout of the task table
pub const TASK_LAYOUT: Layout = Layout {
    id_offset: 0,
    id_size: 4,
    title_offset: 4,
    title_size: 32,
};

impl Layout {
    pub const fn record_size(&self) -> usize {
        self.id_size + self.title_size
    }

    /// Width of the title field, terminator included
    pub const fn title_capacity(&self) -> usize {
        self.title_size
    }
}

/// Converts records to and from their raw image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    layout: Layout,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(TASK_LAYOUT)
    }
}

impl RecordCodec {
    pub const fn new(layout: Layout) -> Self {
        RecordCodec { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn record_size(&self) -> usize {
        self.layout.record_size()
    }

    pub fn title_capacity(&self) -> usize {
        self.layout.title_capacity()
    }

    /// Longest prefix of `title` that fits the title field with its
    /// terminator, cut on a character boundary
    pub fn fit_title<'a>(&self, title: &'a str) -> &'a str {
        let mut end = title.len().min(self.title_capacity().saturating_sub(1));
        while !title.is_char_boundary(end) {
            end -= 1;
        }
        &title[..end]
    }

    /// Encode `record`, truncating an oversized title
    pub fn encode(&self, record: &Record) -> TaskResult<Vec<u8>> {
        let Layout {
            id_offset,
            id_size,
            title_offset,
            title_size,
        } = self.layout;
        if id_size != 4 {
            return Err(TaskError::Encode(format!("id field is {} bytes, expected 4", id_size)));
        }

        let title = self.fit_title(&record.title).as_bytes();
        if title.len() + 1 > title_size {
            return Err(TaskError::Encode(format!(
                "title of {} bytes does not fit a {}-byte field",
                title.len(),
                title_size
            )));
        }

        let mut buf = vec![0u8; self.record_size()];
        LittleEndian::write_u32(&mut buf[id_offset..id_offset + id_size], record.id);
        // The rest of the field is already zero, terminator included.
        buf[title_offset..title_offset + title.len()].copy_from_slice(title);
        Ok(buf)
    }

    /// Decode a raw record image
    pub fn decode(&self, data: &[u8]) -> TaskResult<Record> {
        let Layout {
            id_offset,
            id_size,
            title_offset,
            title_size,
        } = self.layout;
        if data.len() < self.record_size() {
            return Err(TaskError::Decode(format!(
                "record is {} bytes, expected {}",
                data.len(),
                self.record_size()
            )));
        }

        let id = LittleEndian::read_u32(&data[id_offset..id_offset + id_size]);
        let field = &data[title_offset..title_offset + title_size];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let title = std::str::from_utf8(&field[..end])
            .map_err(|e| TaskError::Decode(format!("title of record {} is not UTF-8: {}", id, e)))?;

        Ok(Record {
            id,
            title: title.to_string(),
        })
    }
}
