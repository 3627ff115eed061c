//! On-disk table file
//!
//! Layout:
//! - Header (512 bytes):
//!   - 0x00: magic `TLST`
//!   - 0x04: version (u16)
//!   - 0x06: record length (u16)
//!   - 0x08: key count (u16)
//!   - 0x0C: record count (u32)
//!   - 0x10: slot count (u32)
//!   - 0x20: key segments, 16 bytes each
//! - Slots: `[flags:1][record:record_length]`, flags 1 = in use
//!
//! Records are loaded into memory on open and every write goes through to
//! disk. Indexes are rebuilt from the slots.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::client::CreateMode;
use crate::error::{StatusCode, StoreError, StoreResult};
use crate::key::{read_unsigned, write_unsigned, KeySegment, MAX_KEYS};

pub const MAGIC: &[u8; 4] = b"TLST";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 512;

const KEY_AREA_OFFSET: usize = 0x20;
const SLOT_IN_USE: u8 = 1;
const SLOT_FREE: u8 = 0;

/// Table header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub record_length: u16,
    pub record_count: u32,
    pub slot_count: u32,
    pub keys: Vec<KeySegment>,
}

impl FileHeader {
    pub fn new(record_length: u16) -> Self {
        FileHeader {
            record_length,
            record_count: 0,
            slot_count: 0,
            keys: Vec::new(),
        }
    }

    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        if data.len() < HEADER_SIZE || &data[0..4] != MAGIC {
            return Err(StatusCode::NotBtrieveFile.into());
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version = cursor.read_u16::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(StatusCode::NotBtrieveFile.into());
        }
        let record_length = cursor.read_u16::<LittleEndian>()?;
        let key_count = cursor.read_u16::<LittleEndian>()? as usize;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let record_count = cursor.read_u32::<LittleEndian>()?;
        let slot_count = cursor.read_u32::<LittleEndian>()?;

        if record_length == 0 || key_count > MAX_KEYS {
            return Err(StatusCode::NotBtrieveFile.into());
        }

        let keys = (0..key_count)
            .map(|i| {
                let start = KEY_AREA_OFFSET + i * KeySegment::SIZE;
                KeySegment::from_bytes(&data[start..start + KeySegment::SIZE])
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(FileHeader {
            record_length,
            record_count,
            slot_count,
            keys,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        {
            let mut w = &mut buf[4..KEY_AREA_OFFSET];
            // The header area is large enough for these fields.
            let _ = w.write_u16::<LittleEndian>(FORMAT_VERSION);
            let _ = w.write_u16::<LittleEndian>(self.record_length);
            let _ = w.write_u16::<LittleEndian>(self.keys.len() as u16);
            let _ = w.write_u16::<LittleEndian>(0);
            let _ = w.write_u32::<LittleEndian>(self.record_count);
            let _ = w.write_u32::<LittleEndian>(self.slot_count);
        }
        for (i, key) in self.keys.iter().enumerate() {
            let start = KEY_AREA_OFFSET + i * KeySegment::SIZE;
            buf[start..start + KeySegment::SIZE].copy_from_slice(&key.to_bytes());
        }
        buf
    }
}

/// One entry of an in-memory index
#[derive(Debug, Clone)]
struct IndexEntry {
    key: Vec<u8>,
    slot: u32,
}

/// An open table file
pub struct TableFile {
    path: PathBuf,
    file: File,
    writable: bool,
    sync_writes: bool,
    header: FileHeader,
    slots: Vec<Option<Vec<u8>>>,
    /// Bumped each time a slot is filled, so a stale position can be told
    /// apart from a new record reusing its slot
    generations: Vec<u64>,
    next_generation: u64,
    /// One sorted index per key, ordered by key value then slot
    indexes: Vec<Vec<IndexEntry>>,
}

impl TableFile {
    /// Create a table file on disk
    pub fn create(path: &Path, record_length: u16, mode: CreateMode) -> StoreResult<()> {
        let mut options = OpenOptions::new();
        options.write(true);
        match mode {
            CreateMode::NoOverwrite => options.create_new(true),
            CreateMode::Overwrite => options.create(true).truncate(true),
        };

        let mut file = options.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => StoreError::Status(StatusCode::FileAlreadyExists),
            io::ErrorKind::NotFound => StoreError::Status(StatusCode::InvalidFileName),
            io::ErrorKind::PermissionDenied => StoreError::Status(StatusCode::AccessDenied),
            _ => StoreError::Io(e),
        })?;

        file.write_all(&FileHeader::new(record_length).to_bytes())?;
        file.sync_all()?;
        debug!("Created table file {} (record length {})", path.display(), record_length);
        Ok(())
    }

    /// Open an existing table file and load its records
    pub fn open(path: &Path, writable: bool, sync_writes: bool) -> StoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StoreError::Status(StatusCode::FileNotFound),
                io::ErrorKind::PermissionDenied => StoreError::Status(StatusCode::AccessDenied),
                _ => StoreError::Io(e),
            })?;

        let mut header_data = vec![0u8; HEADER_SIZE];
        file.read_exact(&mut header_data)
            .map_err(|_| StoreError::Status(StatusCode::NotBtrieveFile))?;
        let header = FileHeader::from_bytes(&header_data)?;

        let slot_size = 1 + header.record_length as usize;
        let mut slots = Vec::with_capacity(header.slot_count as usize);
        let mut raw = vec![0u8; slot_size];
        for _ in 0..header.slot_count {
            file.read_exact(&mut raw)
                .map_err(|_| StoreError::Status(StatusCode::NotBtrieveFile))?;
            slots.push((raw[0] == SLOT_IN_USE).then(|| raw[1..].to_vec()));
        }

        let mut table = TableFile {
            path: path.to_path_buf(),
            file,
            writable,
            sync_writes,
            header,
            generations: vec![0; slots.len()],
            next_generation: 1,
            slots,
            indexes: Vec::new(),
        };
        table.indexes = (0..table.header.keys.len())
            .map(|k| table.build_index(k))
            .collect();

        debug!(
            "Opened table file {} ({} records, {} keys)",
            table.path.display(),
            table.header.record_count,
            table.header.keys.len()
        );
        Ok(table)
    }

    /// Reopen the underlying file for writing
    pub fn make_writable(&mut self) -> StoreResult<()> {
        if !self.writable {
            self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
            self.writable = true;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_length(&self) -> u16 {
        self.header.record_length
    }

    pub fn record_count(&self) -> u32 {
        self.header.record_count
    }

    pub fn keys(&self) -> &[KeySegment] {
        &self.header.keys
    }

    pub fn record(&self, slot: u32) -> Option<&[u8]> {
        self.slots.get(slot as usize).and_then(|s| s.as_deref())
    }

    /// Generation of the record in `slot`
    pub fn generation(&self, slot: u32) -> u64 {
        self.generations.get(slot as usize).copied().unwrap_or(0)
    }

    fn key(&self, key_number: u16) -> StoreResult<&KeySegment> {
        self.header
            .keys
            .get(key_number as usize)
            .ok_or(StoreError::Status(StatusCode::InvalidKeyNumber))
    }

    fn build_index(&self, key_number: usize) -> Vec<IndexEntry> {
        let segment = &self.header.keys[key_number];
        let mut entries: Vec<IndexEntry> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| {
                record.as_ref().map(|r| IndexEntry {
                    key: segment.extract_key(r).to_vec(),
                    slot: slot as u32,
                })
            })
            .collect();
        entries.sort_by(|a, b| segment.compare(&a.key, &b.key).then(a.slot.cmp(&b.slot)));
        entries
    }

    /// Add a key and index the existing records under it
    pub fn add_key(&mut self, segment: &KeySegment) -> StoreResult<()> {
        self.check_writable()?;
        if self.header.keys.len() >= MAX_KEYS {
            return Err(StatusCode::NumberOfKeysError.into());
        }
        segment.validate(self.header.record_length)?;

        self.header.keys.push(segment.clone());
        let index = self.build_index(self.header.keys.len() - 1);
        if !segment.allows_duplicates()
            && index
                .windows(2)
                .any(|w| segment.compare(&w[0].key, &w[1].key) == Ordering::Equal)
        {
            self.header.keys.pop();
            return Err(StatusCode::DuplicateKey.into());
        }
        self.indexes.push(index);

        self.write_header()?;
        debug!(
            "Key {} added to {} (offset {}, length {}, {:?})",
            self.header.keys.len() - 1,
            self.path.display(),
            segment.offset,
            segment.length,
            segment.key_type
        );
        Ok(())
    }

    /// Insert a record, returning its slot and the stored image
    pub fn insert(&mut self, data: &[u8]) -> StoreResult<(u32, Vec<u8>)> {
        self.check_writable()?;
        let record_length = self.header.record_length as usize;
        match data.len().cmp(&record_length) {
            Ordering::Less => return Err(StatusCode::DataBufferTooShort.into()),
            Ordering::Greater => return Err(StatusCode::InvalidRecordLength.into()),
            Ordering::Equal => {}
        }

        let mut record = data.to_vec();
        for (k, segment) in self.header.keys.iter().enumerate() {
            if !segment.is_autoincrement() {
                continue;
            }
            let start = segment.offset as usize;
            let width = segment.length as usize;
            let end = start + width;
            if read_unsigned(&record[start..end]) == 0 {
                let max = self.indexes[k]
                    .iter()
                    .map(|e| read_unsigned(&e.key))
                    .max()
                    .unwrap_or(0);
                let next = max
                    .checked_add(1)
                    .filter(|next| width >= 8 || next >> (8 * width) == 0)
                    .ok_or(StoreError::Status(StatusCode::AutoincrementError))?;
                record[start..end].copy_from_slice(&write_unsigned(next, width));
            }
        }

        for (k, segment) in self.header.keys.iter().enumerate() {
            if !segment.allows_duplicates()
                && self.lower_bound(k, segment.extract_key(&record)).is_some()
            {
                return Err(StatusCode::DuplicateKey.into());
            }
        }

        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => free as u32,
            None => {
                self.slots.push(None);
                self.generations.push(0);
                self.header.slot_count += 1;
                (self.slots.len() - 1) as u32
            }
        };

        self.write_slot(slot, Some(&record))?;
        self.slots[slot as usize] = Some(record.clone());
        self.generations[slot as usize] = self.next_generation;
        self.next_generation += 1;
        self.header.record_count += 1;
        self.write_header()?;

        for (k, segment) in self.header.keys.iter().enumerate() {
            let entry = IndexEntry {
                key: segment.extract_key(&record).to_vec(),
                slot,
            };
            let index = &mut self.indexes[k];
            let at = index.partition_point(|e| {
                segment.compare(&e.key, &entry.key).then(e.slot.cmp(&slot)) == Ordering::Less
            });
            index.insert(at, entry);
        }

        trace!("Inserted record into slot {} of {}", slot, self.path.display());
        Ok((slot, record))
    }

    /// Delete the record in `slot`
    pub fn delete(&mut self, slot: u32) -> StoreResult<()> {
        self.check_writable()?;
        if self.record(slot).is_none() {
            return Err(StatusCode::InvalidPositioning.into());
        }

        self.write_slot(slot, None)?;
        self.slots[slot as usize] = None;
        self.header.record_count = self.header.record_count.saturating_sub(1);
        self.write_header()?;

        for index in &mut self.indexes {
            index.retain(|e| e.slot != slot);
        }

        trace!("Deleted slot {} of {}", slot, self.path.display());
        Ok(())
    }

    /// Slot of the first record whose key equals `key`
    pub fn find_equal(&self, key_number: u16, key: &[u8]) -> StoreResult<u32> {
        let segment = self.key(key_number)?;
        if key.len() < segment.length as usize {
            return Err(StatusCode::KeyBufferTooShort.into());
        }
        let key = &key[..segment.length as usize];
        self.lower_bound(key_number as usize, key)
            .ok_or(StoreError::Status(StatusCode::KeyNotFound))
    }

    fn lower_bound(&self, key_number: usize, key: &[u8]) -> Option<u32> {
        let segment = &self.header.keys[key_number];
        let index = &self.indexes[key_number];
        let at = index.partition_point(|e| segment.compare(&e.key, key) == Ordering::Less);
        index
            .get(at)
            .filter(|e| segment.compare(&e.key, key) == Ordering::Equal)
            .map(|e| e.slot)
    }

    /// First entry in key order: `(key, slot)`
    pub fn first_by_key(&self, key_number: u16) -> StoreResult<Option<(Vec<u8>, u32)>> {
        self.key(key_number)?;
        Ok(self.indexes[key_number as usize]
            .first()
            .map(|e| (e.key.clone(), e.slot)))
    }

    /// Entry following `(key, slot)` in key order
    ///
    /// `(key, slot)` need not be present, so traversal continues after the
    /// current record has been deleted.
    pub fn next_by_key(
        &self,
        key_number: u16,
        key: &[u8],
        slot: u32,
    ) -> StoreResult<Option<(Vec<u8>, u32)>> {
        let segment = self.key(key_number)?;
        let index = &self.indexes[key_number as usize];
        let at = index.partition_point(|e| {
            segment.compare(&e.key, key).then(e.slot.cmp(&slot)) != Ordering::Greater
        });
        Ok(index.get(at).map(|e| (e.key.clone(), e.slot)))
    }

    /// First used slot at or after `from`
    pub fn next_used_slot(&self, from: u32) -> Option<u32> {
        self.slots
            .iter()
            .enumerate()
            .skip(from as usize)
            .find(|(_, s)| s.is_some())
            .map(|(slot, _)| slot as u32)
    }

    /// Key value of `record` under `key_number`
    pub fn key_of(&self, key_number: u16, record: &[u8]) -> StoreResult<Vec<u8>> {
        Ok(self.key(key_number)?.extract_key(record).to_vec())
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(StatusCode::AccessDenied.into())
        }
    }

    fn slot_offset(&self, slot: u32) -> u64 {
        HEADER_SIZE as u64 + slot as u64 * (1 + self.header.record_length as u64)
    }

    fn write_slot(&mut self, slot: u32, record: Option<&[u8]>) -> StoreResult<()> {
        let mut buf = Vec::with_capacity(1 + self.header.record_length as usize);
        match record {
            Some(data) => {
                buf.push(SLOT_IN_USE);
                buf.extend_from_slice(data);
            }
            None => {
                buf.push(SLOT_FREE);
                buf.resize(1 + self.header.record_length as usize, 0);
            }
        }
        let offset = self.slot_offset(slot);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&buf)?;
        self.sync()
    }

    fn write_header(&mut self) -> StoreResult<()> {
        let data = self.header.to_bytes();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;
        self.sync()
    }

    fn sync(&mut self) -> StoreResult<()> {
        if self.sync_writes {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyFlags, KeyType};
    use tempfile::tempdir;

    fn record(id: u32, title: &str) -> Vec<u8> {
        let mut r = vec![0u8; 36];
        r[0..4].copy_from_slice(&id.to_le_bytes());
        r[4..4 + title.len()].copy_from_slice(title.as_bytes());
        r
    }

    fn new_table(dir: &Path) -> TableFile {
        let path = dir.join("t.btr");
        TableFile::create(&path, 36, CreateMode::NoOverwrite).unwrap();
        let mut table = TableFile::open(&path, true, false).unwrap();
        table.add_key(&KeySegment::autoincrement(0, 4)).unwrap();
        table
    }

    #[test]
    fn test_header_layout() {
        let mut header = FileHeader::new(36);
        header.keys.push(KeySegment::autoincrement(0, 4));
        header.record_count = 3;
        header.slot_count = 5;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], MAGIC);
        assert_eq!(FileHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_no_overwrite_on_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.btr");
        TableFile::create(&path, 36, CreateMode::NoOverwrite).unwrap();

        let err = TableFile::create(&path, 36, CreateMode::NoOverwrite).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FileAlreadyExists);
        assert!(TableFile::create(&path, 36, CreateMode::Overwrite).is_ok());
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not a table").unwrap();

        let err = TableFile::open(&path, false, false).err().unwrap();
        assert_eq!(err.status_code(), StatusCode::NotBtrieveFile);

        let err = TableFile::open(&dir.path().join("missing.btr"), false, false)
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::FileNotFound);
    }

    #[test]
    fn test_autoincrement_overflow() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());
        table.insert(&record(u32::MAX, "last")).unwrap();

        let err = table.insert(&record(0, "wraps")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AutoincrementError);
        assert_eq!(table.record_count(), 1);
        assert!(table.find_equal(0, &0u32.to_le_bytes()).is_err());
    }

    #[test]
    fn test_autoincrement_and_reload() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());

        let (_, first) = table.insert(&record(0, "a")).unwrap();
        let (_, second) = table.insert(&record(0, "b")).unwrap();
        assert_eq!(read_unsigned(&first[0..4]), 1);
        assert_eq!(read_unsigned(&second[0..4]), 2);

        let (_, explicit) = table.insert(&record(10, "c")).unwrap();
        assert_eq!(read_unsigned(&explicit[0..4]), 10);
        let (_, next) = table.insert(&record(0, "d")).unwrap();
        assert_eq!(read_unsigned(&next[0..4]), 11);

        drop(table);
        let table = TableFile::open(&dir.path().join("t.btr"), false, false).unwrap();
        assert_eq!(table.record_count(), 4);
        assert_eq!(table.keys().len(), 1);
        assert_eq!(table.find_equal(0, &10u32.to_le_bytes()).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_and_length_checks() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());
        table.insert(&record(5, "a")).unwrap();

        let err = table.insert(&record(5, "b")).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::DuplicateKey);

        let err = table.insert(&[0u8; 10]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::DataBufferTooShort);
        let err = table.insert(&[0u8; 40]).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidRecordLength);
        assert_eq!(table.record_count(), 1);
    }

    #[test]
    fn test_deleted_slot_is_reused() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());
        let (slot, _) = table.insert(&record(0, "a")).unwrap();
        table.insert(&record(0, "b")).unwrap();

        table.delete(slot).unwrap();
        assert_eq!(
            table.delete(slot).unwrap_err().status_code(),
            StatusCode::InvalidPositioning
        );

        let (reused, _) = table.insert(&record(0, "c")).unwrap();
        assert_eq!(reused, slot);
    }

    #[test]
    fn test_key_order_traversal() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());
        for id in [300u32, 2, 256] {
            table.insert(&record(id, "x")).unwrap();
        }

        let mut ids = Vec::new();
        let mut entry = table.first_by_key(0).unwrap();
        while let Some((key, slot)) = entry {
            ids.push(read_unsigned(&key));
            entry = table.next_by_key(0, &key, slot).unwrap();
        }
        assert_eq!(ids, vec![2, 256, 300]);
    }

    #[test]
    fn test_add_key_validation() {
        let dir = tempdir().unwrap();
        let mut table = new_table(dir.path());
        table.insert(&record(1, "same")).unwrap();
        table.insert(&record(2, "same")).unwrap();

        let title = KeySegment::new(4, 32, KeyType::ZString);
        assert_eq!(
            table.add_key(&title).unwrap_err().status_code(),
            StatusCode::DuplicateKey
        );
        table
            .add_key(&title.clone().with_flags(KeyFlags::DUPLICATES))
            .unwrap();
        assert_eq!(table.keys().len(), 2);

        assert_eq!(
            table
                .add_key(&KeySegment::new(30, 8, KeyType::String))
                .unwrap_err()
                .status_code(),
            StatusCode::InvalidKeyPosition
        );
        assert_eq!(
            table.find_equal(5, &[0; 4]).unwrap_err().status_code(),
            StatusCode::InvalidKeyNumber
        );
        assert_eq!(
            table.find_equal(0, &[0; 2]).unwrap_err().status_code(),
            StatusCode::KeyBufferTooShort
        );
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        drop(new_table(dir.path()));
        let mut table = TableFile::open(&dir.path().join("t.btr"), false, false).unwrap();

        assert_eq!(
            table.insert(&record(0, "a")).unwrap_err().status_code(),
            StatusCode::AccessDenied
        );
        table.make_writable().unwrap();
        assert!(table.insert(&record(0, "a")).is_ok());
    }
}
