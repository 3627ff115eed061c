//! Key segments, index selection and lock modes
//!
//! A table carries up to `MAX_KEYS` single-segment keys. Each key is an
//! index over one fixed byte range of the record, interpreted according to
//! its key type.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::cmp::Ordering;
use std::io::{self, Cursor};

use crate::error::{StatusCode, StoreResult};

/// Maximum number of keys (indexes) per table
pub const MAX_KEYS: usize = 24;

/// Key data types (numeric values follow Btrieve)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    /// Byte string, binary comparison
    String = 0,
    /// Signed little-endian integer (1, 2, 4, or 8 bytes)
    Integer = 1,
    /// Null-terminated string
    ZString = 11,
    /// Unsigned little-endian integer
    UnsignedBinary = 14,
    /// Auto-incrementing unsigned integer (2 or 4 bytes)
    AutoIncrement = 15,
}

impl KeyType {
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0 => Some(KeyType::String),
            1 => Some(KeyType::Integer),
            11 => Some(KeyType::ZString),
            14 => Some(KeyType::UnsignedBinary),
            15 => Some(KeyType::AutoIncrement),
            _ => None,
        }
    }

    /// Check whether `length` is a legal key length for this type
    pub fn accepts_length(&self, length: u16) -> bool {
        match self {
            KeyType::String | KeyType::ZString => (1..=255).contains(&length),
            KeyType::Integer | KeyType::UnsignedBinary => matches!(length, 1 | 2 | 4 | 8),
            KeyType::AutoIncrement => matches!(length, 2 | 4),
        }
    }
}

bitflags::bitflags! {
    /// Key flags that modify key behavior
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFlags: u16 {
        /// Allow duplicate key values
        const DUPLICATES = 0x0001;
        /// Key value can be modified with Update operation
        const MODIFIABLE = 0x0002;
        /// Descending sort order
        const DESCENDING = 0x0040;
    }
}

/// A single-segment key definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySegment {
    /// Byte offset of the key in the record
    pub offset: u16,
    /// Key length in bytes
    pub length: u16,
    /// Key flags
    pub flags: KeyFlags,
    /// Key type
    pub key_type: KeyType,
}

impl KeySegment {
    /// Size of a serialized key segment (bytes)
    pub const SIZE: usize = 16;

    pub fn new(offset: u16, length: u16, key_type: KeyType) -> Self {
        KeySegment {
            offset,
            length,
            flags: KeyFlags::empty(),
            key_type,
        }
    }

    /// Unique, non-modifiable auto-increment key
    pub fn autoincrement(offset: u16, length: u16) -> Self {
        Self::new(offset, length, KeyType::AutoIncrement)
    }

    pub fn with_flags(mut self, flags: KeyFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Parse a key segment from bytes
    ///
    /// Layout: `[offset:2][length:2][flags:2][reserved:4][type:1][reserved:5]`
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        if data.len() < Self::SIZE {
            return Err(StatusCode::DataBufferTooShort.into());
        }

        let parse = || -> io::Result<(u16, u16, u16, u8)> {
            let mut cursor = Cursor::new(data);
            let offset = cursor.read_u16::<LittleEndian>()?;
            let length = cursor.read_u16::<LittleEndian>()?;
            let flags = cursor.read_u16::<LittleEndian>()?;
            let _reserved = cursor.read_u32::<LittleEndian>()?;
            let key_type = cursor.read_u8()?;
            Ok((offset, length, flags, key_type))
        };
        let (offset, length, raw_flags, raw_type) = parse()?;

        let key_type = KeyType::from_raw(raw_type).ok_or(StatusCode::KeyTypeError)?;

        Ok(KeySegment {
            offset,
            length,
            flags: KeyFlags::from_bits_truncate(raw_flags),
            key_type,
        })
    }

    /// Serialize key segment to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        {
            let mut w = &mut buf[..];
            // Writing into a fixed slice of the right size cannot fail.
            let _ = w.write_u16::<LittleEndian>(self.offset);
            let _ = w.write_u16::<LittleEndian>(self.length);
            let _ = w.write_u16::<LittleEndian>(self.flags.bits());
        }
        buf[10] = self.key_type as u8;
        buf
    }

    /// Validate this segment against a record length
    pub fn validate(&self, record_length: u16) -> StoreResult<()> {
        if !self.key_type.accepts_length(self.length) {
            return Err(StatusCode::InvalidKeyLength.into());
        }
        if self.offset as usize + self.length as usize > record_length as usize {
            return Err(StatusCode::InvalidKeyPosition.into());
        }
        if self.is_autoincrement() && self.allows_duplicates() {
            return Err(StatusCode::AutoincrementError.into());
        }
        Ok(())
    }

    pub fn allows_duplicates(&self) -> bool {
        self.flags.contains(KeyFlags::DUPLICATES)
    }

    pub fn is_descending(&self) -> bool {
        self.flags.contains(KeyFlags::DESCENDING)
    }

    pub fn is_autoincrement(&self) -> bool {
        self.key_type == KeyType::AutoIncrement
    }

    /// Extract key value from a record
    pub fn extract_key<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        let start = (self.offset as usize).min(record.len());
        let end = (start + self.length as usize).min(record.len());
        &record[start..end]
    }

    /// Compare two key values according to key type
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let result = match self.key_type {
            KeyType::String => a.cmp(b),
            KeyType::ZString => zstring(a).cmp(zstring(b)),
            KeyType::Integer => read_signed(a).cmp(&read_signed(b)),
            KeyType::UnsignedBinary | KeyType::AutoIncrement => {
                read_unsigned(a).cmp(&read_unsigned(b))
            }
        };

        if self.is_descending() {
            result.reverse()
        } else {
            result
        }
    }
}

fn zstring(value: &[u8]) -> &[u8] {
    let end = value.iter().position(|&b| b == 0).unwrap_or(value.len());
    &value[..end]
}

/// Read a little-endian unsigned integer of up to 8 bytes
pub fn read_unsigned(value: &[u8]) -> u64 {
    let len = value.len().min(8);
    if len == 0 {
        return 0;
    }
    Cursor::new(&value[..len])
        .read_uint::<LittleEndian>(len)
        .unwrap_or(0)
}

fn read_signed(value: &[u8]) -> i64 {
    let len = value.len().min(8);
    if len == 0 {
        return 0;
    }
    Cursor::new(&value[..len])
        .read_int::<LittleEndian>(len)
        .unwrap_or(0)
}

/// Encode `value` as a little-endian unsigned integer of `length` bytes
/// (1 to 8), truncating high bytes that do not fit.
pub fn write_unsigned(value: u64, length: usize) -> Vec<u8> {
    value.to_le_bytes()[..length.clamp(1, 8)].to_vec()
}

/// Index used for positioning: a key number or physical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    /// No index: physical (slot) order
    None,
    /// Key number, 0-based
    Key(u16),
}

impl Index {
    /// The first key defined on a table
    pub const PRIMARY: Index = Index::Key(0);

    /// Key number as carried on the wire (-1 for physical order)
    pub fn to_raw(self) -> i16 {
        match self {
            Index::None => -1,
            Index::Key(n) => n as i16,
        }
    }

    pub fn from_raw(raw: i16) -> Self {
        if raw < 0 {
            Index::None
        } else {
            Index::Key(raw as u16)
        }
    }
}

/// Record lock modes matching Btrieve's lock biases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// No lock
    #[default]
    None,
    /// Single-record lock with wait
    SingleWait,
    /// Single-record lock without wait
    SingleNoWait,
    /// Multiple-record lock with wait
    MultiWait,
    /// Multiple-record lock without wait
    MultiNoWait,
}

impl LockMode {
    /// Create from Btrieve lock bias value
    pub fn from_bias(bias: u16) -> Self {
        match bias {
            100..=199 => LockMode::SingleWait,
            200..=299 => LockMode::SingleNoWait,
            300..=399 => LockMode::MultiWait,
            400..=499 => LockMode::MultiNoWait,
            _ => LockMode::None,
        }
    }

    /// Convert to Btrieve lock bias value
    pub fn to_bias(&self) -> u16 {
        match self {
            LockMode::None => 0,
            LockMode::SingleWait => 100,
            LockMode::SingleNoWait => 200,
            LockMode::MultiWait => 300,
            LockMode::MultiNoWait => 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_segment_roundtrip() {
        let segment = KeySegment::new(4, 32, KeyType::ZString)
            .with_flags(KeyFlags::DUPLICATES | KeyFlags::MODIFIABLE);

        let bytes = segment.to_bytes();
        let parsed = KeySegment::from_bytes(&bytes).unwrap();

        assert_eq!(parsed, segment);
        assert!(parsed.allows_duplicates());
    }

    #[test]
    fn test_unknown_key_type_rejected() {
        let mut bytes = KeySegment::autoincrement(0, 4).to_bytes();
        bytes[10] = 200;
        let err = KeySegment::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::KeyTypeError);
    }

    #[test]
    fn test_validate_against_record_length() {
        assert!(KeySegment::autoincrement(0, 4).validate(36).is_ok());

        let err = KeySegment::autoincrement(34, 4).validate(36).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidKeyPosition);

        let err = KeySegment::autoincrement(0, 3).validate(36).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidKeyLength);

        let err = KeySegment::autoincrement(0, 4)
            .with_flags(KeyFlags::DUPLICATES)
            .validate(36)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::AutoincrementError);
    }

    #[test]
    fn test_unsigned_comparison_is_numeric() {
        let spec = KeySegment::autoincrement(0, 4);
        let one = 1u32.to_le_bytes();
        let two_fifty_six = 256u32.to_le_bytes();

        // Bytewise, [0,1,0,0] < [1,0,0,0]; numerically 256 > 1.
        assert_eq!(spec.compare(&two_fifty_six, &one), Ordering::Greater);
    }

    #[test]
    fn test_signed_and_descending_comparison() {
        let spec = KeySegment::new(0, 4, KeyType::Integer);
        let neg = (-1i32).to_le_bytes();
        let pos = 1i32.to_le_bytes();
        assert_eq!(spec.compare(&neg, &pos), Ordering::Less);

        let desc = spec.with_flags(KeyFlags::DESCENDING);
        assert_eq!(desc.compare(&neg, &pos), Ordering::Greater);
    }

    #[test]
    fn test_zstring_ignores_trailing_bytes() {
        let spec = KeySegment::new(0, 8, KeyType::ZString);
        assert_eq!(spec.compare(b"abc\0xxxx", b"abc\0yyyy"), Ordering::Equal);
    }

    #[test]
    fn test_extract_key() {
        let spec = KeySegment::new(5, 3, KeyType::String);
        assert_eq!(spec.extract_key(b"HELLO WORLD"), b" WO");
    }

    #[test]
    fn test_unsigned_helpers() {
        assert_eq!(write_unsigned(258, 2), vec![2, 1]);
        assert_eq!(read_unsigned(&[2, 1]), 258);
        assert_eq!(read_unsigned(&[]), 0);
    }

    #[test]
    fn test_index_and_lock_raw_values() {
        assert_eq!(Index::None.to_raw(), -1);
        assert_eq!(Index::from_raw(-1), Index::None);
        assert_eq!(Index::from_raw(0), Index::PRIMARY);

        assert_eq!(LockMode::from_bias(0), LockMode::None);
        assert_eq!(LockMode::from_bias(LockMode::MultiNoWait.to_bias()), LockMode::MultiNoWait);
    }
}
