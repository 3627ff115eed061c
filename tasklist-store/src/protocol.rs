//! Binary wire protocol between remote clients and the store server
//!
//! Request format:
//!   [op:2][pos_block:128][data_len:4][data:N][key_len:2][key:N][key_num:2][path_len:2][path:N][lock:2]
//!
//! Response format:
//!   [status:2][pos_block:128][data_len:4][data:N][key_len:2][key:N]
//!
//! All integers are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const POSITION_BLOCK_SIZE: usize = 128;
pub const DEFAULT_PORT: u16 = 7419;

/// Largest data buffer accepted from the wire
pub const MAX_DATA_LENGTH: usize = 64 * 1024;

/// Operation codes (numeric values follow Btrieve)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OperationCode {
    Open = 0,
    Close = 1,
    Insert = 2,
    Delete = 4,
    GetEqual = 5,
    GetNext = 6,
    GetFirst = 12,
    Create = 14,
    StepNext = 24,
    CreateIndex = 31,
    StepFirst = 33,
    Unknown = 255,
}

impl OperationCode {
    pub fn from_raw(code: u16) -> Self {
        match code {
            0 => OperationCode::Open,
            1 => OperationCode::Close,
            2 => OperationCode::Insert,
            4 => OperationCode::Delete,
            5 => OperationCode::GetEqual,
            6 => OperationCode::GetNext,
            12 => OperationCode::GetFirst,
            14 => OperationCode::Create,
            24 => OperationCode::StepNext,
            31 => OperationCode::CreateIndex,
            33 => OperationCode::StepFirst,
            _ => OperationCode::Unknown,
        }
    }

    /// Check if this operation needs an open handle (a position block)
    pub fn requires_handle(&self) -> bool {
        !matches!(
            self,
            OperationCode::Open | OperationCode::Create | OperationCode::Unknown
        )
    }
}

/// Request from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation_code: u16,
    pub position_block: Vec<u8>,
    pub data_buffer: Vec<u8>,
    pub key_buffer: Vec<u8>,
    pub key_number: i16,
    pub file_path: String,
    pub lock_bias: u16,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            operation_code: 0,
            position_block: vec![0u8; POSITION_BLOCK_SIZE],
            data_buffer: Vec::new(),
            key_buffer: Vec::new(),
            key_number: 0,
            file_path: String::new(),
            lock_bias: 0,
        }
    }
}

impl Request {
    pub fn new(operation: OperationCode) -> Self {
        Request {
            operation_code: operation as u16,
            ..Default::default()
        }
    }

    pub fn operation(&self) -> OperationCode {
        OperationCode::from_raw(self.operation_code)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.operation_code)?;
        write_position_block(writer, &self.position_block)?;

        writer.write_u32::<LittleEndian>(self.data_buffer.len() as u32)?;
        writer.write_all(&self.data_buffer)?;

        write_short_buffer(writer, &self.key_buffer)?;
        writer.write_i16::<LittleEndian>(self.key_number)?;
        write_short_buffer(writer, self.file_path.as_bytes())?;

        writer.write_u16::<LittleEndian>(self.lock_bias)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(POSITION_BLOCK_SIZE + 16 + self.data_buffer.len());
        // Writes into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let operation_code = reader.read_u16::<LittleEndian>()?;
        let position_block = read_position_block(reader)?;
        let data_buffer = read_data_buffer(reader)?;
        let key_buffer = read_short_buffer(reader)?;
        let key_number = reader.read_i16::<LittleEndian>()?;
        let path_buf = read_short_buffer(reader)?;
        let file_path = String::from_utf8_lossy(&path_buf).to_string();
        let lock_bias = reader.read_u16::<LittleEndian>()?;

        Ok(Request {
            operation_code,
            position_block,
            data_buffer,
            key_buffer,
            key_number,
            file_path,
            lock_bias,
        })
    }
}

/// Response from server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status_code: u16,
    pub position_block: Vec<u8>,
    pub data_buffer: Vec<u8>,
    pub key_buffer: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status_code: 0,
            position_block: vec![0u8; POSITION_BLOCK_SIZE],
            data_buffer: Vec::new(),
            key_buffer: Vec::new(),
        }
    }
}

impl Response {
    pub fn with_status(status_code: u16) -> Self {
        Response {
            status_code,
            ..Default::default()
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<LittleEndian>(self.status_code)?;
        write_position_block(writer, &self.position_block)?;

        writer.write_u32::<LittleEndian>(self.data_buffer.len() as u32)?;
        writer.write_all(&self.data_buffer)?;

        write_short_buffer(writer, &self.key_buffer)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(POSITION_BLOCK_SIZE + 8 + self.data_buffer.len());
        let _ = self.write_to(&mut buf);
        buf
    }

    pub fn from_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let status_code = reader.read_u16::<LittleEndian>()?;
        let position_block = read_position_block(reader)?;
        let data_buffer = read_data_buffer(reader)?;
        let key_buffer = read_short_buffer(reader)?;

        Ok(Response {
            status_code,
            position_block,
            data_buffer,
            key_buffer,
        })
    }
}

/// Position block, zero-padded or truncated to 128 bytes
fn write_position_block<W: Write>(writer: &mut W, block: &[u8]) -> io::Result<()> {
    let mut pos_block = [0u8; POSITION_BLOCK_SIZE];
    let copy_len = block.len().min(POSITION_BLOCK_SIZE);
    pos_block[..copy_len].copy_from_slice(&block[..copy_len]);
    writer.write_all(&pos_block)
}

fn read_position_block<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut block = vec![0u8; POSITION_BLOCK_SIZE];
    reader.read_exact(&mut block)?;
    Ok(block)
}

fn read_data_buffer<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    if len > MAX_DATA_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("data buffer of {} bytes exceeds {}", len, MAX_DATA_LENGTH),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// 2-byte length prefix + data
fn write_short_buffer<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "buffer longer than 65535 bytes")
    })?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_all(data)
}

fn read_short_buffer<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_layout() {
        let mut request = Request::new(OperationCode::GetEqual);
        request.key_buffer = vec![7, 0, 0, 0];
        request.key_number = 0;
        request.file_path = "db/tasks.btr".to_string();
        request.lock_bias = 200;

        let bytes = request.to_bytes();
        // op + pos + dlen + klen + key + knum + plen + path + lock
        assert_eq!(bytes.len(), 2 + 128 + 4 + 2 + 4 + 2 + 2 + 12 + 2);
        assert_eq!(&bytes[0..2], &5u16.to_le_bytes());

        let parsed = Request::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.operation(), OperationCode::GetEqual);
    }

    #[test]
    fn test_response_pads_position_block() {
        let response = Response {
            status_code: 9,
            position_block: vec![1, 2, 3],
            data_buffer: vec![0xAA; 36],
            key_buffer: Vec::new(),
        };

        let parsed = Response::from_reader(&mut Cursor::new(response.to_bytes())).unwrap();
        assert_eq!(parsed.status_code, 9);
        assert_eq!(parsed.position_block.len(), POSITION_BLOCK_SIZE);
        assert_eq!(&parsed.position_block[..3], &[1, 2, 3]);
        assert_eq!(parsed.data_buffer, vec![0xAA; 36]);
    }

    #[test]
    fn test_truncated_response_is_error() {
        let bytes = Response::with_status(0).to_bytes();
        let err = Response::from_reader(&mut Cursor::new(&bytes[..40])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_oversized_data_rejected() {
        let mut bytes = Vec::new();
        bytes.write_u16::<LittleEndian>(0).unwrap();
        bytes.extend_from_slice(&[0u8; POSITION_BLOCK_SIZE]);
        bytes.write_u32::<LittleEndian>(u32::MAX).unwrap();

        let err = Response::from_reader(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(OperationCode::from_raw(33), OperationCode::StepFirst);
        assert_eq!(OperationCode::from_raw(3), OperationCode::Unknown);
        assert!(OperationCode::Delete.requires_handle());
        assert!(!OperationCode::Create.requires_handle());
    }
}
