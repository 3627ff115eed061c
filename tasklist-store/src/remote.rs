//! Remote engine backend
//!
//! Each handle owns one TCP connection to a store server and the 128-byte
//! position block the server hands back on open. Requests are synchronous:
//! one request, one response.

use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, trace, warn};

use crate::client::{track, CreateMode, FileAttributes, ObjectHandle, OpenMode, StoreClient};
use crate::engine::EngineConfig;
use crate::error::{StatusCode, StoreError, StoreResult};
use crate::key::{Index, KeySegment, LockMode};
use crate::location::{Location, RemoteLocation};
use crate::protocol::{OperationCode, Request, Response};

/// One connection to a store server
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    /// Connect to `addr` (e.g. "127.0.0.1:7419")
    pub fn connect(addr: &str, timeout: Duration) -> StoreResult<Self> {
        let socket_addrs = addr.to_socket_addrs().map_err(|e| {
            warn!("Cannot resolve {}: {}", addr, e);
            StoreError::Status(StatusCode::CommunicationsError)
        })?;

        let mut last_error = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    let writer = BufWriter::new(stream);
                    debug!("Connected to {}", socket_addr);
                    return Ok(Connection { reader, writer });
                }
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => warn!("Connection to {} failed: {}", addr, e),
            None => warn!("{} resolved to no addresses", addr),
        }
        Err(StatusCode::CommunicationsError.into())
    }

    /// Send a request and wait for its response
    pub fn execute(&mut self, request: &Request) -> StoreResult<Response> {
        let exchange = |conn: &mut Self| -> std::io::Result<Response> {
            request.write_to(&mut conn.writer)?;
            conn.writer.flush()?;
            Response::from_reader(&mut conn.reader)
        };

        exchange(self).map_err(|e| {
            warn!("Request {:?} failed: {}", request.operation(), e);
            StoreError::Status(StatusCode::CommunicationsError)
        })
    }

    /// Send a request; a non-success status becomes an error
    pub fn call(&mut self, request: &Request) -> StoreResult<Response> {
        let response = self.execute(request)?;
        let status = StatusCode::from_raw(response.status_code);
        trace!("{:?} -> {}", request.operation(), status);
        if status.is_success() {
            Ok(response)
        } else {
            Err(status.into())
        }
    }
}

/// Client for tables served by a remote engine
#[derive(Debug, Clone)]
pub struct RemoteClient {
    default_port: u16,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &EngineConfig) -> Self {
        RemoteClient {
            default_port: config.default_port,
            timeout: config.connect_timeout(),
        }
    }

    fn remote<'a>(&self, location: &'a Location) -> StoreResult<&'a RemoteLocation> {
        match location {
            Location::RemoteEngine(remote) => Ok(remote),
            Location::LocalFile(path) => Err(StoreError::InvalidLocation(format!(
                "{} is not a remote location",
                path.display()
            ))),
        }
    }

    fn connect(&self, remote: &RemoteLocation) -> StoreResult<Connection> {
        Connection::connect(&remote.address(self.default_port), self.timeout)
    }
}

impl StoreClient for RemoteClient {
    fn create(
        &self,
        location: &Location,
        attrs: &FileAttributes,
        mode: CreateMode,
    ) -> StoreResult<()> {
        attrs.validate()?;
        let remote = self.remote(location)?;
        let mut conn = self.connect(remote)?;

        let mut request = Request::new(OperationCode::Create);
        request.file_path = remote.file_path();
        request.key_number = mode.to_raw();
        request.data_buffer.write_u16::<LittleEndian>(attrs.record_length)?;

        conn.call(&request)?;
        debug!("Created remote table {}", location);
        Ok(())
    }

    fn open(&self, location: &Location, mode: OpenMode) -> StoreResult<Box<dyn ObjectHandle>> {
        let remote = self.remote(location)?;
        let mut conn = self.connect(remote)?;

        let mut request = Request::new(OperationCode::Open);
        request.file_path = remote.file_path();
        request.key_number = mode.to_raw();

        let response = conn.call(&request)?;
        debug!("Opened remote table {}", location);
        Ok(Box::new(RemoteHandle {
            conn,
            position_block: response.position_block,
            stepping: false,
            open: true,
            last: StatusCode::Success,
        }))
    }
}

/// Handle on a remote table
pub struct RemoteHandle {
    conn: Connection,
    position_block: Vec<u8>,
    /// Last positioning used physical order, so "next" must step
    stepping: bool,
    open: bool,
    last: StatusCode,
}

impl RemoteHandle {
    fn request(&self, operation: OperationCode) -> StoreResult<Request> {
        if !self.open {
            return Err(StatusCode::FileNotOpen.into());
        }
        let mut request = Request::new(operation);
        request.position_block = self.position_block.clone();
        Ok(request)
    }

    fn send(&mut self, request: Request) -> StoreResult<Response> {
        let response = self.conn.call(&request)?;
        self.position_block = response.position_block.clone();
        Ok(response)
    }

    fn do_create_index(&mut self, segment: &KeySegment) -> StoreResult<()> {
        let mut request = self.request(OperationCode::CreateIndex)?;
        request.data_buffer = segment.to_bytes().to_vec();
        self.send(request).map(|_| ())
    }

    fn do_insert(&mut self, record: &[u8]) -> StoreResult<Vec<u8>> {
        let mut request = self.request(OperationCode::Insert)?;
        request.data_buffer = record.to_vec();
        let response = self.send(request)?;
        self.stepping = false;
        Ok(response.data_buffer)
    }

    fn do_get_equal(&mut self, index: Index, key: &[u8], lock: LockMode) -> StoreResult<Vec<u8>> {
        let mut request = self.request(OperationCode::GetEqual)?;
        request.key_buffer = key.to_vec();
        request.key_number = index.to_raw();
        request.lock_bias = lock.to_bias();
        let response = self.send(request)?;
        self.stepping = false;
        Ok(response.data_buffer)
    }

    fn do_get_first(&mut self, index: Index) -> StoreResult<Vec<u8>> {
        let operation = match index {
            Index::None => OperationCode::StepFirst,
            Index::Key(_) => OperationCode::GetFirst,
        };
        let mut request = self.request(operation)?;
        request.key_number = index.to_raw();
        let response = self.send(request)?;
        self.stepping = index == Index::None;
        Ok(response.data_buffer)
    }

    fn do_get_next(&mut self) -> StoreResult<Vec<u8>> {
        let operation = if self.stepping {
            OperationCode::StepNext
        } else {
            OperationCode::GetNext
        };
        let request = self.request(operation)?;
        Ok(self.send(request)?.data_buffer)
    }

    fn do_delete(&mut self) -> StoreResult<()> {
        let request = self.request(OperationCode::Delete)?;
        self.send(request).map(|_| ())
    }

    fn do_close(&mut self) -> StoreResult<()> {
        let request = self.request(OperationCode::Close)?;
        self.open = false;
        self.conn.call(&request).map(|_| ())
    }
}

impl ObjectHandle for RemoteHandle {
    fn create_index(&mut self, segment: &KeySegment) -> StoreResult<()> {
        let result = self.do_create_index(segment);
        track(&mut self.last, result)
    }

    fn insert(&mut self, record: &[u8]) -> StoreResult<Vec<u8>> {
        let result = self.do_insert(record);
        track(&mut self.last, result)
    }

    fn get_equal(&mut self, index: Index, key: &[u8], lock: LockMode) -> StoreResult<Vec<u8>> {
        let result = self.do_get_equal(index, key, lock);
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

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.do_close() {
                warn!("Failed to close remote handle on drop: {}", e);
            }
        }
    }
}
