//! Blocking TCP server exposing the local backend to remote clients
//!
//! One thread per connection. Each connection gets a session that maps
//! position blocks to open local handles; the handle id lives in the first
//! four bytes of the position block. Every handle of a session is closed
//! when its connection ends.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info, trace, warn};

use crate::client::{CreateMode, FileAttributes, ObjectHandle, OpenMode};
use crate::engine;
use crate::error::{StatusCode, StoreError, StoreResult};
use crate::key::{Index, KeySegment, LockMode};
use crate::local::{LocalClient, LocalHandle};
use crate::protocol::{OperationCode, Request, Response, POSITION_BLOCK_SIZE};

/// Store server bound to a listening socket
pub struct Server {
    listener: TcpListener,
    client: Arc<LocalClient>,
    data_dir: PathBuf,
}

impl Server {
    /// Bind to `addr`, serving tables under `data_dir`. The engine must be
    /// initialized.
    pub fn bind(addr: &str, data_dir: &Path) -> StoreResult<Self> {
        let ctx = engine::context()?;
        let listener = TcpListener::bind(addr)?;
        Ok(Server {
            listener,
            client: Arc::new(LocalClient::with_base_dir(&ctx, data_dir)),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn local_addr(&self) -> StoreResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails
    pub fn serve(self) -> StoreResult<()> {
        info!("Listening on {}", self.local_addr()?);
        info!("Data directory: {}", self.data_dir.display());

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let client = self.client.clone();
                    thread::spawn(move || handle_connection(stream, client));
                }
                Err(e) => warn!("Accept error: {}", e),
            }
        }
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, client: Arc<LocalClient>) {
    let peer = stream.peer_addr().ok();
    debug!("Client connected: {:?}", peer);

    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    let mut session = Session::new(client);

    loop {
        let request = match Request::from_reader(&mut reader) {
            Ok(request) => request,
            Err(e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    debug!("Client disconnected: {:?}", peer);
                } else {
                    warn!("Error reading request from {:?}: {}", peer, e);
                }
                break;
            }
        };

        let response = session.dispatch(&request);
        let sent = response
            .write_to(&mut writer)
            .and_then(|_| writer.flush());
        if let Err(e) = sent {
            warn!("Error writing response to {:?}: {}", peer, e);
            break;
        }
    }

    let closed = session.close_all();
    debug!("Session ended for {:?}: {} handles closed", peer, closed);
}

/// Per-connection state
pub struct Session {
    client: Arc<LocalClient>,
    handles: HashMap<u32, LocalHandle>,
    next_id: u32,
}

impl Session {
    pub fn new(client: Arc<LocalClient>) -> Self {
        Session {
            client,
            handles: HashMap::new(),
            next_id: 1,
        }
    }

    /// Execute one request. Failures are reported in the response status.
    pub fn dispatch(&mut self, request: &Request) -> Response {
        let operation = request.operation();
        match self.execute(operation, request) {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                trace!("{:?} failed: {}", operation, status);
                let mut response = Response::with_status(status.as_raw());
                response.position_block = request.position_block.clone();
                response
            }
        }
    }

    fn execute(&mut self, operation: OperationCode, request: &Request) -> StoreResult<Response> {
        if !operation.requires_handle() {
            return match operation {
                OperationCode::Open => self.open(request),
                OperationCode::Create => self.create(request),
                _ => Err(StatusCode::InvalidOperation.into()),
            };
        }

        let id = handle_id(&request.position_block);
        if operation == OperationCode::Close {
            let mut handle = self
                .handles
                .remove(&id)
                .ok_or(StoreError::Status(StatusCode::FileNotOpen))?;
            handle.close()?;
            return Ok(Response::default());
        }

        let handle = self
            .handles
            .get_mut(&id)
            .ok_or(StoreError::Status(StatusCode::FileNotOpen))?;
        let data_buffer = match operation {
            OperationCode::Insert => handle.insert(&request.data_buffer)?,
            OperationCode::Delete => {
                handle.delete()?;
                Vec::new()
            }
            OperationCode::GetEqual => handle.get_equal(
                Index::from_raw(request.key_number),
                &request.key_buffer,
                LockMode::from_bias(request.lock_bias),
            )?,
            OperationCode::GetFirst => handle.get_first(Index::from_raw(request.key_number))?,
            OperationCode::StepFirst => handle.get_first(Index::None)?,
            OperationCode::GetNext | OperationCode::StepNext => handle.get_next()?,
            OperationCode::CreateIndex => {
                handle.create_index(&KeySegment::from_bytes(&request.data_buffer)?)?;
                Vec::new()
            }
            _ => return Err(StatusCode::InvalidOperation.into()),
        };

        Ok(Response {
            position_block: request.position_block.clone(),
            data_buffer,
            ..Default::default()
        })
    }

    fn open(&mut self, request: &Request) -> StoreResult<Response> {
        let path = self.resolve(&request.file_path)?;
        let handle = self
            .client
            .open_path(&path, OpenMode::from_raw(request.key_number))?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.handles.insert(id, handle);

        let mut position_block = vec![0u8; POSITION_BLOCK_SIZE];
        LittleEndian::write_u32(&mut position_block[0..4], id);
        Ok(Response {
            position_block,
            ..Default::default()
        })
    }

    fn create(&mut self, request: &Request) -> StoreResult<Response> {
        let path = self.resolve(&request.file_path)?;
        if request.data_buffer.len() < 2 {
            return Err(StatusCode::DataBufferTooShort.into());
        }
        let attrs = FileAttributes::fixed(LittleEndian::read_u16(&request.data_buffer));
        self.client
            .create_path(&path, &attrs, CreateMode::from_raw(request.key_number))?;
        Ok(Response::default())
    }

    /// Resolve a request path against the data directory. Only plain
    /// relative paths below it are served.
    fn resolve(&self, file_path: &str) -> StoreResult<PathBuf> {
        let path = Path::new(file_path);
        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if file_path.is_empty() || !contained {
            return Err(StatusCode::InvalidFileName.into());
        }
        Ok(self.client.resolve(path))
    }

    /// Close every open handle; returns how many were closed
    pub fn close_all(&mut self) -> usize {
        let count = self.handles.len();
        for (id, mut handle) in self.handles.drain() {
            if let Err(e) = handle.close() {
                warn!("Failed to close handle {}: {}", id, e);
            }
        }
        count
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }
}

fn handle_id(position_block: &[u8]) -> u32 {
    if position_block.len() < 4 {
        return 0;
    }
    LittleEndian::read_u32(&position_block[0..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::key::read_unsigned;
    use tempfile::tempdir;

    fn session(dir: &Path) -> Session {
        let ctx = engine::initialize_with(EngineConfig::default());
        Session::new(Arc::new(LocalClient::with_base_dir(&ctx, dir)))
    }

    fn request(operation: OperationCode, position_block: &[u8]) -> Request {
        let mut request = Request::new(operation);
        request.position_block = position_block.to_vec();
        request
    }

    fn open_tasks(session: &mut Session) -> Vec<u8> {
        let mut create = Request::new(OperationCode::Create);
        create.file_path = "tasks.btr".into();
        create.key_number = CreateMode::NoOverwrite.to_raw();
        create.data_buffer = 36u16.to_le_bytes().to_vec();
        assert_eq!(session.dispatch(&create).status_code, 0);

        let mut open = Request::new(OperationCode::Open);
        open.file_path = "tasks.btr".into();
        let response = session.dispatch(&open);
        assert_eq!(response.status_code, 0);

        let mut index = request(OperationCode::CreateIndex, &response.position_block);
        index.data_buffer = KeySegment::autoincrement(0, 4).to_bytes().to_vec();
        assert_eq!(session.dispatch(&index).status_code, 0);
        response.position_block
    }

    #[test]
    fn test_session_lifecycle() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        let pos = open_tasks(&mut session);
        assert_eq!(session.open_handles(), 1);

        let mut insert = request(OperationCode::Insert, &pos);
        insert.data_buffer = vec![0u8; 36];
        let response = session.dispatch(&insert);
        assert_eq!(response.status_code, 0);
        assert_eq!(read_unsigned(&response.data_buffer[0..4]), 1);

        let response = session.dispatch(&request(OperationCode::GetFirst, &pos));
        assert_eq!(response.status_code, 0);
        let response = session.dispatch(&request(OperationCode::GetNext, &pos));
        assert_eq!(response.status_code, StatusCode::EndOfFile.as_raw());

        assert_eq!(session.dispatch(&request(OperationCode::Close, &pos)).status_code, 0);
        assert_eq!(session.open_handles(), 0);
        let response = session.dispatch(&request(OperationCode::GetFirst, &pos));
        assert_eq!(response.status_code, StatusCode::FileNotOpen.as_raw());
    }

    #[test]
    fn test_create_existing_reports_status() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());
        open_tasks(&mut session);

        let mut create = Request::new(OperationCode::Create);
        create.file_path = "tasks.btr".into();
        create.key_number = CreateMode::NoOverwrite.to_raw();
        create.data_buffer = 36u16.to_le_bytes().to_vec();
        assert_eq!(
            session.dispatch(&create).status_code,
            StatusCode::FileAlreadyExists.as_raw()
        );
        assert_eq!(session.close_all(), 1);
    }

    #[test]
    fn test_rejected_requests() {
        let dir = tempdir().unwrap();
        let mut session = session(dir.path());

        let unknown = Request {
            operation_code: 3,
            ..Default::default()
        };
        assert_eq!(
            session.dispatch(&unknown).status_code,
            StatusCode::InvalidOperation.as_raw()
        );

        let mut open = Request::new(OperationCode::Open);
        open.file_path = "../escape.btr".into();
        assert_eq!(
            session.dispatch(&open).status_code,
            StatusCode::InvalidFileName.as_raw()
        );

        open.file_path = "missing.btr".into();
        assert_eq!(
            session.dispatch(&open).status_code,
            StatusCode::FileNotFound.as_raw()
        );
    }

    #[test]
    fn test_absolute_paths_are_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let mut session = session(dir.path());

        let target = outside.path().join("escaped.btr");
        let mut create = Request::new(OperationCode::Create);
        create.file_path = target.to_string_lossy().into_owned();
        create.key_number = CreateMode::NoOverwrite.to_raw();
        create.data_buffer = 36u16.to_le_bytes().to_vec();
        assert_eq!(
            session.dispatch(&create).status_code,
            StatusCode::InvalidFileName.as_raw()
        );
        assert!(!target.exists());

        let mut open = Request::new(OperationCode::Open);
        open.file_path = "/etc/passwd".into();
        assert_eq!(
            session.dispatch(&open).status_code,
            StatusCode::InvalidFileName.as_raw()
        );
    }
}
