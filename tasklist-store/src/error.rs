//! Store status codes and error handling
//!
//! The store reports Btrieve-compatible numeric status codes. Only the codes
//! this store can actually produce are mapped; anything else decodes to
//! `StatusCode::Unknown`.

use thiserror::Error;

/// Store status codes (numeric values follow Btrieve)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusCode {
    /// Operation completed successfully
    Success = 0,
    /// Invalid operation code
    InvalidOperation = 1,
    /// I/O error occurred
    IoError = 2,
    /// File not open
    FileNotOpen = 3,
    /// Key value not found
    KeyNotFound = 4,
    /// Duplicate key value (when duplicates not allowed)
    DuplicateKey = 5,
    /// Invalid key number
    InvalidKeyNumber = 6,
    /// Invalid positioning (no current record)
    InvalidPositioning = 8,
    /// End of file reached
    EndOfFile = 9,
    /// Invalid file name
    InvalidFileName = 11,
    /// File not found
    FileNotFound = 12,
    /// Engine has not been initialized
    RecordManagerInactive = 20,
    /// Key buffer too short
    KeyBufferTooShort = 21,
    /// Data buffer too short
    DataBufferTooShort = 22,
    /// Number of keys error
    NumberOfKeysError = 26,
    /// Invalid key position
    InvalidKeyPosition = 27,
    /// Invalid record length
    InvalidRecordLength = 28,
    /// Invalid key length
    InvalidKeyLength = 29,
    /// Not a store file
    NotBtrieveFile = 30,
    /// Access denied
    AccessDenied = 45,
    /// Key type error
    KeyTypeError = 48,
    /// Autoincrement error
    AutoincrementError = 55,
    /// File already exists
    FileAlreadyExists = 59,
    /// File in use
    FileInUse = 80,
    /// Communications environment error
    CommunicationsError = 90,
    /// Unknown status code
    Unknown = 65535,
}

impl StatusCode {
    /// Create a StatusCode from a raw u16 value
    pub fn from_raw(code: u16) -> Self {
        match code {
            0 => StatusCode::Success,
            1 => StatusCode::InvalidOperation,
            2 => StatusCode::IoError,
            3 => StatusCode::FileNotOpen,
            4 => StatusCode::KeyNotFound,
            5 => StatusCode::DuplicateKey,
            6 => StatusCode::InvalidKeyNumber,
            8 => StatusCode::InvalidPositioning,
            9 => StatusCode::EndOfFile,
            11 => StatusCode::InvalidFileName,
            12 => StatusCode::FileNotFound,
            20 => StatusCode::RecordManagerInactive,
            21 => StatusCode::KeyBufferTooShort,
            22 => StatusCode::DataBufferTooShort,
            26 => StatusCode::NumberOfKeysError,
            27 => StatusCode::InvalidKeyPosition,
            28 => StatusCode::InvalidRecordLength,
            29 => StatusCode::InvalidKeyLength,
            30 => StatusCode::NotBtrieveFile,
            45 => StatusCode::AccessDenied,
            48 => StatusCode::KeyTypeError,
            55 => StatusCode::AutoincrementError,
            59 => StatusCode::FileAlreadyExists,
            80 => StatusCode::FileInUse,
            90 => StatusCode::CommunicationsError,
            _ => StatusCode::Unknown,
        }
    }

    /// Get the raw status code value
    pub fn as_raw(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success status
    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Success)
    }

    /// Check if this marks the end of a traversal.
    ///
    /// Unlike Btrieve's looser convention, a missing key is not end of file.
    pub fn is_eof(&self) -> bool {
        matches!(self, StatusCode::EndOfFile)
    }

    fn describe(&self) -> &'static str {
        match self {
            StatusCode::Success => "Success",
            StatusCode::InvalidOperation => "Invalid operation",
            StatusCode::IoError => "I/O error",
            StatusCode::FileNotOpen => "File not open",
            StatusCode::KeyNotFound => "Key value not found",
            StatusCode::DuplicateKey => "Duplicate key value",
            StatusCode::InvalidKeyNumber => "Invalid key number",
            StatusCode::InvalidPositioning => "Invalid positioning",
            StatusCode::EndOfFile => "End of file",
            StatusCode::InvalidFileName => "Invalid file name",
            StatusCode::FileNotFound => "File not found",
            StatusCode::RecordManagerInactive => "Record manager inactive",
            StatusCode::KeyBufferTooShort => "Key buffer too short",
            StatusCode::DataBufferTooShort => "Data buffer too short",
            StatusCode::NumberOfKeysError => "Number of keys error",
            StatusCode::InvalidKeyPosition => "Invalid key position",
            StatusCode::InvalidRecordLength => "Invalid record length",
            StatusCode::InvalidKeyLength => "Invalid key length",
            StatusCode::NotBtrieveFile => "Not a store file",
            StatusCode::AccessDenied => "Access denied",
            StatusCode::KeyTypeError => "Key type error",
            StatusCode::AutoincrementError => "Autoincrement error",
            StatusCode::FileAlreadyExists => "File already exists",
            StatusCode::FileInUse => "File in use",
            StatusCode::CommunicationsError => "Communications error",
            StatusCode::Unknown => "Error",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_raw(), self.describe())
    }
}

/// Main error type for the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store status {0}")]
    Status(StatusCode),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Get the status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::Status(code) => *code,
            StoreError::Io(_) => StatusCode::IoError,
            StoreError::InvalidLocation(_) => StatusCode::InvalidFileName,
            StoreError::Config(_) => StatusCode::RecordManagerInactive,
            StoreError::Internal(_) => StatusCode::Unknown,
        }
    }
}

impl From<StatusCode> for StoreError {
    fn from(code: StatusCode) -> Self {
        StoreError::Status(code)
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
