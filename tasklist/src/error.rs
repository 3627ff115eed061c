//! Error type for the task table

use tasklist_store::{StatusCode, StoreError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("cannot decode record: {0}")]
    Decode(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no task with id {0}")]
    NotFound(u32),

    #[error("no more records")]
    EndOfSequence,

    #[error("record already has id {0}; new records must have id 0")]
    IdAlreadyAssigned(u32),
}

impl TaskError {
    /// Store status behind this error, if it came from the store
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            TaskError::Store(e) => Some(e.status_code()),
            TaskError::NotFound(_) => Some(StatusCode::KeyNotFound),
            _ => None,
        }
    }
}

impl From<StatusCode> for TaskError {
    fn from(code: StatusCode) -> Self {
        TaskError::Store(StoreError::Status(code))
    }
}

pub type TaskResult<T> = Result<T, TaskError>;
