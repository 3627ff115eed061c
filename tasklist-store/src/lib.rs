//! Tasklist Store - Btrieve-style record store
//!
//! This crate provides the store the task table is kept in: fixed-length
//! record tables with single-segment keys, reachable either as local files
//! or through a store server over TCP.

pub mod client;
pub mod engine;
pub mod error;
pub mod key;
pub mod local;
pub mod location;
pub mod protocol;
pub mod remote;
pub mod server;

pub use client::{Client, CreateMode, FileAttributes, ObjectHandle, OpenMode, StoreClient};
pub use engine::{EngineConfig, EngineContext};
pub use error::{StatusCode, StoreError, StoreResult};
pub use key::{Index, KeyFlags, KeySegment, KeyType, LockMode};
pub use location::Location;
pub use server::Server;
