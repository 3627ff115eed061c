//! Process-wide engine initialization
//!
//! The engine must be initialized once, before any `StoreClient` is built.
//! Initialization reads `engine.toml` from a configuration directory,
//! writing a default file there first if none exists.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{StatusCode, StoreError, StoreResult};
use crate::local::OpenFileTable;
use crate::protocol::DEFAULT_PORT;

/// Name of the configuration file inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "engine.toml";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base directory for relative local locations
    pub data_dir: Option<PathBuf>,
    /// Port for remote locations that do not name one
    pub default_port: u16,
    /// Remote connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Flush local files after every write
    pub sync_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            data_dir: None,
            default_port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            sync_writes: true,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML configuration document
    pub fn from_toml(text: &str) -> StoreResult<Self> {
        toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load `engine.toml` from `dir`, creating it with defaults if absent
    pub fn load_or_create(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            info!("No {} in {}, writing defaults", CONFIG_FILE_NAME, dir.display());
            fs::create_dir_all(dir)?;
            fs::write(&path, Self::default().to_toml()?)?;
        }
        let text = fs::read_to_string(&path)?;
        Self::from_toml(&text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// State shared by every client in the process
pub struct EngineContext {
    /// Active configuration
    pub config: EngineConfig,
    /// Open local files
    pub files: Arc<OpenFileTable>,
}

lazy_static::lazy_static! {
    static ref ENGINE: RwLock<Option<Arc<EngineContext>>> = RwLock::new(None);
}

/// Initialize the engine from `config_dir/engine.toml`.
///
/// Idempotent: if the engine is already initialized the existing context is
/// returned and the directory is not read.
pub fn initialize(config_dir: &Path) -> StoreResult<Arc<EngineContext>> {
    if let Some(ctx) = ENGINE.read().as_ref() {
        return Ok(ctx.clone());
    }

    let mut slot = ENGINE.write();
    if let Some(ctx) = slot.as_ref() {
        return Ok(ctx.clone());
    }

    let config = EngineConfig::load_or_create(config_dir)?;
    Ok(install(&mut slot, config))
}

/// Initialize the engine with an explicit configuration.
///
/// The first initialization wins; later calls return the existing context.
pub fn initialize_with(config: EngineConfig) -> Arc<EngineContext> {
    let mut slot = ENGINE.write();
    if let Some(ctx) = slot.as_ref() {
        debug!("Engine already initialized");
        return ctx.clone();
    }
    install(&mut slot, config)
}

fn install(slot: &mut Option<Arc<EngineContext>>, config: EngineConfig) -> Arc<EngineContext> {
    info!(
        "Engine initialized (data_dir={:?}, default_port={}, sync_writes={})",
        config.data_dir, config.default_port, config.sync_writes
    );
    let ctx = Arc::new(EngineContext {
        config,
        files: Arc::new(OpenFileTable::new()),
    });
    *slot = Some(ctx.clone());
    ctx
}

/// Check whether the engine has been initialized
pub fn is_initialized() -> bool {
    ENGINE.read().is_some()
}

/// Get the engine context, failing if the engine is not initialized
pub fn context() -> StoreResult<Arc<EngineContext>> {
    ENGINE
        .read()
        .clone()
        .ok_or(StoreError::Status(StatusCode::RecordManagerInactive))
}
