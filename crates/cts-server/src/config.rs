use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cts_protocol::{MAX_MISSING_QUERY, MAX_OBJECT_SIZE};

use crate::error::{ServerError, ServerResult};

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 7420;

/// Where hosted repositories keep their objects and references.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Everything lives in process memory and is lost on shutdown.
    Memory,
    /// `repos_root/<id>/{objects,refs,repository.json}`.
    #[default]
    Filesystem,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageBackend,
    pub repos_root: PathBuf,
    /// Largest object payload accepted by an upload.
    pub max_object_size: usize,
    /// Largest digest set accepted by one `missing` query.
    pub max_missing_query: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            storage: StorageBackend::default(),
            repos_root: PathBuf::from("repositories"),
            max_object_size: MAX_OBJECT_SIZE,
            max_missing_query: MAX_MISSING_QUERY,
        }
    }
}

impl ServerConfig {
    /// An in-memory configuration, handy for tests and throwaway servers.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageBackend::Memory,
            ..Self::default()
        }
    }

    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Absent keys take their default values.
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> ServerResult<()> {
        if self.max_object_size == 0 || self.max_object_size > MAX_OBJECT_SIZE {
            return Err(ServerError::Config(format!(
                "max_object_size must be between 1 and {MAX_OBJECT_SIZE}"
            )));
        }
        if self.max_missing_query == 0 {
            return Err(ServerError::Config("max_missing_query must be positive".into()));
        }
        Ok(())
    }
}
