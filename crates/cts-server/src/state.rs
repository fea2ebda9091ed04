use std::sync::Arc;

use crate::config::ServerConfig;
use crate::registry::RepositoryRegistry;

/// Shared state handed to every request handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub registry: Arc<RepositoryRegistry>,
    pub max_object_size: usize,
    pub max_missing_query: usize,
}

impl AppState {
    pub fn new(registry: Arc<RepositoryRegistry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            max_object_size: config.max_object_size,
            max_missing_query: config.max_missing_query,
        }
    }

    /// A memory-backed state with default limits.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(RepositoryRegistry::in_memory()),
            &ServerConfig::in_memory(),
        )
    }
}
