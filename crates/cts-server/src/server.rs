use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::registry::RepositoryRegistry;
use crate::router::build_router;
use crate::state::AppState;

/// CTS repository server.
pub struct CtsServer {
    config: ServerConfig,
    state: AppState,
}

impl CtsServer {
    /// Open the configured storage and prepare to serve it.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let registry = Arc::new(RepositoryRegistry::open(&config)?);
        let state = AppState::new(registry, &config);
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &RepositoryRegistry {
        &self.state.registry
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Bind the configured address and serve until the process ends.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve_on(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    pub async fn serve_on(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ServerResult<()> {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, storage = ?self.config.storage, "CTS server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
