//! HTTP server for CTS.
//!
//! Hosts any number of repositories and exposes the operations a client
//! needs to synchronize with them: reference reads and compare-and-set
//! updates, the `missing` negotiation query, and verified object upload
//! and download.

pub mod config;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;

pub use config::{ServerConfig, StorageBackend, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use registry::RepositoryRegistry;
pub use server::CtsServer;
pub use state::AppState;
