//! Synchronization for CTS.
//!
//! Push and pull of branch history between a local repository and a
//! remote, transferring only the objects the other side is missing.
//!
//! # Architecture
//!
//! - [`SyncEngine`] drives push and pull against any [`RemoteTransport`].
//! - [`HostedRepository`] is the remote side: verified object ingest and
//!   guarded reference updates. The server wraps one per repository.
//! - [`HttpTransport`] talks to a CTS server; [`LocalTransport`] talks to a
//!   [`HostedRepository`] in the same process.
//! - [`RetryPolicy`] re-sends idempotent calls after network failures.

pub mod engine;
pub mod error;
pub mod hosted;
pub mod http;
pub mod local;
pub mod retry;
pub mod transport;

pub use engine::{PullOutcome, PullStatus, PushOutcome, PushStatus, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use hosted::HostedRepository;
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use retry::RetryPolicy;
pub use transport::RemoteTransport;
