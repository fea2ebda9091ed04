//! Local side of CTS.
//!
//! A [`Workspace`] is a directory tracked under `.cts/`. It stages file
//! content into a local object store, records commits on local branches,
//! reports status against the working directory, and pushes and pulls
//! branches against a CTS server.

pub mod config;
pub mod error;
pub mod workspace;
pub mod worktree;

pub use config::{ClientConfig, CommitConfig, RemoteConfig, SyncConfig, UserConfig};
pub use error::{ClientError, ClientResult};
pub use workspace::{BranchSwitch, LogEntry, Workspace, CTS_DIR, DEFAULT_BRANCH};
pub use worktree::WorktreeUpdate;

// Re-export the types callers need to read results.
pub use cts_index::{CommitPolicy, FileStatus, StatusEntry, WorkdirStatus};
pub use cts_sync::{PullOutcome, PullStatus, PushOutcome, PushStatus};
pub use cts_types::{Digest, RepositoryId};
