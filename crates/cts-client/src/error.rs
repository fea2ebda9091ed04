use std::path::PathBuf;

use thiserror::Error;

use cts_graph::GraphError;
use cts_index::IndexError;
use cts_refs::RefError;
use cts_store::StoreError;
use cts_sync::SyncError;
use cts_types::TypeError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not a CTS workspace (or any parent directory): {0}")]
    NotInitialized(PathBuf),

    #[error("CTS workspace already exists at {0}")]
    AlreadyInitialized(PathBuf),

    #[error("no remote configured; set [remote] url and repository in .cts/config")]
    NoRemote,

    #[error("cannot switch to {branch}: {reason}")]
    UncommittedChanges { branch: String, reason: String },

    #[error("destination {0} already exists and is not empty")]
    DestinationNotEmpty(PathBuf),

    #[error("path {path} is outside the workspace")]
    OutsideWorkspace { path: PathBuf },

    #[error("invalid author identity: {0}")]
    Identity(#[from] TypeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
