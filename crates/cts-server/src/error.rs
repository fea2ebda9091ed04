use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;
use tracing::{debug, error};

use cts_protocol::{ErrorBody, ErrorKind, ProtocolError};
use cts_refs::RefError;
use cts_store::StoreError;
use cts_sync::SyncError;
use cts_types::RepositoryId;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn repository_not_found(id: &RepositoryId) -> Self {
        Self::RepositoryNotFound(id.to_string())
    }

    /// The response body describing this error to a client.
    pub fn to_body(&self) -> ErrorBody {
        let message = self.to_string();
        match self {
            Self::RepositoryNotFound(_) => ErrorBody::new(ErrorKind::RepositoryNotFound, message),
            Self::InvalidRequest(_) | Self::Protocol(_) => {
                ErrorBody::new(ErrorKind::InvalidRequest, message)
            }
            Self::Store(e) => store_body(e, message),
            Self::Ref(e) => ref_body(e, message),
            Self::Sync(e) => match e {
                SyncError::Store(e) => store_body(e, message),
                SyncError::Ref(e) => ref_body(e, message),
                SyncError::Protocol(_) => ErrorBody::new(ErrorKind::InvalidRequest, message),
                SyncError::RepositoryNotFound(_) => {
                    ErrorBody::new(ErrorKind::RepositoryNotFound, message)
                }
                SyncError::Remote {
                    kind,
                    digest,
                    reference,
                    ..
                } => ErrorBody {
                    kind: *kind,
                    message,
                    digest: *digest,
                    reference: reference.clone(),
                    current: None,
                },
                SyncError::NonFastForward { name, remote, .. } => {
                    ErrorBody::new(ErrorKind::Conflict, message)
                        .with_reference(name.clone())
                        .with_current(*remote)
                }
                SyncError::Contended { name, .. } => {
                    ErrorBody::new(ErrorKind::Conflict, message).with_reference(name.clone())
                }
                SyncError::Graph(_) | SyncError::NetworkFailure(_) => {
                    ErrorBody::new(ErrorKind::Internal, message)
                }
            },
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => {
                ErrorBody::new(ErrorKind::Internal, message)
            }
        }
    }
}

fn store_body(err: &StoreError, message: String) -> ErrorBody {
    match err {
        StoreError::ObjectNotFound(d) => {
            ErrorBody::new(ErrorKind::ObjectNotFound, message).with_digest(*d)
        }
        // `current` carries what the content actually hashes to.
        StoreError::HashMismatch { expected, actual } => {
            ErrorBody::new(ErrorKind::HashMismatch, message)
                .with_digest(*expected)
                .with_current(Some(*actual))
        }
        StoreError::CorruptObject { digest, .. } => {
            ErrorBody::new(ErrorKind::CorruptObject, message).with_digest(*digest)
        }
        StoreError::InvalidEntry { .. } => ErrorBody::new(ErrorKind::InvalidRequest, message),
        StoreError::Io(_) => ErrorBody::new(ErrorKind::Internal, message),
    }
}

fn ref_body(err: &RefError, message: String) -> ErrorBody {
    match err {
        RefError::ReferenceNotFound { name } => {
            ErrorBody::new(ErrorKind::ReferenceNotFound, message).with_reference(name.clone())
        }
        RefError::Conflict { name, actual, .. } => ErrorBody::new(ErrorKind::Conflict, message)
            .with_reference(name.clone())
            .with_current(*actual),
        RefError::InvalidName { name, .. } | RefError::NameCollision { name, .. } => {
            ErrorBody::new(ErrorKind::InvalidRequest, message).with_reference(name.clone())
        }
        RefError::TagImmutable { name } => {
            ErrorBody::new(ErrorKind::TagImmutable, message).with_reference(name.clone())
        }
        RefError::Corrupt { name, .. } => {
            ErrorBody::new(ErrorKind::Internal, message).with_reference(name.clone())
        }
        RefError::Storage(_) | RefError::Io(_) => ErrorBody::new(ErrorKind::Internal, message),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = self.to_body();
        let status = StatusCode::from_u16(body.kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(kind = ?body.kind, error = %self, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
