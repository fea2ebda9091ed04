//! Wire types for CTS.
//!
//! Defines the HTTP paths, the JSON request/response bodies, the error body
//! every failure is reported with, and the binary framing used for object
//! payloads exchanged during push and pull.

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod message;

pub use codec::{ObjectTransfer, TransferCodec, OBJECT_CONTENT_TYPE};
pub use endpoint::{paths, routes, HealthResponse};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    CreateRepositoryRequest, ErrorBody, ErrorKind, MissingRequest, MissingResponse,
    RefEntry, RefListResponse, RepositoryInfo, UpdateRefRequest, UploadResponse,
    MAX_MISSING_QUERY, MAX_OBJECT_SIZE, PROTOCOL_VERSION,
};
