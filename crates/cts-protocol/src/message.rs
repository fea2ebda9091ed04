//! JSON request and response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cts_store::ObjectKind;
use cts_types::{Digest, RepositoryId};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest object payload either side will frame or accept.
pub const MAX_OBJECT_SIZE: usize = 64 * 1024 * 1024;

/// Largest digest set accepted by a single `missing` query.
pub const MAX_MISSING_QUERY: usize = 100_000;

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRepositoryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Metadata of a hosted repository.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub id: RepositoryId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RepositoryInfo {
    pub fn new(id: RepositoryId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// A reference and the commit it points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefEntry {
    pub name: String,
    pub target: Digest,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefListResponse {
    pub refs: Vec<RefEntry>,
}

/// Body of a compare-and-set on a reference.
///
/// `expected = None` creates the reference and fails if it already exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRefRequest {
    pub expected: Option<Digest>,
    pub new: Digest,
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRequest {
    pub digests: Vec<Digest>,
}

/// The subset of a [`MissingRequest`] the server does not hold, sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingResponse {
    pub missing: Vec<Digest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub digest: Digest,
    pub kind: ObjectKind,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Machine-readable failure category carried by every error response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CorruptObject,
    HashMismatch,
    ObjectNotFound,
    RepositoryNotFound,
    ReferenceNotFound,
    /// A reference compare-and-set lost; `current` holds the actual value.
    Conflict,
    TagImmutable,
    InvalidRequest,
    Internal,
}

impl ErrorKind {
    /// The HTTP status a server answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ObjectNotFound | Self::RepositoryNotFound | Self::ReferenceNotFound => 404,
            Self::Conflict | Self::TagImmutable => 409,
            Self::CorruptObject | Self::HashMismatch => 422,
            Self::InvalidRequest => 400,
            Self::Internal => 500,
        }
    }
}

/// JSON body of every non-2xx response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Digest>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            digest: None,
            reference: None,
            current: None,
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_current(mut self, current: Option<Digest>) -> Self {
        self.current = current;
        self
    }
}
