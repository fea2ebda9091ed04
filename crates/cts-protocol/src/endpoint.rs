//! HTTP endpoint paths.

use std::fmt::Display;

use crate::message::PROTOCOL_VERSION;

/// Route patterns as registered on the server router.
pub mod routes {
    pub const HEALTH: &str = "/health";
    pub const REPOSITORIES: &str = "/repositories";
    pub const REPOSITORY: &str = "/repositories/:id";
    pub const REFS: &str = "/repositories/:id/refs";
    pub const REF: &str = "/repositories/:id/refs/*name";
    pub const MISSING: &str = "/repositories/:id/missing";
    pub const OBJECTS: &str = "/repositories/:id/objects";
    pub const OBJECT: &str = "/repositories/:id/objects/:digest";
}

/// Concrete request paths, for clients.
pub mod paths {
    use super::Display;

    pub fn repository(id: impl Display) -> String {
        format!("/repositories/{id}")
    }

    pub fn refs(id: impl Display) -> String {
        format!("/repositories/{id}/refs")
    }

    /// `name` is a full reference name such as `refs/heads/main`.
    pub fn reference(id: impl Display, name: impl Display) -> String {
        format!("/repositories/{id}/refs/{name}")
    }

    pub fn missing(id: impl Display) -> String {
        format!("/repositories/{id}/missing")
    }

    pub fn objects(id: impl Display) -> String {
        format!("/repositories/{id}/objects")
    }

    pub fn object(id: impl Display, digest: impl Display) -> String {
        format!("/repositories/{id}/objects/{digest}")
    }
}

/// Health check response.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
