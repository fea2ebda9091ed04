//! Request handlers, one per endpoint.
//!
//! Bodies are parsed by hand rather than with axum's extractors so that
//! malformed input is answered with the same JSON error body as every
//! other failure.

use std::collections::BTreeSet;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use cts_protocol::{
    CreateRepositoryRequest, HealthResponse, MissingRequest, MissingResponse, RefEntry,
    RefListResponse, RepositoryInfo, TransferCodec, UpdateRefRequest, UploadResponse,
    OBJECT_CONTENT_TYPE,
};
use cts_refs::{RefError, RefName};
use cts_types::{Digest, RepositoryId};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

pub async fn list_repositories(
    State(state): State<AppState>,
) -> ServerResult<Json<Vec<RepositoryInfo>>> {
    Ok(Json(state.registry.list()?))
}

/// An empty body creates an unnamed repository.
pub async fn create_repository(
    State(state): State<AppState>,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<RepositoryInfo>)> {
    let request: CreateRepositoryRequest = if body.is_empty() {
        CreateRepositoryRequest::default()
    } else {
        parse_json(&body)?
    };
    let repo = state.registry.create(request.name)?;
    Ok((StatusCode::CREATED, Json(repo.info().clone())))
}

pub async fn get_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<RepositoryInfo>> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    Ok(Json(repo.info().clone()))
}

pub async fn delete_repository(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    state.registry.delete(&parse_id(&id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

pub async fn list_refs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<RefListResponse>> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let refs = repo
        .list_refs()?
        .into_iter()
        .map(|(name, target)| RefEntry {
            name: name.to_string(),
            target,
        })
        .collect();
    Ok(Json(RefListResponse { refs }))
}

pub async fn get_ref(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ServerResult<Json<RefEntry>> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let name = RefName::parse_or_branch(&name)?;
    match repo.head(&name)? {
        Some(target) => Ok(Json(RefEntry {
            name: name.to_string(),
            target,
        })),
        None => Err(RefError::ReferenceNotFound {
            name: name.to_string(),
        }
        .into()),
    }
}

/// Compare-and-set a reference. A lost race answers 409 with the value the
/// reference holds now.
pub async fn update_ref(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    body: Bytes,
) -> ServerResult<Json<RefEntry>> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let name = RefName::parse_or_branch(&name)?;
    let request: UpdateRefRequest = parse_json(&body)?;
    let target = name.clone();
    blocking(move || Ok(repo.update_ref(&target, request.expected, request.new)?)).await?;
    Ok(Json(RefEntry {
        name: name.to_string(),
        target: request.new,
    }))
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

pub async fn missing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ServerResult<Json<MissingResponse>> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let request: MissingRequest = parse_json(&body)?;
    if request.digests.len() > state.max_missing_query {
        return Err(ServerError::InvalidRequest(format!(
            "missing query of {} digests exceeds limit of {}",
            request.digests.len(),
            state.max_missing_query
        )));
    }
    let candidates: BTreeSet<Digest> = request.digests.into_iter().collect();
    let missing = repo.missing(&candidates)?;
    Ok(Json(MissingResponse {
        missing: missing.into_iter().collect(),
    }))
}

pub async fn upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<UploadResponse>)> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let transfer = TransferCodec::decode_body(&body)?;
    if transfer.data.len() > state.max_object_size {
        return Err(ServerError::InvalidRequest(format!(
            "object {} is {} bytes, limit is {}",
            transfer.digest,
            transfer.data.len(),
            state.max_object_size
        )));
    }
    let digest = transfer.digest;
    let kind = blocking(move || Ok(repo.receive(&transfer)?)).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { digest, kind })))
}

pub async fn download(
    State(state): State<AppState>,
    Path((id, digest)): Path<(String, String)>,
) -> ServerResult<Response> {
    let repo = state.registry.get(&parse_id(&id)?)?;
    let digest: Digest = digest
        .parse()
        .map_err(|e| ServerError::InvalidRequest(format!("invalid digest {digest:?}: {e}")))?;
    let id = repo.id();
    let transfer = blocking(move || Ok(repo.send(&digest)?)).await?;
    let body = TransferCodec::encode(&transfer)?;
    debug!(
        repo = %id,
        digest = %digest.short_hex(),
        kind = %transfer.kind,
        "object sent"
    );
    Ok(([(header::CONTENT_TYPE, OBJECT_CONTENT_TYPE)], body).into_response())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Run store and reference I/O on the blocking pool.
async fn blocking<T, F>(work: F) -> ServerResult<T>
where
    F: FnOnce() -> ServerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ServerError::Internal(format!("blocking task failed: {e}")))?
}

fn parse_id(raw: &str) -> ServerResult<RepositoryId> {
    RepositoryId::parse(raw)
        .map_err(|e| ServerError::InvalidRequest(format!("invalid repository id: {e}")))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> ServerResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ServerError::InvalidRequest(format!("malformed request body: {e}")))
}
