//! HTTP transport to a CTS server.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, Response};
use tracing::debug;

use cts_protocol::{
    paths, CreateRepositoryRequest, ErrorBody, ErrorKind, MissingRequest, MissingResponse,
    ObjectTransfer, RefEntry, RepositoryInfo, TransferCodec, UpdateRefRequest, UploadResponse,
    MAX_MISSING_QUERY, OBJECT_CONTENT_TYPE,
};
use cts_refs::{RefError, RefName};
use cts_store::StoreError;
use cts_types::{Digest, RepositoryId};

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`RemoteTransport`] speaking the CTS HTTP API for one repository.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http: HttpClient,
    base_url: String,
    repo: RepositoryId,
}

impl HttpTransport {
    pub fn new(base_url: &str, repo: RepositoryId) -> SyncResult<Self> {
        Self::with_timeout(base_url, repo, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, repo: RepositoryId, timeout: Duration) -> SyncResult<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            repo,
        })
    }

    pub fn repository(&self) -> RepositoryId {
        self.repo
    }

    /// Ask the server at `base_url` to create a repository.
    pub async fn create_repository(
        base_url: &str,
        name: Option<String>,
    ) -> SyncResult<RepositoryInfo> {
        let http = build_client(DEFAULT_TIMEOUT)?;
        let url = format!("{}{}", base_url.trim_end_matches('/'), cts_protocol::routes::REPOSITORIES);
        let response = http
            .post(url)
            .json(&CreateRepositoryRequest { name })
            .send()
            .await
            .map_err(network)?;
        let response = check(response, None).await?;
        response.json().await.map_err(network)
    }

    /// Repository metadata.
    pub async fn info(&self) -> SyncResult<RepositoryInfo> {
        let response = self
            .http
            .get(self.url(&paths::repository(self.repo)))
            .send()
            .await
            .map_err(network)?;
        let response = check(response, None).await?;
        response.json().await.map_err(network)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn build_client(timeout: Duration) -> SyncResult<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| SyncError::NetworkFailure(format!("failed to create HTTP client: {e}")))
}

fn network(err: reqwest::Error) -> SyncError {
    SyncError::NetworkFailure(err.to_string())
}

/// Pass a successful response through; turn anything else into the
/// matching error. `cas` names the attempted update, for conflict errors.
async fn check(
    response: Response,
    cas: Option<(&RefName, Option<Digest>)>,
) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_server_error() {
        return Err(SyncError::NetworkFailure(format!("server returned {status}")));
    }
    let body: ErrorBody = match response.json().await {
        Ok(body) => body,
        Err(_) => {
            return Err(SyncError::Remote {
                kind: ErrorKind::InvalidRequest,
                message: format!("unexpected {status} response"),
                digest: None,
                reference: None,
            })
        }
    };
    Err(from_error_body(body, cas))
}

fn from_error_body(body: ErrorBody, cas: Option<(&RefName, Option<Digest>)>) -> SyncError {
    let reference = body.reference.clone().unwrap_or_default();
    match (body.kind, body.digest) {
        (ErrorKind::ObjectNotFound, Some(digest)) => StoreError::ObjectNotFound(digest).into(),
        (ErrorKind::CorruptObject, Some(digest)) => StoreError::CorruptObject {
            digest,
            reason: body.message,
        }
        .into(),
        (ErrorKind::HashMismatch, Some(expected)) => match body.current {
            Some(actual) => StoreError::HashMismatch { expected, actual }.into(),
            None => SyncError::Remote {
                kind: body.kind,
                message: body.message,
                digest: Some(expected),
                reference: body.reference,
            },
        },
        (ErrorKind::RepositoryNotFound, _) => SyncError::RepositoryNotFound(body.message),
        (ErrorKind::ReferenceNotFound, _) => RefError::ReferenceNotFound { name: reference }.into(),
        (ErrorKind::TagImmutable, _) => RefError::TagImmutable { name: reference }.into(),
        (ErrorKind::Conflict, _) => match cas {
            Some((name, expected)) => RefError::Conflict {
                name: name.to_string(),
                expected,
                actual: body.current,
            }
            .into(),
            None => SyncError::Remote {
                kind: body.kind,
                message: body.message,
                digest: body.current,
                reference: body.reference,
            },
        },
        (kind, digest) => SyncError::Remote {
            kind,
            message: body.message,
            digest,
            reference: body.reference,
        },
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn head(&self, name: &RefName) -> SyncResult<Option<Digest>> {
        let response = self
            .http
            .get(self.url(&paths::reference(self.repo, name)))
            .send()
            .await
            .map_err(network)?;
        match check(response, None).await {
            Ok(response) => {
                let entry: RefEntry = response.json().await.map_err(network)?;
                Ok(Some(entry.target))
            }
            Err(SyncError::Ref(RefError::ReferenceNotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn missing(&self, candidates: &BTreeSet<Digest>) -> SyncResult<BTreeSet<Digest>> {
        let all: Vec<Digest> = candidates.iter().copied().collect();
        let mut missing = BTreeSet::new();
        for chunk in all.chunks(MAX_MISSING_QUERY) {
            let response = self
                .http
                .post(self.url(&paths::missing(self.repo)))
                .json(&MissingRequest {
                    digests: chunk.to_vec(),
                })
                .send()
                .await
                .map_err(network)?;
            let body: MissingResponse = check(response, None)
                .await?
                .json()
                .await
                .map_err(network)?;
            missing.extend(body.missing);
        }
        debug!(
            candidates = candidates.len(),
            missing = missing.len(),
            "remote missing query"
        );
        Ok(missing)
    }

    async fn upload(&self, transfer: &ObjectTransfer) -> SyncResult<()> {
        let body = TransferCodec::encode(transfer)?;
        let response = self
            .http
            .post(self.url(&paths::objects(self.repo)))
            .header(CONTENT_TYPE, OBJECT_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(network)?;
        let ack: UploadResponse = check(response, None)
            .await?
            .json()
            .await
            .map_err(network)?;
        if ack.digest != transfer.digest {
            return Err(StoreError::HashMismatch {
                expected: transfer.digest,
                actual: ack.digest,
            }
            .into());
        }
        Ok(())
    }

    async fn download(&self, digest: &Digest) -> SyncResult<ObjectTransfer> {
        let response = self
            .http
            .get(self.url(&paths::object(self.repo, digest)))
            .send()
            .await
            .map_err(network)?;
        let bytes = check(response, None)
            .await?
            .bytes()
            .await
            .map_err(network)?;
        let transfer = TransferCodec::decode_body(&bytes)?;
        if transfer.digest != *digest {
            return Err(StoreError::HashMismatch {
                expected: *digest,
                actual: transfer.digest,
            }
            .into());
        }
        Ok(transfer)
    }

    async fn compare_and_set(
        &self,
        name: &RefName,
        expected: Option<Digest>,
        new: Digest,
    ) -> SyncResult<()> {
        let response = self
            .http
            .post(self.url(&paths::reference(self.repo, name)))
            .json(&UpdateRefRequest { expected, new })
            .send()
            .await
            .map_err(network)?;
        check(response, Some((name, expected))).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_ref() -> RefName {
        RefName::branch("main").unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = HttpTransport::new("http://localhost:7420/", RepositoryId::nil()).unwrap();
        assert_eq!(
            t.url(&paths::refs(t.repository())),
            format!("http://localhost:7420/repositories/{}/refs", RepositoryId::nil())
        );
    }

    #[test]
    fn conflict_body_becomes_ref_conflict() {
        let current = Digest::of(b"c2");
        let expected = Some(Digest::of(b"c1"));
        let body = ErrorBody::new(ErrorKind::Conflict, "stale")
            .with_reference("refs/heads/main")
            .with_current(Some(current));
        let main = main_ref();
        match from_error_body(body, Some((&main, expected))) {
            SyncError::Ref(RefError::Conflict {
                name,
                expected: e,
                actual,
            }) => {
                assert_eq!(name, "refs/heads/main");
                assert_eq!(e, expected);
                assert_eq!(actual, Some(current));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejected_reference_name_is_final() {
        let body = ErrorBody::new(
            ErrorKind::InvalidRequest,
            "reference refs/heads/foo/bar collides with existing refs/heads/foo",
        )
        .with_reference("refs/heads/foo/bar");
        let name = RefName::branch("foo/bar").unwrap();
        let err = from_error_body(body, Some((&name, None)));
        assert!(!err.is_retryable());
        match err {
            SyncError::Remote { kind, reference, .. } => {
                assert_eq!(kind, ErrorKind::InvalidRequest);
                assert_eq!(reference.as_deref(), Some("refs/heads/foo/bar"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn object_not_found_keeps_digest() {
        let d = Digest::of(b"gone");
        let body = ErrorBody::new(ErrorKind::ObjectNotFound, "no such object").with_digest(d);
        assert!(matches!(
            from_error_body(body, None),
            SyncError::Store(StoreError::ObjectNotFound(x)) if x == d
        ));
    }

    #[test]
    fn reference_not_found_keeps_name() {
        let body = ErrorBody::new(ErrorKind::ReferenceNotFound, "unborn")
            .with_reference("refs/heads/dev");
        assert!(matches!(
            from_error_body(body, None),
            SyncError::Ref(RefError::ReferenceNotFound { name }) if name == "refs/heads/dev"
        ));
    }

    #[test]
    fn unknown_kinds_stay_remote() {
        let body = ErrorBody::new(ErrorKind::InvalidRequest, "bad digest");
        assert!(matches!(
            from_error_body(body, None),
            SyncError::Remote {
                kind: ErrorKind::InvalidRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_failure() {
        // Port 9 (discard) on localhost is closed in test environments.
        let t = HttpTransport::with_timeout(
            "http://127.0.0.1:9",
            RepositoryId::nil(),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = t.head(&main_ref()).await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }
}
