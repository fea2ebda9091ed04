use thiserror::Error;

use cts_graph::GraphError;
use cts_protocol::{ErrorKind, ProtocolError};
use cts_refs::RefError;
use cts_store::StoreError;
use cts_types::Digest;

fn show(digest: &Option<Digest>) -> String {
    digest.map_or_else(|| "<none>".to_string(), |d| d.short_hex())
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// The update would discard commits on one side: neither head descends
    /// from the other.
    #[error(
        "non-fast-forward update of {name}: local {} and remote {} have diverged",
        .local.short_hex(),
        show(.remote)
    )]
    NonFastForward {
        name: String,
        local: Digest,
        remote: Option<Digest>,
    },

    /// Every reference update attempt lost a race with other writers.
    #[error("gave up updating {name} after {attempts} contended attempts")]
    Contended { name: String, attempts: u32 },

    /// Transport-level failure; safe to retry.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The remote refused a request for a reason not covered above.
    #[error("remote rejected request ({kind:?}): {message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        digest: Option<Digest>,
        reference: Option<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SyncError {
    /// Whether an idempotent step that failed this way may be re-sent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_retryable() {
        assert!(SyncError::NetworkFailure("reset".into()).is_retryable());
        assert!(!SyncError::RepositoryNotFound("x".into()).is_retryable());
        assert!(!SyncError::Store(StoreError::ObjectNotFound(Digest::of(b"x"))).is_retryable());
    }

    #[test]
    fn non_fast_forward_names_both_heads() {
        let local = Digest::of(b"local");
        let err = SyncError::NonFastForward {
            name: "refs/heads/main".into(),
            local,
            remote: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("refs/heads/main"));
        assert!(msg.contains(&local.short_hex()));
        assert!(msg.contains("<none>"));
    }
}
