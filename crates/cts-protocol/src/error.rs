use thiserror::Error;

/// Failures framing or unframing an object transfer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("object payload of {size} bytes exceeds the {max} byte limit")]
    ObjectTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("unsupported frame version {found} (this build speaks {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("cannot encode transfer: {0}")]
    Encode(String),

    #[error("cannot decode transfer: {0}")]
    Decode(String),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
