use serde::{Deserialize, Serialize};

/// Outcome taxonomy shared by every `ResourceStore` implementation.
///
/// `NotFound` and `AlreadyExists` are expected outcomes that callers normalize
/// to success; everything else is propagated with operation context.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Optimistic-lock violation; re-fetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Timeout, throttling or transport failure.
    #[error("transient: {0}")]
    Transient(String),
    #[error("rejected ({code}): {message}")]
    Rejected { code: u16, message: String },
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to decode {kind}: {source}")]
    Decode { kind: &'static str, #[source] source: serde_json::Error },
    #[error("failed to encode {kind}: {source}")]
    Encode { kind: &'static str, #[source] source: serde_json::Error },
}
