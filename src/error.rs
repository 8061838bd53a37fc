// src/error.rs
//! Error taxonomy for the trust engine.
//!
//! `NotFound`, `Expired`, `Revoked` and `InvalidSignature` are expected business
//! outcomes: the access gateway turns them into denials. `Timeout`,
//! `ExternalProcessFailure` and `StorageFailure` are operation-fatal for the
//! issuing/proving caller.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TrustError>;

#[derive(Error, Debug)]
pub enum TrustError {
    /// A DID, credential, proof, policy or circuit source is absent
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("credential {0} has expired")]
    Expired(String),

    #[error("{0} has been revoked")]
    Revoked(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// An external call exceeded its configured bound
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: String, secs: u64 },

    /// The proving backend exited with a non-zero status
    #[error("{stage} failed with exit code {code:?}: {stderr}")]
    ExternalProcessFailure {
        stage: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("storage failure: {0}")]
    StorageFailure(String),

    /// Inputs that cannot be mapped into the backend's representation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The shared worker pool queue is full
    #[error("worker pool saturated ({queued} jobs queued)")]
    Backpressure { queued: usize },

    /// A pooled task panicked or was aborted
    #[error("worker task failed: {0}")]
    WorkerFailure(String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TrustError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        TrustError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether this error is an expected verification outcome rather than a fault.
    pub fn is_business_outcome(&self) -> bool {
        matches!(
            self,
            TrustError::NotFound { .. }
                | TrustError::Expired(_)
                | TrustError::Revoked(_)
                | TrustError::InvalidSignature(_)
        )
    }
}

impl From<std::io::Error> for TrustError {
    fn from(err: std::io::Error) -> Self {
        TrustError::StorageFailure(err.to_string())
    }
}
