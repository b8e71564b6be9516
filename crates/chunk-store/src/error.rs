//! Chunk store error types.

use chunkload_protocol::constants::{
    ERR_INCOMPLETE_UPLOAD, ERR_INTEGRITY, ERR_INTERNAL, ERR_INVALID_ARGUMENT,
    ERR_SESSION_NOT_FOUND,
};
use chunkload_protocol::identity::IdentityError;
use chunkload_transfer::TransferError;

/// Errors produced by the chunk store and merge engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("session manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("checksum mismatch for chunk {index} of {fingerprint}")]
    ChecksumMismatch { fingerprint: String, index: u32 },

    #[error("no upload session for {0}")]
    SessionNotFound(String),

    #[error("incomplete upload for {fingerprint}: {stored} of {expected} chunks stored")]
    IncompleteUpload {
        fingerprint: String,
        expected: u32,
        stored: u32,
        missing: Vec<u32>,
    },

    #[error("merge failed for {fingerprint}{}: {source}", chunk_suffix(.index))]
    MergeFailed {
        fingerprint: String,
        index: Option<u32>,
        #[source]
        source: std::io::Error,
    },

    #[error("merged file hashes to {actual}, expected {expected}")]
    FingerprintMismatch { expected: String, actual: String },
}

fn chunk_suffix(index: &Option<u32>) -> String {
    index.map(|i| format!(" at chunk {i}")).unwrap_or_default()
}

impl StoreError {
    /// Envelope error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            StoreError::InvalidArgument(_) => ERR_INVALID_ARGUMENT,
            StoreError::SessionNotFound(_) => ERR_SESSION_NOT_FOUND,
            StoreError::IncompleteUpload { .. } => ERR_INCOMPLETE_UPLOAD,
            StoreError::ChecksumMismatch { .. } | StoreError::FingerprintMismatch { .. } => {
                ERR_INTEGRITY
            }
            StoreError::Storage(_) | StoreError::Manifest(_) | StoreError::MergeFailed { .. } => {
                ERR_INTERNAL
            }
        }
    }
}

impl From<IdentityError> for StoreError {
    fn from(e: IdentityError) -> Self {
        StoreError::InvalidArgument(e.to_string())
    }
}

impl From<TransferError> for StoreError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::InvalidArgument(msg) => StoreError::InvalidArgument(msg),
            TransferError::Io(e) => StoreError::Storage(e),
            TransferError::Read { source, .. } => StoreError::Storage(source),
            other => StoreError::Storage(std::io::Error::other(other.to_string())),
        }
    }
}
