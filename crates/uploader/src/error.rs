//! Upload error types.

use chunkload_transfer::TransferError;

/// Errors produced by an upload run.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hashing failed: {0}")]
    Hashing(#[source] TransferError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{} chunk(s) of {fingerprint} failed to upload: {indices:?}", .indices.len())]
    ChunksFailed {
        fingerprint: String,
        indices: Vec<u32>,
    },

    #[error("merge of {fingerprint} rejected: {reason}")]
    MergeRejected {
        fingerprint: String,
        reason: String,
        missing: Vec<u32>,
        failed_chunk: Option<u32>,
    },

    #[error("cancelled")]
    Cancelled,
}

impl From<TransferError> for UploadError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Cancelled => UploadError::Cancelled,
            TransferError::InvalidArgument(msg) => UploadError::InvalidArgument(msg),
            other => UploadError::Hashing(other),
        }
    }
}
