//! Error types for the upload channel.

use chunkload_protocol::{RemoteError, ReplyError};

/// Errors produced by the upload channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("cancelled")]
    Cancelled,
}

impl From<RemoteError> for ChannelError {
    fn from(e: RemoteError) -> Self {
        ChannelError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<ReplyError> for ChannelError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::Remote(remote) => remote.into(),
            ReplyError::Payload(e) => ChannelError::Json(e),
            other => ChannelError::Protocol(other.to_string()),
        }
    }
}
