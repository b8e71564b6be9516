use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum size of a JSON frame header (64 KiB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Maximum size of a frame body (256 MiB).
///
/// Bounds the largest chunk a server accepts in a single `store_chunk`.
pub const MAX_BODY_SIZE: u64 = 256 * 1024 * 1024;

/// Timeout for verify and merge requests.
///
/// Merge re-hashes the assembled file, so it is allowed well over the
/// typical round-trip.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for a single chunk upload.
pub const CHUNK_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Error code: malformed request (bad fingerprint, identity, chunk size).
pub const ERR_INVALID_ARGUMENT: i32 = 400;

/// Error code: no upload session exists for the fingerprint.
pub const ERR_SESSION_NOT_FOUND: i32 = 404;

/// Error code: merge requested before every chunk was stored.
pub const ERR_INCOMPLETE_UPLOAD: i32 = 409;

/// Error code: chunk checksum or merged fingerprint did not match.
pub const ERR_INTEGRITY: i32 = 422;

/// Error code: storage or merge failure on the server.
pub const ERR_INTERNAL: i32 = 500;

/// Envelope message type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "store_chunk")]
    StoreChunk,
    #[serde(rename = "merge")]
    Merge,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "verify_response")]
    VerifyResponse,
    #[serde(rename = "chunk_stored")]
    ChunkStored,
    #[serde(rename = "merge_response")]
    MergeResponse,
    #[serde(rename = "error")]
    Error,
}

impl MessageType {
    /// Returns the response type expected for a request type.
    pub fn response_type(self) -> Option<MessageType> {
        match self {
            MessageType::Ping => Some(MessageType::Pong),
            MessageType::Verify => Some(MessageType::VerifyResponse),
            MessageType::StoreChunk => Some(MessageType::ChunkStored),
            MessageType::Merge => Some(MessageType::MergeResponse),
            _ => None,
        }
    }
}
