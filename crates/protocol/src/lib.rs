//! Wire types shared by the upload client and the chunk server.
//!
//! The three collaborator operations are `verify` (which chunks are already
//! stored, or is the file already merged), `store_chunk` and `merge`. Chunk
//! bytes, and any list that grows with the file, travel outside the JSON
//! envelope; see the upload channel crate for the framing.

pub mod constants;
pub mod envelope;
pub mod identity;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{BodyPayload, Message, RemoteError, ReplyError};
pub use identity::{ChunkIdentity, IdentityError, extract_extension, is_valid_fingerprint};
pub use messages::{
    MergeRequest, MergeResponse, StoreChunkAck, StoreChunkHeader, VerifyRequest, VerifyResponse,
};
