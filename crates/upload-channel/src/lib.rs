//! TCP request channel for chunked uploads.
//!
//! Every request and response is one frame: a JSON [`Message`] envelope
//! followed by an optional raw body. `store_chunk` requests carry the chunk
//! bytes there, so chunk data never passes through the JSON header. Verify
//! and merge replies put their identity and index lists there, so the
//! header stays small however many chunks a file has.
//!
//! # Wire format
//!
//! See [`wire`] module for the frame layout.
//!
//! [`Message`]: chunkload_protocol::Message

pub mod client;
pub mod error;
pub mod server;
pub mod wire;

pub use client::UploadClient;
pub use error::ChannelError;
pub use server::UploadServer;
pub use wire::Frame;

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connections a client keeps for reuse.
pub const MAX_IDLE_CONNECTIONS: usize = 16;
