//! Client-side chunk handling: splitting a file into fixed-size chunks,
//! reading them lazily, and fingerprinting the whole file incrementally.

mod chunked;
mod chunker;
mod hasher;
mod progress;

pub use chunked::{ChunkReader, ChunkSource, checksum_bytes};
pub use chunker::{ChunkSpec, chunk_count, spec_for, split};
pub use hasher::{
    FingerprintTask, HashEvent, IncrementalHasher, fingerprint_bytes, fingerprint_chunks,
    fingerprint_file, spawn_fingerprint,
};
pub use progress::{SpeedCalculator, percentage};

/// Default chunk size: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read chunk {index}: {source}")]
    Read {
        index: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("hashing task failed: {0}")]
    Task(String),
}
