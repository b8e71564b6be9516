//! Data types for the upload flow.

use serde::{Deserialize, Serialize};

use chunkload_transfer::DEFAULT_CHUNK_SIZE;

/// Phase of an upload run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Hashing,
    Verifying,
    Uploading,
    Merging,
    Done,
    Failed,
}

/// How an upload run ended successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server assembled the file.
    Merged {
        fingerprint: String,
        path: String,
        /// An earlier merge had already produced the file.
        already_merged: bool,
    },
    /// The file was already on the server; nothing was sent.
    AlreadyUploaded { fingerprint: String },
}

impl UploadOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            UploadOutcome::Merged { fingerprint, .. }
            | UploadOutcome::AlreadyUploaded { fingerprint } => fingerprint,
        }
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Entered a new phase.
    State(UploadState),
    /// A chunk was folded into the fingerprint.
    HashProgress {
        completed: u32,
        total: u32,
        percentage: f64,
    },
    /// A chunk upload was acknowledged.
    ChunkStored {
        index: u32,
        /// Chunks confirmed so far in this run.
        uploaded: u32,
        /// Chunks this run had to send.
        to_upload: u32,
        bytes_per_second: f64,
    },
    /// A chunk upload failed. Siblings keep going.
    ChunkFailed { index: u32, error: String },
    Done(UploadOutcome),
    Failed {
        fingerprint: Option<String>,
        error: String,
    },
}

/// Client upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum chunk uploads in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_concurrency() -> usize {
    4
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
        }
    }
}
