use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use chunkload_protocol::messages::StoreChunkHeader;
use chunkload_transfer::chunk_count;

use crate::StoreError;

/// What a session expects, recorded when its first chunk arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub fingerprint: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
}

impl SessionManifest {
    /// Builds the manifest implied by a chunk header.
    pub fn from_header(header: &StoreChunkHeader) -> Result<Self, StoreError> {
        Ok(Self {
            fingerprint: header.file_hash.clone(),
            file_name: header.file_name.clone(),
            file_size: header.file_size,
            chunk_size: header.chunk_size,
            total_chunks: chunk_count(header.file_size, header.chunk_size)?,
            created_at: Utc::now(),
        })
    }

    /// Two manifests describe the same chunk layout.
    pub fn same_layout(&self, other: &SessionManifest) -> bool {
        self.fingerprint == other.fingerprint
            && self.file_size == other.file_size
            && self.chunk_size == other.chunk_size
    }

    /// Reads the manifest at `path`, or `None` if there is none.
    pub async fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Publishes this manifest at `path` unless one already exists, and
    /// returns whichever manifest is in place afterwards.
    ///
    /// The manifest is fully written to `scratch` first and then hard-linked
    /// into place, so a concurrent reader never sees a partial file and
    /// exactly one of several racing writers wins.
    pub async fn publish(&self, path: &Path, scratch: &Path) -> Result<Self, StoreError> {
        if let Some(existing) = Self::load(path).await? {
            return Ok(existing);
        }

        let data = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(scratch, &data).await?;
        let linked = tokio::fs::hard_link(scratch, path).await;
        let _ = tokio::fs::remove_file(scratch).await;

        match linked {
            Ok(()) => {
                debug!(
                    fingerprint = %self.fingerprint,
                    total_chunks = self.total_chunks,
                    chunk_size = self.chunk_size,
                    "session manifest created"
                );
                Ok(self.clone())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Self::load(path)
                .await?
                .ok_or_else(|| StoreError::SessionNotFound(self.fingerprint.clone())),
            Err(e) => Err(e.into()),
        }
    }
}
