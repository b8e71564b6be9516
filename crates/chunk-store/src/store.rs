use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use chunkload_protocol::identity::{ChunkIdentity, extract_extension};
use chunkload_protocol::messages::{StoreChunkAck, StoreChunkHeader, VerifyResponse};
use chunkload_transfer::{checksum_bytes, chunk_count, spec_for};

use crate::layout::{MANIFEST_FILE_NAME, PARTIAL_SUFFIX, StoreLayout};
use crate::locks::FingerprintLocks;
use crate::manifest::SessionManifest;
use crate::validation::{validate_extension, validate_fingerprint};
use crate::{StoreConfig, StoreError};

/// Per-fingerprint chunk namespaces on the local filesystem.
///
/// Chunk blobs are written to a scratch file and renamed into place, so a
/// re-upload of the same chunk replaces the blob atomically and a reader
/// never sees a partially written chunk.
pub struct ChunkStore {
    layout: StoreLayout,
    locks: Arc<FingerprintLocks>,
    max_chunks: u32,
}

impl ChunkStore {
    /// Opens (and creates if needed) the storage root.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.root).await?;
        info!(root = %config.root.display(), "chunk store opened");
        Ok(Self {
            layout: StoreLayout::new(config.root.clone()),
            locks: Arc::new(FingerprintLocks::default()),
            max_chunks: config.max_chunks,
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub(crate) fn locks(&self) -> &FingerprintLocks {
        &self.locks
    }

    /// Returns `true` if the merged output for `fingerprint` is present.
    pub async fn exists(&self, fingerprint: &str, extension: &str) -> Result<bool, StoreError> {
        validate_fingerprint(fingerprint)?;
        validate_extension(extension)?;
        let path = self.layout.output_path(fingerprint, extension);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Stored chunk identities for `fingerprint`; empty if no session exists.
    pub async fn list_chunks(&self, fingerprint: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .list_identities(fingerprint)
            .await?
            .into_iter()
            .map(|id| id.to_string())
            .collect())
    }

    /// Stored chunk identities, sorted by index.
    pub async fn list_identities(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<ChunkIdentity>, StoreError> {
        validate_fingerprint(fingerprint)?;
        let dir = self.layout.namespace_dir(fingerprint);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == MANIFEST_FILE_NAME {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match ChunkIdentity::parse(&name) {
                Ok(id) if id.fingerprint() == fingerprint => ids.push(id),
                _ => debug!(%fingerprint, entry = %name, "ignoring foreign entry in namespace"),
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Reads the session manifest for `fingerprint`, if a session exists.
    pub async fn load_manifest(
        &self,
        fingerprint: &str,
    ) -> Result<Option<SessionManifest>, StoreError> {
        validate_fingerprint(fingerprint)?;
        SessionManifest::load(&self.layout.manifest_path(fingerprint)).await
    }

    /// Answers the `verify` collaborator call.
    pub async fn verify(
        &self,
        fingerprint: &str,
        file_name: &str,
    ) -> Result<VerifyResponse, StoreError> {
        if self.exists(fingerprint, extract_extension(file_name)).await? {
            return Ok(VerifyResponse {
                should_upload: false,
                uploaded_list: Vec::new(),
            });
        }
        Ok(VerifyResponse {
            should_upload: true,
            uploaded_list: self.list_chunks(fingerprint).await?.into_iter().collect(),
        })
    }

    /// Stores one chunk, replacing any earlier copy of the same index.
    ///
    /// The first chunk of a file creates its namespace and session manifest.
    /// If the merged output already exists the chunk is discarded and the ack
    /// reports `stored: false`.
    pub async fn put_chunk(
        &self,
        header: &StoreChunkHeader,
        data: &[u8],
    ) -> Result<StoreChunkAck, StoreError> {
        let fingerprint = header.file_hash.as_str();
        validate_fingerprint(fingerprint)?;
        let extension = extract_extension(&header.file_name);
        validate_extension(extension)?;

        let identity = ChunkIdentity::new(fingerprint, header.chunk_index)?;
        let total = chunk_count(header.file_size, header.chunk_size)?;
        if total > self.max_chunks {
            return Err(StoreError::InvalidArgument(format!(
                "{fingerprint} declares {total} chunks, the limit is {}",
                self.max_chunks
            )));
        }
        let spec = spec_for(header.chunk_index, header.file_size, header.chunk_size)?;
        if data.len() as u64 != spec.len {
            return Err(StoreError::InvalidArgument(format!(
                "chunk {identity} has {} bytes, expected {}",
                data.len(),
                spec.len
            )));
        }

        if !header.checksum.is_empty() && !checksum_bytes(data).eq_ignore_ascii_case(&header.checksum)
        {
            warn!(chunk = %identity, "chunk checksum mismatch");
            return Err(StoreError::ChecksumMismatch {
                fingerprint: fingerprint.to_string(),
                index: header.chunk_index,
            });
        }

        let _guard = self.locks.read(fingerprint).await;

        if self.is_published(fingerprint, extension).await? {
            debug!(chunk = %identity, "file already merged, chunk discarded");
            return Ok(StoreChunkAck {
                chunk_hash: identity.to_string(),
                stored: false,
            });
        }

        let dir = self.layout.namespace_dir(fingerprint);
        tokio::fs::create_dir_all(&dir).await?;

        let candidate = SessionManifest::from_header(header)?;
        let manifest = candidate
            .publish(
                &self.layout.manifest_path(fingerprint),
                &dir.join(format!(".session.{}.tmp", uuid::Uuid::new_v4().simple())),
            )
            .await?;
        if !manifest.same_layout(&candidate) {
            return Err(StoreError::InvalidArgument(format!(
                "session {fingerprint} was started with file size {} and chunk size {}, \
                 chunk {} declares {} and {}",
                manifest.file_size,
                manifest.chunk_size,
                header.chunk_index,
                header.file_size,
                header.chunk_size
            )));
        }

        let scratch = self.layout.temp_chunk_path(&identity);
        let target = self.layout.chunk_path(&identity);
        if let Err(e) = write_blob(&scratch, &target, data).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(e.into());
        }

        debug!(chunk = %identity, bytes = data.len(), "chunk stored");
        Ok(StoreChunkAck {
            chunk_hash: identity.to_string(),
            stored: true,
        })
    }

    /// Finds a merged output for `fingerprint` under any extension.
    pub async fn find_output(&self, fingerprint: &str) -> Result<Option<PathBuf>, StoreError> {
        validate_fingerprint(fingerprint)?;
        let mut entries = tokio::fs::read_dir(self.layout.root()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(rest) = name.strip_prefix(fingerprint) else {
                continue;
            };
            if !(rest.is_empty() || rest.starts_with('.')) || rest.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            if entry.file_type().await?.is_file() {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Whether the file was already merged, under `extension` or, when no
    /// session is open, under any other name.
    async fn is_published(&self, fingerprint: &str, extension: &str) -> Result<bool, StoreError> {
        if tokio::fs::try_exists(self.layout.output_path(fingerprint, extension)).await? {
            return Ok(true);
        }
        if tokio::fs::try_exists(self.layout.manifest_path(fingerprint)).await? {
            return Ok(false);
        }
        Ok(self.find_output(fingerprint).await?.is_some())
    }

    /// Path of the merged output for `fingerprint`.
    pub fn output_path(&self, fingerprint: &str, extension: &str) -> PathBuf {
        self.layout.output_path(fingerprint, extension)
    }
}

/// Writes `data` durably to `scratch`, then renames it over `target`.
async fn write_blob(scratch: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(scratch).await?;
    file.write_all(data).await?;
    file.sync_data().await?;
    drop(file);
    tokio::fs::rename(scratch, target).await
}
