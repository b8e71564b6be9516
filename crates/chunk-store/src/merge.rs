use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use chunkload_protocol::identity::{ChunkIdentity, extract_extension};
use chunkload_transfer::{fingerprint_file, spec_for};

use crate::layout::StoreLayout;
use crate::store::ChunkStore;
use crate::validation::{validate_extension, validate_fingerprint};
use crate::{StoreConfig, StoreError};

/// Maximum number of chunk writes a single merge keeps in flight.
const MERGE_WRITERS: usize = 8;

/// Most missing indices an incomplete-upload error lists.
pub const MAX_REPORTED_MISSING: usize = 10_000;

/// Result of a successful merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub path: PathBuf,
    /// The output was already present; nothing was written.
    pub already_merged: bool,
}

/// Assembles a complete chunk namespace into the final file.
pub struct MergeEngine {
    store: Arc<ChunkStore>,
    verify_on_merge: bool,
}

impl MergeEngine {
    pub fn new(store: Arc<ChunkStore>, verify_on_merge: bool) -> Self {
        Self {
            store,
            verify_on_merge,
        }
    }

    pub fn from_config(store: Arc<ChunkStore>, config: &StoreConfig) -> Self {
        Self::new(store, config.verify_on_merge)
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    /// Merges using the extension of `file_name`.
    pub async fn merge_file(
        &self,
        fingerprint: &str,
        file_name: &str,
        chunk_size: u64,
    ) -> Result<MergeOutcome, StoreError> {
        self.merge(fingerprint, extract_extension(file_name), chunk_size)
            .await
    }

    /// Writes every chunk of `fingerprint` at `index * chunk_size` in
    /// `<root>/<fingerprint><extension>`, then deletes the namespace.
    ///
    /// The file is assembled under a `.part` name and renamed into place only
    /// once every chunk is written (and, if enabled, the content hashes back
    /// to the fingerprint). Chunks are deleted only after the rename, so a
    /// failed merge can be retried. A repeated merge of an already published
    /// file succeeds with `already_merged` set.
    pub async fn merge(
        &self,
        fingerprint: &str,
        extension: &str,
        chunk_size: u64,
    ) -> Result<MergeOutcome, StoreError> {
        validate_fingerprint(fingerprint)?;
        validate_extension(extension)?;

        let layout = self.store.layout();
        let output = layout.output_path(fingerprint, extension);

        let _guard = self.store.locks().write(fingerprint).await;

        if !tokio::fs::try_exists(layout.namespace_dir(fingerprint)).await? {
            let published = if tokio::fs::try_exists(&output).await? {
                Some(output)
            } else {
                // Same content, published under another extension.
                self.store.find_output(fingerprint).await?
            };
            return match published {
                Some(path) => {
                    debug!(%fingerprint, path = %path.display(), "already merged");
                    Ok(MergeOutcome {
                        path,
                        already_merged: true,
                    })
                }
                None => Err(StoreError::SessionNotFound(fingerprint.to_string())),
            };
        }

        let manifest = self
            .store
            .load_manifest(fingerprint)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(fingerprint.to_string()))?;

        if manifest.chunk_size != chunk_size {
            return Err(StoreError::InvalidArgument(format!(
                "merge chunk size {chunk_size} does not match session chunk size {}",
                manifest.chunk_size
            )));
        }

        let stored = self.store.list_identities(fingerprint).await?;
        let gaps = Gaps::find(&stored, manifest.total_chunks, MAX_REPORTED_MISSING);
        if gaps.present < manifest.total_chunks {
            warn!(
                %fingerprint,
                expected = manifest.total_chunks,
                stored = gaps.present,
                "merge rejected, upload incomplete"
            );
            return Err(StoreError::IncompleteUpload {
                fingerprint: fingerprint.to_string(),
                expected: manifest.total_chunks,
                stored: gaps.present,
                missing: gaps.missing,
            });
        }

        let partial = layout.partial_path(fingerprint, extension);
        let assembled = assemble(
            layout,
            fingerprint,
            &partial,
            manifest.file_size,
            chunk_size,
            manifest.total_chunks,
        )
        .await;
        if let Err((index, source)) = assembled {
            let _ = tokio::fs::remove_file(&partial).await;
            warn!(%fingerprint, ?index, error = %source, "merge failed, chunks kept");
            return Err(StoreError::MergeFailed {
                fingerprint: fingerprint.to_string(),
                index,
                source,
            });
        }

        if self.verify_on_merge {
            let actual = match fingerprint_file(&partial, chunk_size).await {
                Ok(actual) => actual,
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            };
            if !actual.eq_ignore_ascii_case(fingerprint) {
                let _ = tokio::fs::remove_file(&partial).await;
                warn!(%fingerprint, %actual, "merged content does not match fingerprint");
                return Err(StoreError::FingerprintMismatch {
                    expected: fingerprint.to_string(),
                    actual,
                });
            }
        }

        if let Err(source) = tokio::fs::rename(&partial, &output).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StoreError::MergeFailed {
                fingerprint: fingerprint.to_string(),
                index: None,
                source,
            });
        }

        retire_namespace(layout, fingerprint, &stored).await;

        info!(
            %fingerprint,
            path = %output.display(),
            chunks = manifest.total_chunks,
            bytes = manifest.file_size,
            "merge complete"
        );
        Ok(MergeOutcome {
            path: output,
            already_merged: false,
        })
    }
}

/// Which of `0..total` a namespace holds.
#[derive(Debug, PartialEq)]
struct Gaps {
    /// Distinct in-range indices stored.
    present: u32,
    /// The first missing indices, at most the requested limit.
    missing: Vec<u32>,
}

impl Gaps {
    /// Walks `stored` (sorted by index) once. Work and memory grow with
    /// the number of stored chunks and `limit`, never with `total`.
    fn find(stored: &[ChunkIdentity], total: u32, limit: usize) -> Self {
        let mut present = 0u32;
        let mut missing = Vec::new();
        let mut next = 0u32;

        for index in stored.iter().map(ChunkIdentity::index) {
            if index >= total {
                break;
            }
            if index < next {
                continue;
            }
            let gap_end = index.min(next.saturating_add(limit.saturating_sub(missing.len()) as u32));
            missing.extend(next..gap_end);
            present += 1;
            next = index + 1;
        }
        let tail_end = total.min(next.saturating_add(limit.saturating_sub(missing.len()) as u32));
        missing.extend(next..tail_end);

        Self { present, missing }
    }
}

/// Writes every chunk into `partial` at its offset, a bounded number at a
/// time. Returns the failing chunk index, if the failure belongs to one.
async fn assemble(
    layout: &StoreLayout,
    fingerprint: &str,
    partial: &Path,
    file_size: u64,
    chunk_size: u64,
    total: u32,
) -> Result<(), (Option<u32>, std::io::Error)> {
    let file = tokio::fs::File::create(partial)
        .await
        .map_err(|e| (None, e))?;
    file.set_len(file_size).await.map_err(|e| (None, e))?;
    drop(file);

    let mut writers: JoinSet<Result<(), (Option<u32>, std::io::Error)>> = JoinSet::new();
    let mut failure = None;

    for index in 0..total {
        if writers.len() >= MERGE_WRITERS {
            if let Some(err) = next_failure(&mut writers).await {
                failure = Some(err);
                break;
            }
        }

        let spec = spec_for(index, file_size, chunk_size)
            .map_err(|e| (Some(index), std::io::Error::other(e.to_string())))?;
        let id = ChunkIdentity::new(fingerprint, index)
            .map_err(|e| (Some(index), std::io::Error::other(e.to_string())))?;
        let chunk_path = layout.chunk_path(&id);
        let partial = partial.to_path_buf();

        writers.spawn(async move {
            write_chunk(&chunk_path, &partial, spec.offset, spec.len)
                .await
                .map_err(|e| (Some(index), e))
        });
    }

    while failure.is_none() && !writers.is_empty() {
        failure = next_failure(&mut writers).await;
    }

    if let Some(err) = failure {
        writers.abort_all();
        while writers.join_next().await.is_some() {}
        return Err(err);
    }
    Ok(())
}

async fn next_failure(
    writers: &mut JoinSet<Result<(), (Option<u32>, std::io::Error)>>,
) -> Option<(Option<u32>, std::io::Error)> {
    match writers.join_next().await? {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(e) => Some((None, std::io::Error::other(e.to_string()))),
    }
}

async fn write_chunk(
    chunk_path: &Path,
    partial: &Path,
    offset: u64,
    expected_len: u64,
) -> std::io::Result<()> {
    let data = tokio::fs::read(chunk_path).await?;
    if data.len() as u64 != expected_len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "chunk {} has {} bytes, expected {expected_len}",
                chunk_path.display(),
                data.len()
            ),
        ));
    }

    let mut out = tokio::fs::OpenOptions::new().write(true).open(partial).await?;
    out.seek(SeekFrom::Start(offset)).await?;
    out.write_all(&data).await?;
    out.sync_data().await
}

/// Deletes the chunk blobs, the manifest and the namespace directory. The
/// output is already published, so failures are only logged.
async fn retire_namespace(layout: &StoreLayout, fingerprint: &str, stored: &[ChunkIdentity]) {
    for id in stored {
        if let Err(e) = tokio::fs::remove_file(layout.chunk_path(id)).await {
            warn!(chunk = %id, error = %e, "failed to delete merged chunk");
        }
    }
    if let Err(e) = tokio::fs::remove_file(layout.manifest_path(fingerprint)).await {
        warn!(%fingerprint, error = %e, "failed to delete session manifest");
    }

    let dir = layout.namespace_dir(fingerprint);
    if let Err(e) = tokio::fs::remove_dir(&dir).await {
        warn!(%fingerprint, error = %e, "namespace not empty after merge, removing recursively");
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(%fingerprint, error = %e, "failed to delete namespace");
        }
    }
}
