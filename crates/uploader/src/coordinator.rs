//! Upload coordinator.
//!
//! Drives one file through `Hashing -> Verifying -> Uploading -> Merging ->
//! Done`, emitting events along the way. Any failure ends the run in
//! `Failed`; nothing is retried automatically, but a later run resumes from
//! whatever chunks the server already holds.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunkload_protocol::identity::ChunkIdentity;
use chunkload_protocol::messages::{MergeRequest, StoreChunkAck, StoreChunkHeader};
use chunkload_transfer::{
    ChunkReader, ChunkSpec, HashEvent, SpeedCalculator, TransferError, checksum_bytes,
    spawn_fingerprint,
};

use crate::error::UploadError;
use crate::transport::UploadTransport;
use crate::types::{UploadConfig, UploadEvent, UploadOutcome, UploadState};

/// Capacity of the event channel. Events beyond it are dropped rather than
/// stalling the upload.
const EVENT_CAPACITY: usize = 1024;

/// Orchestrates the upload of a single file.
pub struct UploadCoordinator {
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    pub fn new(config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this upload.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads the file at `path` through `transport`.
    pub async fn upload<T: UploadTransport + ?Sized>(
        &self,
        transport: &T,
        path: &Path,
    ) -> Result<UploadOutcome, UploadError> {
        let mut fingerprint = None;

        match self.run(transport, path, &mut fingerprint).await {
            Ok(outcome) => {
                info!(
                    file = %path.display(),
                    fingerprint = %outcome.fingerprint(),
                    "upload complete"
                );
                self.emit(UploadEvent::State(UploadState::Done));
                self.emit(UploadEvent::Done(outcome.clone()));
                Ok(outcome)
            }
            Err(e) => {
                error!(file = %path.display(), ?fingerprint, error = %e, "upload failed");
                self.emit(UploadEvent::State(UploadState::Failed));
                self.emit(UploadEvent::Failed {
                    fingerprint,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run<T: UploadTransport + ?Sized>(
        &self,
        transport: &T,
        path: &Path,
        fingerprint_slot: &mut Option<String>,
    ) -> Result<UploadOutcome, UploadError> {
        // 1. Hash
        self.emit(UploadEvent::State(UploadState::Hashing));
        self.check_cancelled()?;

        let reader = Arc::new(ChunkReader::open(path, self.config.chunk_size).await?);
        let specs = reader.specs()?;
        if specs.is_empty() {
            return Err(UploadError::InvalidArgument(format!(
                "cannot upload an empty file: {}",
                path.display()
            )));
        }

        let fingerprint = self.fingerprint(Arc::clone(&reader), specs.clone()).await?;
        *fingerprint_slot = Some(fingerprint.clone());
        let file_name = reader.file_name();
        debug!(%fingerprint, file = %file_name, chunks = specs.len(), "file hashed");

        // 2. Verify
        self.emit(UploadEvent::State(UploadState::Verifying));
        self.check_cancelled()?;

        let existing = transport.check_exists(&fingerprint, &file_name).await?;
        if existing.exists() {
            info!(%fingerprint, "file already on server");
            return Ok(UploadOutcome::AlreadyUploaded { fingerprint });
        }

        let stored: HashSet<u32> = existing
            .uploaded_list
            .iter()
            .filter_map(|id| ChunkIdentity::parse(id).ok())
            .filter(|id| id.fingerprint() == fingerprint)
            .map(|id| id.index())
            .collect();
        let missing: Vec<ChunkSpec> = specs
            .iter()
            .copied()
            .filter(|spec| !stored.contains(&spec.index))
            .collect();
        debug!(
            %fingerprint,
            stored = stored.len(),
            missing = missing.len(),
            "resume point computed"
        );

        // 3. Upload
        self.emit(UploadEvent::State(UploadState::Uploading));
        self.check_cancelled()?;

        let failed = self
            .upload_missing(transport, &reader, &fingerprint, &file_name, missing)
            .await;
        self.check_cancelled()?;
        if !failed.is_empty() {
            return Err(UploadError::ChunksFailed {
                fingerprint,
                indices: failed,
            });
        }

        // 4. Merge
        self.emit(UploadEvent::State(UploadState::Merging));
        self.check_cancelled()?;

        let request = MergeRequest {
            file_hash: fingerprint.clone(),
            file_name,
            chunk_size: self.config.chunk_size,
        };
        let merged = transport.request_merge(&request).await?;
        if !merged.success {
            return Err(UploadError::MergeRejected {
                fingerprint,
                reason: merged.error.unwrap_or_else(|| "unknown error".into()),
                missing: merged.missing_chunks,
                failed_chunk: merged.failed_chunk,
            });
        }

        Ok(UploadOutcome::Merged {
            fingerprint,
            path: merged.path.unwrap_or_default(),
            already_merged: merged.already_merged,
        })
    }

    /// Runs the hashing task, forwarding its progress as events.
    async fn fingerprint(
        &self,
        reader: Arc<ChunkReader>,
        specs: Vec<ChunkSpec>,
    ) -> Result<String, UploadError> {
        let mut task = spawn_fingerprint(reader, specs, self.cancel.child_token());

        if let Some(mut events) = task.take_events() {
            while let Some(event) = events.recv().await {
                if let HashEvent::Progress {
                    completed,
                    total,
                    percentage,
                } = event
                {
                    self.emit(UploadEvent::HashProgress {
                        completed,
                        total,
                        percentage,
                    });
                }
            }
        }

        Ok(task.join().await?)
    }

    /// Sends every chunk in `missing`, at most `concurrency` at a time.
    /// Returns the indices that failed, sorted.
    async fn upload_missing<T: UploadTransport + ?Sized>(
        &self,
        transport: &T,
        reader: &ChunkReader,
        fingerprint: &str,
        file_name: &str,
        missing: Vec<ChunkSpec>,
    ) -> Vec<u32> {
        let to_upload = missing.len() as u32;
        let speed = SpeedCalculator::default();
        let mut uploaded = 0u32;
        let mut failed = Vec::new();

        let mut results = futures_util::stream::iter(missing.into_iter().map(|spec| async move {
            let result = self
                .upload_chunk(transport, reader, fingerprint, file_name, spec)
                .await;
            (spec, result)
        }))
        .buffer_unordered(self.config.concurrency.max(1));

        while let Some((spec, result)) = results.next().await {
            match result {
                Ok(ack) => {
                    uploaded += 1;
                    speed.add_sample(spec.len);
                    debug!(chunk = %ack.chunk_hash, stored = ack.stored, "chunk acknowledged");
                    self.emit(UploadEvent::ChunkStored {
                        index: spec.index,
                        uploaded,
                        to_upload,
                        bytes_per_second: speed.bytes_per_second(),
                    });
                }
                Err(e) => {
                    warn!(%fingerprint, index = spec.index, error = %e, "chunk upload failed");
                    failed.push(spec.index);
                    self.emit(UploadEvent::ChunkFailed {
                        index: spec.index,
                        error: e.to_string(),
                    });
                }
            }
        }

        failed.sort_unstable();
        failed
    }

    async fn upload_chunk<T: UploadTransport + ?Sized>(
        &self,
        transport: &T,
        reader: &ChunkReader,
        fingerprint: &str,
        file_name: &str,
        spec: ChunkSpec,
    ) -> Result<StoreChunkAck, UploadError> {
        self.check_cancelled()?;

        let data = reader.read(spec).await.map_err(|source| {
            UploadError::Hashing(TransferError::Read {
                index: spec.index,
                source,
            })
        })?;
        let header = StoreChunkHeader {
            file_hash: fingerprint.to_string(),
            chunk_index: spec.index,
            file_name: file_name.to_string(),
            file_size: reader.file_size(),
            chunk_size: reader.chunk_size(),
            checksum: checksum_bytes(&data),
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            result = transport.store_chunk(&header, &data) => result,
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: UploadEvent) {
        if self.events_tx.try_send(event).is_err() {
            debug!("upload event dropped");
        }
    }
}
