//! Incremental whole-file fingerprinting.
//!
//! The fingerprint is the MD5 digest of the file bytes, absorbed one chunk
//! at a time in index order. Hashing runs as a background tokio task that
//! reports progress over a channel and can be cancelled before the digest
//! is finalized.

use std::path::Path;
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;
use crate::chunked::{ChunkReader, ChunkSource};
use crate::chunker::ChunkSpec;
use crate::progress::percentage;

/// Event emitted by a fingerprinting run.
#[derive(Debug, Clone, PartialEq)]
pub enum HashEvent {
    /// Chunk `completed - 1` was absorbed.
    Progress {
        completed: u32,
        total: u32,
        percentage: f64,
    },
    /// All chunks absorbed; always carries `percentage == 100.0`.
    Complete { percentage: f64, fingerprint: String },
}

/// Hasher state threaded through a single fingerprinting run.
pub struct IncrementalHasher {
    state: Md5,
    absorbed: u64,
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            state: Md5::new(),
            absorbed: 0,
        }
    }

    /// Folds the next chunk's bytes into the state.
    pub fn absorb(&mut self, data: &[u8]) {
        self.state.update(data);
        self.absorbed += data.len() as u64;
    }

    /// Total bytes absorbed so far.
    pub fn bytes_absorbed(&self) -> u64 {
        self.absorbed
    }

    /// Consumes the state and returns the lowercase hex digest.
    pub fn finalize(self) -> String {
        hex::encode(self.state.finalize())
    }
}

/// Fingerprints an in-memory byte slice.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = IncrementalHasher::new();
    hasher.absorb(data);
    hasher.finalize()
}

/// Absorbs every chunk of `specs` in order and returns the fingerprint.
///
/// `specs[i].index` must equal `i`; the next chunk is only read once the
/// previous one has been absorbed. Progress is sent after each chunk, then
/// a final [`HashEvent::Complete`]. A send to a dropped receiver is ignored.
pub async fn fingerprint_chunks<S: ChunkSource + ?Sized>(
    source: &S,
    specs: &[ChunkSpec],
    progress_tx: Option<&mpsc::Sender<HashEvent>>,
    cancel: &CancellationToken,
) -> Result<String, TransferError> {
    let total = u32::try_from(specs.len())
        .map_err(|_| TransferError::InvalidArgument("too many chunks".into()))?;
    let mut hasher = IncrementalHasher::new();

    for (position, spec) in specs.iter().enumerate() {
        if spec.index as usize != position {
            return Err(TransferError::InvalidArgument(format!(
                "chunk {} out of order at position {position}",
                spec.index
            )));
        }

        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            result = source.read_chunk(*spec) => result.map_err(|e| TransferError::Read {
                index: spec.index,
                source: e,
            })?,
        };

        if data.len() as u64 != spec.len {
            return Err(TransferError::Read {
                index: spec.index,
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", spec.len, data.len()),
                ),
            });
        }

        hasher.absorb(&data);

        let completed = spec.index + 1;
        if let Some(tx) = progress_tx {
            let _ = tx
                .send(HashEvent::Progress {
                    completed,
                    total,
                    percentage: percentage(completed, total),
                })
                .await;
        }
    }

    // A cancel that lands after the last read still wins.
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    let bytes = hasher.bytes_absorbed();
    let fingerprint = hasher.finalize();
    debug!(chunks = total, bytes, %fingerprint, "fingerprint computed");

    if let Some(tx) = progress_tx {
        let _ = tx
            .send(HashEvent::Complete {
                percentage: 100.0,
                fingerprint: fingerprint.clone(),
            })
            .await;
    }

    Ok(fingerprint)
}

/// Fingerprints a file on disk without reporting progress.
pub async fn fingerprint_file(path: &Path, chunk_size: u64) -> Result<String, TransferError> {
    let reader = ChunkReader::open(path, chunk_size).await?;
    let specs = reader.specs()?;
    fingerprint_chunks(&reader, &specs, None, &CancellationToken::new()).await
}

/// A fingerprinting run on a background task.
pub struct FingerprintTask {
    events: Option<mpsc::Receiver<HashEvent>>,
    cancel: CancellationToken,
    handle: JoinHandle<Result<String, TransferError>>,
}

/// Spawns [`fingerprint_chunks`] on the tokio runtime.
///
/// The event channel holds one slot per chunk plus the completion event,
/// so the hashing loop never waits on a slow consumer.
pub fn spawn_fingerprint<S: ChunkSource + ?Sized + 'static>(
    source: Arc<S>,
    specs: Vec<ChunkSpec>,
    cancel: CancellationToken,
) -> FingerprintTask {
    let (tx, rx) = mpsc::channel(specs.len() + 1);
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        fingerprint_chunks(source.as_ref(), &specs, Some(&tx), &task_cancel).await
    });

    FingerprintTask {
        events: Some(rx),
        cancel,
        handle,
    }
}

impl FingerprintTask {
    /// Takes the progress receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<HashEvent>> {
        self.events.take()
    }

    /// Requests cancellation. No digest is delivered afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to finish.
    pub async fn join(self) -> Result<String, TransferError> {
        self.handle
            .await
            .map_err(|e| TransferError::Task(e.to_string()))?
    }
}
