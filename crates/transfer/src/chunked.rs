use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;
use crate::chunker::{ChunkSpec, split};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Lazily readable chunk bytes.
///
/// Implementors return exactly `spec.len` bytes for each spec. Reads may be
/// issued concurrently for different chunks.
pub trait ChunkSource: Send + Sync {
    fn read_chunk(
        &self,
        spec: ChunkSpec,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<u8>>> + Send + '_>>;
}

/// In-memory source: the whole buffer is the file.
impl ChunkSource for Vec<u8> {
    fn read_chunk(
        &self,
        spec: ChunkSpec,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            let start = spec.offset as usize;
            let end = spec.end() as usize;
            self.get(start..end).map(<[u8]>::to_vec).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("chunk {} past end of buffer", spec.index),
                )
            })
        })
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks.
///
/// Each read opens its own handle and seeks to the chunk offset, so chunks
/// can be read in any order and concurrently.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    file_size: u64,
    chunk_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    pub async fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidArgument(
                "chunk size must be positive".into(),
            ));
        }
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidArgument(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file_size: metadata.len(),
            chunk_size,
        })
    }

    /// Ordered chunk specs covering the whole file.
    pub fn specs(&self) -> Result<Vec<ChunkSpec>, TransferError> {
        split(self.file_size, self.chunk_size)
    }

    /// Reads exactly the bytes of `spec`.
    pub async fn read(&self, spec: ChunkSpec) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(spec.offset)).await?;
        let mut buf = vec![0u8; spec.len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name component, used for extension extraction server-side.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl ChunkSource for ChunkReader {
    fn read_chunk(
        &self,
        spec: ChunkSpec,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<u8>>> + Send + '_>> {
        Box::pin(self.read(spec))
    }
}
