use crate::TransferError;

/// One contiguous byte range of a file.
///
/// The sequence of specs for a file is fully determined by
/// `(file_size, chunk_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSpec {
    /// Position in the chunk sequence.
    pub index: u32,
    /// Byte offset within the file (`index * chunk_size`).
    pub offset: u64,
    /// Length in bytes (`chunk_size`, or the remainder for the last chunk).
    pub len: u64,
}

impl ChunkSpec {
    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Returns `ceil(file_size / chunk_size)`.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> Result<u32, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidArgument(
            "chunk size must be positive".into(),
        ));
    }
    let count = file_size.div_ceil(chunk_size);
    u32::try_from(count).map_err(|_| {
        TransferError::InvalidArgument(format!(
            "{count} chunks exceeds the maximum of {}",
            u32::MAX
        ))
    })
}

/// Returns the spec of chunk `index` for a file of `file_size` bytes.
pub fn spec_for(index: u32, file_size: u64, chunk_size: u64) -> Result<ChunkSpec, TransferError> {
    let count = chunk_count(file_size, chunk_size)?;
    if index >= count {
        return Err(TransferError::InvalidArgument(format!(
            "chunk index {index} out of range (file has {count} chunks)"
        )));
    }
    let offset = u64::from(index) * chunk_size;
    Ok(ChunkSpec {
        index,
        offset,
        len: chunk_size.min(file_size - offset),
    })
}

/// Splits a file of `file_size` bytes into ordered chunk specs.
///
/// A zero-length file yields no chunks.
pub fn split(file_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpec>, TransferError> {
    let count = chunk_count(file_size, chunk_size)?;
    let mut specs = Vec::with_capacity(count as usize);
    for index in 0..count {
        let offset = u64::from(index) * chunk_size;
        specs.push(ChunkSpec {
            index,
            offset,
            len: chunk_size.min(file_size - offset),
        });
    }
    Ok(specs)
}
