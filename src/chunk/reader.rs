use std::io::SeekFrom;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::{ChunkError, Result};
use super::types::{Chunk, ChunkRequest, FileHandle};

/// Upper bound on a single chunk (16 MiB)
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Reads bounded byte ranges from local files.
///
/// Every call opens its own file descriptor, so independent reads of
/// different offsets never share a cursor.
#[derive(Debug, Clone, Copy)]
pub struct ChunkReader {
    max_chunk_size: usize,
}

impl Default for ChunkReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReader {
    pub fn new() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
        }
    }

    pub fn with_max_chunk_size(max_chunk_size: usize) -> Result<Self> {
        if max_chunk_size == 0 {
            return Err(ChunkError::InvalidChunkSize(
                "chunk size must be greater than zero".into(),
            ));
        }
        Ok(Self { max_chunk_size })
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Read the chunk starting at `offset`.
    ///
    /// Returns at most `max_chunk_size` bytes. The chunk is empty only when
    /// `offset == file.total_size`.
    pub async fn read_chunk(&self, file: &FileHandle, offset: u64) -> Result<Chunk> {
        let request = ChunkRequest {
            offset,
            max_length: self.max_chunk_size,
        };
        self.read(file, request).await
    }

    pub async fn read(&self, file: &FileHandle, request: ChunkRequest) -> Result<Chunk> {
        if request.offset > file.total_size {
            return Err(ChunkError::InvalidOffset {
                offset: request.offset,
                total_size: file.total_size,
            });
        }

        let end = request.end(file.total_size);
        let length = (end - request.offset) as usize;
        if length == 0 {
            return Ok(Chunk {
                offset: request.offset,
                data: Bytes::new(),
            });
        }

        let mut handle = File::open(&file.path).await?;
        handle.seek(SeekFrom::Start(request.offset)).await?;

        let mut buf = vec![0u8; length];
        handle.read_exact(&mut buf).await?;

        Ok(Chunk {
            offset: request.offset,
            data: Bytes::from(buf),
        })
    }
}
