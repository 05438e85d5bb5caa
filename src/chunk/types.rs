use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::Result;

/// Reference to a local file of known size. Never written to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub name: String,
    pub total_size: u64,
}

impl FileHandle {
    /// Open a file handle, reading its size from the filesystem
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            total_size: metadata.len(),
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.total_size == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRequest {
    pub offset: u64,
    pub max_length: usize,
}

impl ChunkRequest {
    /// Byte range `[offset, end)` this request covers in a file of `total_size` bytes
    pub fn end(&self, total_size: u64) -> u64 {
        std::cmp::min(self.offset.saturating_add(self.max_length as u64), total_size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset of the first byte after this chunk
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}
