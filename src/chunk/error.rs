use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    /// The underlying read failed; the io error is carried as-is.
    #[error("Read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("Invalid offset {offset}: file is only {total_size} bytes")]
    InvalidOffset { offset: u64, total_size: u64 },

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),
}

pub type Result<T> = std::result::Result<T, ChunkError>;
