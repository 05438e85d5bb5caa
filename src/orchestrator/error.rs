use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Upload already in progress: {0}")]
    AlreadyUploading(String),

    #[error("Chunk error: {0}")]
    ChunkError(#[from] crate::chunk::ChunkError),

    #[error("Config error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
