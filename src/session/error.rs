use thiserror::Error;

use crate::chunk::ChunkError;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Local file read failed.
    #[error("Read error at offset {offset}: {source}")]
    Read {
        offset: u64,
        #[source]
        source: ChunkError,
    },

    /// The endpoint did not hand out a usable upload location.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// A chunk PUT was rejected or never answered.
    #[error("Upload failed at offset {offset}: {reason}")]
    Upload {
        offset: u64,
        status: Option<u16>,
        reason: String,
    },
}

impl SessionError {
    /// Offset a fresh session could resume from, if any bytes were sent
    pub fn offset(&self) -> Option<u64> {
        match self {
            SessionError::Read { offset, .. } | SessionError::Upload { offset, .. } => {
                Some(*offset)
            }
            SessionError::Negotiation(_) => None,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
