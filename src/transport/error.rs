use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Client build failed: {0}")]
    ClientBuild(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
