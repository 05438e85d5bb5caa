pub mod error;
pub mod http;
pub mod traits;
pub mod types;

pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
pub use traits::{TransportFuture, UploadTransport};
pub use types::{
    parse_range_end, ChunkResponse, ChunkUpload, ContentRange, NegotiationResponse,
    RESUME_INCOMPLETE,
};

#[cfg(test)]
pub(crate) mod mock;
