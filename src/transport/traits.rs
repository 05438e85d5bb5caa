//! HTTP seam between the upload session and the network.

use std::future::Future;
use std::pin::Pin;

use super::error::TransportResult;
use super::types::{ChunkResponse, ChunkUpload, NegotiationResponse};

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Transport used by an upload session.
///
/// Implementations decode raw status codes into [`ChunkResponse`] so the
/// session never sees HTTP details. Errors are reserved for failures where
/// no response was received at all.
pub trait UploadTransport: Send + Sync {
    /// POST with an empty body to obtain an upload location.
    fn negotiate<'a>(&'a self, endpoint: &'a str) -> TransportFuture<'a, NegotiationResponse>;

    /// PUT one chunk to a negotiated location.
    fn put_chunk<'a>(
        &'a self,
        location: &'a str,
        upload: ChunkUpload,
    ) -> TransportFuture<'a, ChunkResponse>;
}
