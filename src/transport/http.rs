use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use tracing::debug;

use super::error::{TransportError, TransportResult};
use super::traits::{TransportFuture, UploadTransport};
use super::types::{ChunkResponse, ChunkUpload, NegotiationResponse};
use crate::config::UploadConfig;

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &UploadConfig) -> TransportResult<Self> {
        // 308 means "resume incomplete" here, never a redirect to follow.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post_negotiation(&self, endpoint: &str) -> TransportResult<NegotiationResponse> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status().as_u16();
        let location = match response.headers().get(LOCATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|e| TransportError::InvalidHeader(e.to_string()))?
                    .to_string(),
            ),
            None => None,
        };
        debug!(endpoint, status, has_location = location.is_some(), "negotiation response");

        Ok(NegotiationResponse { status, location })
    }

    async fn send_chunk(&self, location: &str, upload: ChunkUpload) -> TransportResult<ChunkResponse> {
        let len = upload.data.len() as u64;
        let mut request = self
            .client
            .put(location)
            .header(CONTENT_TYPE, "application/octet-stream");
        if let Some(range) = upload.content_range {
            request = request.header(CONTENT_RANGE, range.to_string());
        }

        let response = request.body(upload.data).send().await?;
        let status = response.status().as_u16();
        let range = response
            .headers()
            .get(RANGE)
            .and_then(|value| value.to_str().ok());

        let decoded = ChunkResponse::decode(status, range, upload.offset, len);
        debug!(offset = upload.offset, len, status, ?decoded, "chunk response");
        Ok(decoded)
    }
}

impl UploadTransport for HttpTransport {
    fn negotiate<'a>(&'a self, endpoint: &'a str) -> TransportFuture<'a, NegotiationResponse> {
        Box::pin(self.post_negotiation(endpoint))
    }

    fn put_chunk<'a>(
        &'a self,
        location: &'a str,
        upload: ChunkUpload,
    ) -> TransportFuture<'a, ChunkResponse> {
        Box::pin(self.send_chunk(location, upload))
    }
}
