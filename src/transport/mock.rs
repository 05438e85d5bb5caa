//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::error::TransportError;
use super::traits::{TransportFuture, UploadTransport};
use super::types::{ChunkResponse, ChunkUpload, NegotiationResponse};

pub(crate) struct MockTransport {
    negotiation: Mutex<Option<Result<NegotiationResponse, String>>>,
    replies: Mutex<VecDeque<Result<ChunkResponse, String>>>,
    negotiations: Mutex<Vec<String>>,
    puts: Mutex<Vec<(String, ChunkUpload)>>,
    /// Signalled each time a PUT is dispatched
    pub put_started: Notify,
    /// When set, every PUT waits on this before answering
    gate: Option<Arc<Notify>>,
    panic_on_put: bool,
}

impl MockTransport {
    pub fn new(location: &str) -> Self {
        Self {
            negotiation: Mutex::new(Some(Ok(NegotiationResponse {
                status: 200,
                location: Some(location.to_string()),
            }))),
            replies: Mutex::new(VecDeque::new()),
            negotiations: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            put_started: Notify::new(),
            gate: None,
            panic_on_put: false,
        }
    }

    pub fn with_negotiation(self, response: NegotiationResponse) -> Self {
        *self.negotiation.lock() = Some(Ok(response));
        self
    }

    pub fn with_negotiation_error(self, message: &str) -> Self {
        *self.negotiation.lock() = Some(Err(message.to_string()));
        self
    }

    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every PUT panics, taking the session task down with it
    pub fn with_panic(mut self) -> Self {
        self.panic_on_put = true;
        self
    }

    pub fn push_reply(&self, reply: ChunkResponse) {
        self.replies.lock().push_back(Ok(reply));
    }

    pub fn push_error(&self, message: &str) {
        self.replies.lock().push_back(Err(message.to_string()));
    }

    pub fn negotiation_count(&self) -> usize {
        self.negotiations.lock().len()
    }

    pub fn puts(&self) -> Vec<(String, ChunkUpload)> {
        self.puts.lock().clone()
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().len()
    }
}

impl UploadTransport for MockTransport {
    fn negotiate<'a>(&'a self, endpoint: &'a str) -> TransportFuture<'a, NegotiationResponse> {
        Box::pin(async move {
            self.negotiations.lock().push(endpoint.to_string());
            match self.negotiation.lock().clone() {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(TransportError::Http(message)),
                None => Err(TransportError::Http("no negotiation scripted".into())),
            }
        })
    }

    fn put_chunk<'a>(
        &'a self,
        location: &'a str,
        upload: ChunkUpload,
    ) -> TransportFuture<'a, ChunkResponse> {
        Box::pin(async move {
            let offset = upload.offset;
            self.puts.lock().push((location.to_string(), upload));
            self.put_started.notify_one();
            if self.panic_on_put {
                panic!("transport failure while sending chunk at {offset}");
            }
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Ok(response)) => Ok(response),
                Some(Err(message)) => Err(TransportError::Http(message)),
                None => Ok(ChunkResponse::Done),
            }
        })
    }
}
