use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkReader, FileHandle};
use crate::config::LocationRewrite;
use crate::session::error::{SessionError, SessionResult};
use crate::session::types::{SessionState, SessionSummary, UploadProgress, UploadTarget};
use crate::transport::{
    ChunkResponse, ChunkUpload, ContentRange, UploadTransport, RESUME_INCOMPLETE,
};

type EventSender = mpsc::UnboundedSender<SessionResult<UploadProgress>>;

/// Drives one file's resumable upload: negotiate a location, then PUT the
/// file chunk by chunk until the store reports completion.
pub struct UploadSession {
    id: String,
    file: FileHandle,
    endpoint: String,
    transport: Arc<dyn UploadTransport>,
    reader: ChunkReader,
    rewrite: Option<LocationRewrite>,
    start_offset: u64,
    cancel: CancellationToken,
    summary: Arc<RwLock<SessionSummary>>,
}

impl UploadSession {
    pub fn new(
        file: FileHandle,
        endpoint: impl Into<String>,
        transport: Arc<dyn UploadTransport>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let summary = SessionSummary::new(id.clone(), file.name.clone(), file.total_size);
        Self {
            id,
            file,
            endpoint: endpoint.into(),
            transport,
            reader: ChunkReader::new(),
            rewrite: None,
            start_offset: 0,
            cancel: CancellationToken::new(),
            summary: Arc::new(RwLock::new(summary)),
        }
    }

    pub fn with_reader(mut self, reader: ChunkReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_rewrite(mut self, rewrite: LocationRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    /// Start the chunk loop at a previously acknowledged offset.
    pub fn resume_from(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.summary.read().state.clone()
    }

    /// Spawn the session on the runtime and hand back its event stream
    pub fn start(self) -> UploadHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = self.id.clone();
        let cancel = self.cancel.clone();
        let summary = self.summary.clone();
        let task = tokio::spawn(self.run(events_tx));

        UploadHandle {
            id,
            cancel,
            summary,
            events: UploadStream { rx: events_rx },
            task,
        }
    }

    /// Run the session to a terminal state.
    ///
    /// Progress goes to `events`; a failure is sent as the final item.
    /// After cancellation nothing more is sent.
    pub async fn run(self, events: EventSender) -> SessionState {
        let result = self.drive(&events).await;

        let state = match result {
            Ok(Some(uploaded_bytes)) => {
                info!(session = %self.id, file = %self.file.name, uploaded_bytes, "upload complete");
                SessionState::Complete { uploaded_bytes }
            }
            Ok(None) => {
                info!(session = %self.id, file = %self.file.name, "upload cancelled");
                SessionState::Cancelled
            }
            Err(e) if self.cancel.is_cancelled() => {
                debug!(session = %self.id, error = %e, "discarding error after cancellation");
                SessionState::Cancelled
            }
            Err(e) => {
                warn!(session = %self.id, file = %self.file.name, error = %e, "upload failed");
                let state = SessionState::Failed {
                    error: e.to_string(),
                };
                let _ = events.send(Err(e));
                state
            }
        };

        self.set_state(state.clone());
        state
    }

    /// Returns `Ok(None)` when cancelled.
    async fn drive(&self, events: &EventSender) -> SessionResult<Option<u64>> {
        self.set_state(SessionState::Negotiating);
        let target = match self.until_cancelled(self.negotiate()).await {
            Some(target) => target?,
            None => return Ok(None),
        };

        let total_size = self.file.total_size;
        let mut uploaded_bytes = self.start_offset;
        self.set_state(SessionState::Uploading { uploaded_bytes });
        info!(
            session = %self.id,
            file = %self.file.name,
            total_size,
            start_offset = uploaded_bytes,
            "upload started"
        );

        loop {
            let offset = uploaded_bytes;
            let chunk = match self
                .until_cancelled(self.reader.read_chunk(&self.file, offset))
                .await
            {
                Some(chunk) => chunk.map_err(|source| SessionError::Read { offset, source })?,
                None => return Ok(None),
            };

            let len = chunk.len() as u64;
            let upload = ChunkUpload {
                offset,
                content_range: ContentRange::for_chunk(offset, len, total_size),
                data: chunk.data,
            };
            debug!(session = %self.id, offset, len, range = ?upload.content_range, "sending chunk");

            let response = match self
                .until_cancelled(self.transport.put_chunk(&target.location_url, upload))
                .await
            {
                Some(response) => response.map_err(|e| SessionError::Upload {
                    offset,
                    status: None,
                    reason: e.to_string(),
                })?,
                None => return Ok(None),
            };
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            match response {
                ChunkResponse::Done => {
                    self.emit(events, UploadProgress::Complete {
                        uploaded_bytes: total_size,
                    });
                    return Ok(Some(total_size));
                }
                ChunkResponse::Continue { acknowledged } => {
                    if len == 0 {
                        return Err(SessionError::Upload {
                            offset,
                            status: Some(RESUME_INCOMPLETE),
                            reason: "store reported an empty upload as incomplete".into(),
                        });
                    }
                    if acknowledged <= offset || acknowledged > total_size {
                        return Err(SessionError::Upload {
                            offset,
                            status: Some(RESUME_INCOMPLETE),
                            reason: format!(
                                "store acknowledged {acknowledged} bytes after a chunk at offset {offset} of {total_size}"
                            ),
                        });
                    }

                    uploaded_bytes = acknowledged;
                    self.set_state(SessionState::Uploading { uploaded_bytes });
                    self.emit(events, UploadProgress::Progress { uploaded_bytes });

                    if uploaded_bytes == total_size {
                        self.emit(events, UploadProgress::Complete { uploaded_bytes });
                        return Ok(Some(total_size));
                    }
                }
                ChunkResponse::Failed { status } => {
                    return Err(SessionError::Upload {
                        offset,
                        status: Some(status),
                        reason: format!("unexpected status {status}"),
                    });
                }
            }
        }
    }

    async fn negotiate(&self) -> SessionResult<UploadTarget> {
        let response = self
            .transport
            .negotiate(&self.endpoint)
            .await
            .map_err(|e| SessionError::Negotiation(e.to_string()))?;

        if !response.is_success() {
            return Err(SessionError::Negotiation(format!(
                "endpoint returned status {}",
                response.status
            )));
        }

        let location = response
            .location
            .filter(|location| !location.is_empty())
            .ok_or_else(|| SessionError::Negotiation("response has no location header".into()))?;

        let location_url = match &self.rewrite {
            Some(rewrite) => rewrite.apply(&location),
            None => location,
        };
        debug!(session = %self.id, location = %location_url, "negotiated upload location");

        Ok(UploadTarget { location_url })
    }

    async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            output = fut => Some(output),
        }
    }

    fn emit(&self, events: &EventSender, progress: UploadProgress) {
        if self.cancel.is_cancelled() {
            return;
        }
        // The receiver may be gone; the upload still runs to completion.
        let _ = events.send(Ok(progress));
    }

    fn set_state(&self, state: SessionState) {
        let mut summary = self.summary.write();
        summary.state = state;
        summary.updated_at = chrono::Utc::now().timestamp();
    }
}

/// Owner's view of a running session.
pub struct UploadHandle {
    id: String,
    cancel: CancellationToken,
    summary: Arc<RwLock<SessionSummary>>,
    events: UploadStream,
    task: JoinHandle<SessionState>,
}

impl UploadHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.summary.read().state.clone()
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary.read().clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn events(&mut self) -> &mut UploadStream {
        &mut self.events
    }

    pub fn into_stream(self) -> UploadStream {
        self.events
    }

    /// Wait for the session to reach a terminal state
    pub async fn join(self) -> SessionState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => SessionState::Failed {
                error: format!("session task failed: {e}"),
            },
        }
    }
}

/// Stream of progress events; ends after the terminal item or on cancellation.
pub struct UploadStream {
    rx: mpsc::UnboundedReceiver<SessionResult<UploadProgress>>,
}

impl UploadStream {
    pub(crate) fn from_receiver(rx: mpsc::UnboundedReceiver<SessionResult<UploadProgress>>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<SessionResult<UploadProgress>> {
        self.rx.recv().await
    }
}

impl Stream for UploadStream {
    type Item = SessionResult<UploadProgress>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::NegotiationResponse;
    use futures::StreamExt;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    const LOCATION: &str = "https://storage.googleapis.com/upload/obj?upload_id=1";

    async fn test_file(dir: &TempDir, content: &[u8]) -> FileHandle {
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, content).await.unwrap();
        FileHandle::open(&path).await.unwrap()
    }

    fn session(file: FileHandle, mock: &Arc<MockTransport>, chunk_size: usize) -> UploadSession {
        let transport: Arc<dyn UploadTransport> = mock.clone();
        UploadSession::new(file, "http://localhost:8000/upload", transport)
            .with_reader(ChunkReader::with_max_chunk_size(chunk_size).unwrap())
    }

    async fn collect(handle: &mut UploadHandle) -> Vec<SessionResult<UploadProgress>> {
        handle.events().collect().await
    }

    fn progress(events: &[SessionResult<UploadProgress>]) -> Vec<UploadProgress> {
        events.iter().filter_map(|e| e.as_ref().ok().copied()).collect()
    }

    #[tokio::test]
    async fn test_single_chunk_upload() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![UploadProgress::Complete { uploaded_bytes: 11 }]
        );
        let puts = mock.puts();
        assert_eq!(puts.len(), 1);
        assert_eq!(puts[0].0, LOCATION);
        assert_eq!(&puts[0].1.data[..], b"hello world");
        assert_eq!(
            puts[0].1.content_range.unwrap().to_string(),
            "bytes 0-10/11"
        );
        assert_eq!(
            handle.join().await,
            SessionState::Complete { uploaded_bytes: 11 }
        );
    }

    #[tokio::test]
    async fn test_zero_byte_file_sends_one_empty_put() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"").await;
        let mock = Arc::new(MockTransport::new(LOCATION));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![UploadProgress::Complete { uploaded_bytes: 0 }]
        );
        let puts = mock.puts();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].1.data.is_empty());
        assert!(puts[0].1.content_range.is_none());
    }

    #[tokio::test]
    async fn test_zero_byte_file_incomplete_is_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 0 });

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Err(SessionError::Upload { offset: 0, .. })
        ));
        assert_eq!(mock.put_count(), 1);
    }

    #[tokio::test]
    async fn test_chunks_follow_acknowledged_offsets() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..25u8).collect();
        let file = test_file(&dir, &content).await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 10 });
        mock.push_reply(ChunkResponse::Continue { acknowledged: 20 });
        mock.push_reply(ChunkResponse::Done);

        let mut handle = session(file, &mock, 10).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![
                UploadProgress::Progress { uploaded_bytes: 10 },
                UploadProgress::Progress { uploaded_bytes: 20 },
                UploadProgress::Complete { uploaded_bytes: 25 },
            ]
        );

        let puts = mock.puts();
        let offsets: Vec<u64> = puts.iter().map(|(_, p)| p.offset).collect();
        assert_eq!(offsets, vec![0, 10, 20]);

        let ranges: Vec<String> = puts
            .iter()
            .map(|(_, p)| p.content_range.unwrap().to_string())
            .collect();
        assert_eq!(
            ranges,
            vec!["bytes 0-9/*", "bytes 10-19/*", "bytes 20-24/25"]
        );

        let reassembled: Vec<u8> = puts
            .iter()
            .flat_map(|(_, p)| p.data.to_vec())
            .collect();
        assert_eq!(reassembled, content);
    }

    #[tokio::test]
    async fn test_final_acknowledgement_completes() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"0123456789").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 10 });

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![
                UploadProgress::Progress { uploaded_bytes: 10 },
                UploadProgress::Complete { uploaded_bytes: 10 },
            ]
        );
        assert_eq!(mock.put_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_location_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION).with_negotiation(
            NegotiationResponse {
                status: 200,
                location: None,
            },
        ));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(SessionError::Negotiation(_))));
        assert_eq!(mock.negotiation_count(), 1);
        assert_eq!(mock.put_count(), 0);
        assert!(matches!(handle.join().await, SessionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_negotiation_status_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION).with_negotiation(
            NegotiationResponse {
                status: 403,
                location: Some(LOCATION.into()),
            },
        ));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        match &events[0] {
            Err(SessionError::Negotiation(message)) => assert!(message.contains("403")),
            other => panic!("Expected negotiation error, got {:?}", other),
        }
        assert_eq!(mock.put_count(), 0);
    }

    #[tokio::test]
    async fn test_negotiation_transport_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock =
            Arc::new(MockTransport::new(LOCATION).with_negotiation_error("connection refused"));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert!(matches!(events[0], Err(SessionError::Negotiation(_))));
        assert_eq!(mock.put_count(), 0);
    }

    #[tokio::test]
    async fn test_location_is_rewritten() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello").await;
        let mock = Arc::new(MockTransport::new(LOCATION));

        let mut handle = session(file, &mock, 1024)
            .with_rewrite(LocationRewrite::new(
                "https://storage.googleapis.com",
                "http://localhost:8000/fs_proxy",
            ))
            .start();
        collect(&mut handle).await;

        assert_eq!(
            mock.puts()[0].0,
            "http://localhost:8000/fs_proxy/upload/obj?upload_id=1"
        );
    }

    #[tokio::test]
    async fn test_incomplete_resumes_from_acknowledged_offset() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..100u8).collect();
        let file = test_file(&dir, &content).await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        // 308 without a Range header on bytes 0-49 decodes to 49
        mock.push_reply(ChunkResponse::decode(308, None, 0, 50));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 99 });
        mock.push_reply(ChunkResponse::Done);

        let mut handle = session(file, &mock, 50).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![
                UploadProgress::Progress { uploaded_bytes: 49 },
                UploadProgress::Progress { uploaded_bytes: 99 },
                UploadProgress::Complete {
                    uploaded_bytes: 100
                },
            ]
        );

        let puts = mock.puts();
        assert_eq!(puts[0].1.content_range.unwrap().to_string(), "bytes 0-49/*");
        assert_eq!(puts[1].1.offset, 49);
        assert_eq!(puts[1].1.data[0], 49);
        assert_eq!(puts[1].1.content_range.unwrap().to_string(), "bytes 49-98/*");
        assert_eq!(puts[2].1.content_range.unwrap().to_string(), "bytes 99-99/100");
    }

    #[tokio::test]
    async fn test_server_error_stops_upload() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..100u8).collect();
        let file = test_file(&dir, &content).await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 49 });
        mock.push_reply(ChunkResponse::Failed { status: 500 });

        let mut handle = session(file, &mock, 50).start();
        let events = collect(&mut handle).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Ok(UploadProgress::Progress { uploaded_bytes: 49 })
        ));
        let error = events[1].as_ref().unwrap_err();
        assert_eq!(error.offset(), Some(49));
        assert!(matches!(
            error,
            SessionError::Upload {
                status: Some(500),
                ..
            }
        ));
        assert_eq!(mock.put_count(), 2);
    }

    #[tokio::test]
    async fn test_put_transport_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_error("connection reset");

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert!(matches!(
            events[0],
            Err(SessionError::Upload {
                offset: 0,
                status: None,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stalled_acknowledgement_is_error() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 6 });
        mock.push_reply(ChunkResponse::Continue { acknowledged: 6 });

        let mut handle = session(file, &mock, 6).start();
        let events = collect(&mut handle).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            Err(SessionError::Upload {
                offset: 6,
                status: Some(RESUME_INCOMPLETE),
                ..
            })
        ));
        assert_eq!(mock.put_count(), 2);
    }

    #[tokio::test]
    async fn test_read_error_fails_session() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        tokio::fs::remove_file(&file.path).await.unwrap();
        let mock = Arc::new(MockTransport::new(LOCATION));

        let mut handle = session(file, &mock, 1024).start();
        let events = collect(&mut handle).await;

        assert!(matches!(
            events[0],
            Err(SessionError::Read { offset: 0, .. })
        ));
        assert_eq!(mock.put_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_from_offset() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION));

        let mut handle = session(file, &mock, 1024).resume_from(6).start();
        let events = collect(&mut handle).await;

        assert_eq!(
            progress(&events),
            vec![UploadProgress::Complete { uploaded_bytes: 11 }]
        );
        let puts = mock.puts();
        assert_eq!(&puts[0].1.data[..], b"world");
        assert_eq!(puts[0].1.content_range.unwrap().to_string(), "bytes 6-10/11");
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_response() {
        let dir = TempDir::new().unwrap();
        let content: Vec<u8> = (0..100u8).collect();
        let file = test_file(&dir, &content).await;
        let gate = Arc::new(Notify::new());
        let mock = Arc::new(MockTransport::new(LOCATION).with_gate(gate.clone()));
        mock.push_reply(ChunkResponse::Continue { acknowledged: 50 });
        mock.push_reply(ChunkResponse::Done);

        let mut handle = session(file, &mock, 50).start();
        mock.put_started.notified().await;
        handle.cancel();
        // Stale response arrives after cancellation
        gate.notify_one();

        let events = collect(&mut handle).await;
        assert!(events.is_empty());
        assert_eq!(mock.put_count(), 1);
        assert_eq!(handle.join().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"hello world").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        let token = CancellationToken::new();
        token.cancel();

        let mut handle = session(file, &mock, 1024)
            .with_cancellation(token)
            .start();
        let events = collect(&mut handle).await;

        assert!(events.is_empty());
        assert_eq!(mock.negotiation_count(), 0);
        assert_eq!(mock.put_count(), 0);
    }

    #[tokio::test]
    async fn test_run_inline() {
        let dir = TempDir::new().unwrap();
        let file = test_file(&dir, b"inline").await;
        let mock = Arc::new(MockTransport::new(LOCATION));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let state = session(file, &mock, 1024).run(tx).await;

        assert_eq!(state, SessionState::Complete { uploaded_bytes: 6 });
        assert!(matches!(
            rx.recv().await,
            Some(Ok(UploadProgress::Complete { uploaded_bytes: 6 }))
        ));
    }
}
