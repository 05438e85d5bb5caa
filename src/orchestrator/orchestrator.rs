use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::{ChunkReader, FileHandle};
use crate::config::{LocationRewrite, UploadConfig};
use crate::orchestrator::error::{OrchestratorError, OrchestratorResult};
use crate::orchestrator::types::{
    ErrorReporter, ListingRefresher, UploadAnnouncer, UploadStatus, ANNOUNCE_UPLOAD_COMPLETE,
    ANNOUNCE_UPLOAD_STARTED,
};
use crate::session::{SessionError, UploadProgress, UploadSession, UploadStream};
use crate::transport::UploadTransport;

struct ActiveUpload {
    session_id: String,
    file_name: String,
    cancel: CancellationToken,
}

/// Runs at most one upload at a time on behalf of the file-store view.
pub struct UploadOrchestrator {
    transport: Arc<dyn UploadTransport>,
    reader: ChunkReader,
    rewrite: LocationRewrite,
    refresher: Arc<dyn ListingRefresher>,
    reporter: Arc<dyn ErrorReporter>,
    announcer: Arc<dyn UploadAnnouncer>,
    status: Arc<RwLock<UploadStatus>>,
    active: Arc<Mutex<Option<ActiveUpload>>>,
}

impl UploadOrchestrator {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        config: &UploadConfig,
        refresher: Arc<dyn ListingRefresher>,
        reporter: Arc<dyn ErrorReporter>,
        announcer: Arc<dyn UploadAnnouncer>,
    ) -> OrchestratorResult<Self> {
        config.validate()?;
        let reader = ChunkReader::with_max_chunk_size(config.max_chunk_size)?;

        Ok(Self {
            transport,
            reader,
            rewrite: config.location_rewrite(),
            refresher,
            reporter,
            announcer,
            status: Arc::new(RwLock::new(UploadStatus::default())),
            active: Arc::new(Mutex::new(None)),
        })
    }

    /// Start uploading `file` through `endpoint`.
    ///
    /// Fails with `AlreadyUploading` while another upload is active. Must be
    /// called from within a tokio runtime.
    pub fn upload(
        &self,
        file: FileHandle,
        endpoint: impl Into<String>,
    ) -> OrchestratorResult<UploadStream> {
        self.start(file, endpoint.into(), 0)
    }

    /// Open the file at `path` and upload it
    pub async fn upload_path(
        &self,
        path: impl AsRef<Path>,
        endpoint: impl Into<String>,
    ) -> OrchestratorResult<UploadStream> {
        let file = FileHandle::open(path).await?;
        self.upload(file, endpoint)
    }

    /// Start a fresh session whose chunk loop begins at `offset`, typically
    /// [`UploadStatus::last_acknowledged`] from a failed attempt.
    pub fn resume(
        &self,
        file: FileHandle,
        endpoint: impl Into<String>,
        offset: u64,
    ) -> OrchestratorResult<UploadStream> {
        self.start(file, endpoint.into(), offset)
    }

    /// Cancel the active upload. Returns false when nothing was running.
    pub fn cancel(&self) -> bool {
        match self.active.lock().as_ref() {
            Some(active) => {
                info!(session = %active.session_id, file = %active.file_name, "cancelling upload");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> UploadStatus {
        self.status.read().clone()
    }

    pub fn is_uploading(&self) -> bool {
        self.status.read().is_uploading
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.status.read().uploaded_bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.status.read().total_bytes
    }

    pub fn progress_percent(&self) -> f32 {
        self.status.read().progress_percent()
    }

    pub fn last_acknowledged(&self) -> u64 {
        self.status.read().last_acknowledged
    }

    fn start(
        &self,
        file: FileHandle,
        endpoint: String,
        offset: u64,
    ) -> OrchestratorResult<UploadStream> {
        let handle = {
            let mut active = self.active.lock();
            if let Some(current) = active.as_ref() {
                return Err(OrchestratorError::AlreadyUploading(
                    current.file_name.clone(),
                ));
            }

            let handle = UploadSession::new(file.clone(), endpoint, self.transport.clone())
                .with_reader(self.reader)
                .with_rewrite(self.rewrite.clone())
                .resume_from(offset)
                .start();

            *active = Some(ActiveUpload {
                session_id: handle.id().to_string(),
                file_name: file.name.clone(),
                cancel: handle.cancel_token(),
            });
            handle
        };

        {
            let mut status = self.status.write();
            status.is_uploading = true;
            status.file_name = Some(file.name.clone());
            status.uploaded_bytes = offset;
            status.total_bytes = file.total_size;
            status.last_acknowledged = offset;
            status.completed = false;
        }
        self.announcer.announce(ANNOUNCE_UPLOAD_STARTED);

        let session_id = handle.id().to_string();
        let cancel = handle.cancel_token();
        let mut events = handle.into_stream();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = UploadWorker {
            session_id,
            cancel,
            refresher: self.refresher.clone(),
            reporter: self.reporter.clone(),
            announcer: self.announcer.clone(),
            status: self.status.clone(),
            active: self.active.clone(),
        };

        tokio::spawn(async move {
            while let Some(item) = events.next().await {
                match &item {
                    Ok(UploadProgress::Progress { uploaded_bytes }) => {
                        worker.on_progress(*uploaded_bytes)
                    }
                    Ok(UploadProgress::Complete { uploaded_bytes }) => {
                        worker.on_complete(*uploaded_bytes)
                    }
                    Err(e) => worker.on_error(&e.to_string()),
                }
                // The caller may have dropped the stream; bookkeeping above still applies.
                let _ = tx.send(item);
            }
            if let Some(error) = worker.finish() {
                let _ = tx.send(Err(error));
            }
        });

        Ok(UploadStream::from_receiver(rx))
    }
}

/// Applies one session's events to the shared view state.
struct UploadWorker {
    session_id: String,
    cancel: CancellationToken,
    refresher: Arc<dyn ListingRefresher>,
    reporter: Arc<dyn ErrorReporter>,
    announcer: Arc<dyn UploadAnnouncer>,
    status: Arc<RwLock<UploadStatus>>,
    active: Arc<Mutex<Option<ActiveUpload>>>,
}

impl UploadWorker {
    fn on_progress(&self, uploaded_bytes: u64) {
        let mut status = self.status.write();
        status.uploaded_bytes = uploaded_bytes;
        status.last_acknowledged = uploaded_bytes;
    }

    fn on_complete(&self, uploaded_bytes: u64) {
        info!(session = %self.session_id, uploaded_bytes, "upload finished, refreshing listing");
        {
            let mut status = self.status.write();
            status.is_uploading = false;
            status.uploaded_bytes = 0;
            status.last_acknowledged = uploaded_bytes;
            status.completed = true;
        }
        self.release();
        self.refresher.refresh_listing();
        self.announcer.announce(ANNOUNCE_UPLOAD_COMPLETE);
    }

    fn on_error(&self, message: &str) {
        warn!(session = %self.session_id, error = %message, "upload failed");
        self.status.write().is_uploading = false;
        self.release();
        self.reporter.report_error(message);
    }

    /// Stream ended. If no terminal event was seen and the upload was not
    /// cancelled, the session task died; that is reported as a failure.
    fn finish(&self) -> Option<SessionError> {
        {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(current) if current.session_id == self.session_id => {}
                _ => return None,
            }
            // Cleared under the lock so a newer upload cannot be overwritten.
            self.status.write().is_uploading = false;
            *active = None;
        }

        if self.cancel.is_cancelled() {
            debug!(session = %self.session_id, "upload stream closed after cancellation");
            return None;
        }

        let error = SessionError::Upload {
            offset: self.status.read().last_acknowledged,
            status: None,
            reason: "upload session ended without a result".into(),
        };
        warn!(session = %self.session_id, error = %error, "upload session terminated unexpectedly");
        self.reporter.report_error(&error.to_string());
        Some(error)
    }

    fn release(&self) -> bool {
        let mut active = self.active.lock();
        match active.as_ref() {
            Some(current) if current.session_id == self.session_id => {
                *active = None;
                true
            }
            _ => false,
        }
    }
}
