mod error;
mod orchestrator;
mod types;

pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::UploadOrchestrator;
pub use types::{
    ErrorReporter, ListingRefresher, UploadAnnouncer, UploadStatus, ANNOUNCE_UPLOAD_COMPLETE,
    ANNOUNCE_UPLOAD_STARTED,
};
