use serde::{Deserialize, Serialize};

use crate::session::progress_percent;

pub const ANNOUNCE_UPLOAD_STARTED: &str = "Uploading file";
pub const ANNOUNCE_UPLOAD_COMPLETE: &str = "Upload complete";

/// Reloads the remote file listing after a finished upload.
pub trait ListingRefresher: Send + Sync {
    fn refresh_listing(&self);
}

/// Shows a human-readable failure to the user.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, message: &str);
}

/// Status announcements, e.g. for a screen reader live region.
pub trait UploadAnnouncer: Send + Sync {
    fn announce(&self, message: &str);
}

/// What the UI renders for the current upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadStatus {
    pub is_uploading: bool,
    pub file_name: Option<String>,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// Last offset the store acknowledged, kept after a failure for resuming
    pub last_acknowledged: u64,
    /// Most recent upload finished; `uploaded_bytes` is reset to 0 by then
    pub completed: bool,
}

impl UploadStatus {
    pub fn progress_percent(&self) -> f32 {
        progress_percent(self.uploaded_bytes, self.total_bytes, self.completed)
    }
}
