use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadProgress {
    /// Bytes the store has durably acknowledged so far
    Progress { uploaded_bytes: u64 },
    Complete { uploaded_bytes: u64 },
}

impl UploadProgress {
    pub fn uploaded_bytes(&self) -> u64 {
        match self {
            UploadProgress::Progress { uploaded_bytes }
            | UploadProgress::Complete { uploaded_bytes } => *uploaded_bytes,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, UploadProgress::Complete { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadTarget {
    pub location_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Uploading { uploaded_bytes: u64 },
    Complete { uploaded_bytes: u64 },
    Failed { error: String },
    Cancelled,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Negotiating | SessionState::Uploading { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub file_name: String,
    pub total_bytes: u64,
    pub state: SessionState,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionSummary {
    pub fn new(session_id: String, file_name: String, total_bytes: u64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            session_id,
            file_name,
            total_bytes,
            state: SessionState::Negotiating,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn progress_percent(&self) -> f32 {
        let (uploaded, complete) = match self.state {
            SessionState::Uploading { uploaded_bytes } => (uploaded_bytes, false),
            SessionState::Complete { uploaded_bytes } => (uploaded_bytes, true),
            _ => (0, false),
        };
        progress_percent(uploaded, self.total_bytes, complete)
    }
}

/// Share of `total` bytes acknowledged. A completed upload is always 100%,
/// including an empty file.
pub fn progress_percent(uploaded: u64, total: u64, complete: bool) -> f32 {
    if complete {
        return 100.0;
    }
    if total == 0 {
        return 0.0;
    }
    (uploaded as f32 / total as f32) * 100.0
}
