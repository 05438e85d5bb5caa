pub mod error;
pub mod session;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use session::{UploadHandle, UploadSession, UploadStream};
pub use types::{progress_percent, SessionState, SessionSummary, UploadProgress, UploadTarget};
