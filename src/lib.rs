//! Resumable, chunked file uploads for the test harness file store.
//!
//! A [`session::UploadSession`] negotiates an upload location, then streams a
//! local file to it in bounded chunks, following the store's "resume
//! incomplete" acknowledgements. [`orchestrator::UploadOrchestrator`] runs one
//! session at a time on behalf of the file-store view.

pub mod chunk;
pub mod config;
pub mod orchestrator;
pub mod session;
pub mod transport;
