pub mod error;
pub mod reader;
pub mod types;

pub use error::{ChunkError, Result};
pub use reader::{ChunkReader, MAX_CHUNK_SIZE};
pub use types::{Chunk, ChunkRequest, FileHandle};
