use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status the storage endpoint uses for "incomplete, resume from here"
pub const RESUME_INCOMPLETE: u16 = 308;

/// Inclusive byte range sent with every non-empty chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
    /// Known only on the chunk that reaches end of file
    pub total: Option<u64>,
}

impl ContentRange {
    /// Range for `len` bytes at `offset` of a `total_size` byte file.
    /// Empty chunks carry no range.
    pub fn for_chunk(offset: u64, len: u64, total_size: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let end = offset + len;
        Some(Self {
            first: offset,
            last: end - 1,
            total: (end == total_size).then_some(total_size),
        })
    }

    pub fn is_final(&self) -> bool {
        self.total.is_some()
    }

    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.total {
            Some(total) => write!(f, "bytes {}-{}/{}", self.first, self.last, total),
            None => write!(f, "bytes {}-{}/*", self.first, self.last),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    pub offset: u64,
    pub data: Bytes,
    pub content_range: Option<ContentRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationResponse {
    pub status: u16,
    pub location: Option<String>,
}

impl NegotiationResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of a chunk PUT, decoded from the raw HTTP status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkResponse {
    /// Any 2xx: the upload is finished
    Done,
    /// 308: the store holds `acknowledged` bytes and wants more
    Continue { acknowledged: u64 },
    Failed { status: u16 },
}

impl ChunkResponse {
    /// Decode a chunk PUT response.
    ///
    /// A 308 carrying `Range: bytes=0-N` acknowledges `N + 1` bytes. Without a
    /// usable `Range` header (missing, malformed or `N + 1` overflowing) the
    /// acknowledged offset is `offset + len - 1`.
    pub fn decode(status: u16, range: Option<&str>, offset: u64, len: u64) -> Self {
        match status {
            200..=299 => ChunkResponse::Done,
            RESUME_INCOMPLETE => {
                let acknowledged = parse_range_end(range)
                    .and_then(|end| end.checked_add(1))
                    .unwrap_or_else(|| offset.saturating_add(len).saturating_sub(1));
                ChunkResponse::Continue { acknowledged }
            }
            status => ChunkResponse::Failed { status },
        }
    }
}

/// Last persisted byte index from a `Range: bytes=0-N` response header
pub fn parse_range_end(range: Option<&str>) -> Option<u64> {
    // Uploads are append-only, so the persisted range always starts at zero.
    range?.trim().strip_prefix("bytes=0-")?.parse::<u64>().ok()
}
