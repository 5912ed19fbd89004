pub mod pull;
pub mod push;
pub mod sse;

pub use pull::{ChatStream, ChunkStream};
pub use push::{SourceEvent, StreamHandle, StreamListener};
pub use sse::{sse_frame_stream, SseParser};

use crate::protocol::is_done_payload;

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Whether this frame is the `[DONE]` stream terminator.
    #[must_use]
    pub fn is_done(&self) -> bool {
        is_done_payload(&self.data)
    }
}
