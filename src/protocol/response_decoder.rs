use crate::error::QwenError;

use super::{ChatResponse, StreamChunk};

const DONE_SENTINEL: &str = "[DONE]";

/// Check whether an SSE data payload is the `[DONE]` stream terminator.
///
/// Comparison ignores surrounding whitespace and ASCII case.
#[must_use]
pub fn is_done_payload(data: &str) -> bool {
    data.trim().eq_ignore_ascii_case(DONE_SENTINEL)
}

/// Decode a full (non-streaming) chat response body.
///
/// # Errors
///
/// Returns [`QwenError::Decode`] when the body is not a chat response object.
pub fn decode_chat_response(body: &[u8]) -> Result<ChatResponse, QwenError> {
    serde_json::from_slice(body)
        .map_err(|err| QwenError::Decode(format!("Failed to parse chat response: {err}")))
}

/// Decode one SSE frame payload into a [`StreamChunk`].
///
/// Callers are expected to filter the `[DONE]` sentinel with
/// [`is_done_payload`] first; it is not valid JSON.
///
/// # Errors
///
/// Returns [`QwenError::Decode`] for malformed JSON. Streaming callers treat
/// this as local to the frame and keep reading.
pub fn decode_stream_chunk(data: &str) -> Result<StreamChunk, QwenError> {
    serde_json::from_str(data)
        .map_err(|err| QwenError::Decode(format!("Failed to parse SSE JSON: {err}")))
}
