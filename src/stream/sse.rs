/// SSE (Server-Sent Events) frame parser, encoder, and stream utilities.
///
/// Handles the low-level parsing of SSE frames from a byte stream,
/// including buffering partial lines and handling field semantics.
use super::SseEvent;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut events = SmallVec::new();
        events.reserve(capacity);
        Self { events, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.reserve(parsed.len());
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser: incremental SSE line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            event_type: None,
            data_buffer: String::new(),
            last_event_id: None,
            retry: None,
        }
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// Line rules:
    /// - `data:` values are trimmed and appended to the frame buffer with no
    ///   separator, so a payload split over several `data:` lines is rejoined
    /// - A blank line flushes the buffer as one event when it is non-empty
    /// - Lines starting with `:` are comments, ignored
    /// - `event:`, `id:` and `retry:` are carried on the next flushed event
    /// - Unknown fields are ignored
    ///
    /// Text after the last newline stays buffered until more input arrives;
    /// nothing is flushed at end of input.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.last_event_id,
                &mut self.retry,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        last_event_id: &mut Option<String>,
        retry: &mut Option<u64>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.trim().is_empty() {
            if !data_buffer.is_empty() {
                tracing::trace!(bytes = data_buffer.len(), "SSE frame complete");
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                    retry: retry.take(),
                });
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        tracing::trace!(line = line, "SSE line");
        if let Some(value) = line.strip_prefix("data:") {
            data_buffer.push_str(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            *event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            *last_event_id = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("retry:") {
            if let Ok(ms) = value.trim().parse::<u64>() {
                *retry = Some(ms);
            }
        }
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Encode a bare `data:` frame carrying `json`.
#[must_use]
pub fn data_frame(json: &str) -> String {
    format!("data: {json}\n\n")
}

/// The `data: [DONE]` terminator frame.
#[must_use]
pub fn done_frame() -> &'static str {
    "data: [DONE]\n\n"
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Feed `bytes` to the parser, holding back an incomplete trailing UTF-8
/// sequence in `remainder` until the next chunk completes it. Invalid
/// sequences are replaced with U+FFFD.
fn feed_utf8(
    parser: &mut SseParser,
    remainder: &mut Vec<u8>,
    bytes: &[u8],
    out: &mut Vec<SseEvent>,
) {
    if remainder.is_empty() {
        if let Ok(text) = std::str::from_utf8(bytes) {
            parser.feed_into(text, out);
            return;
        }
    }
    remainder.extend_from_slice(bytes);
    loop {
        match std::str::from_utf8(remainder.as_slice()) {
            Ok(text) => {
                parser.feed_into(text, out);
                remainder.clear();
                return;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&remainder[..valid_up_to]) };
                parser.feed_into(text, out);
                match e.error_len() {
                    Some(invalid_len) => {
                        parser.feed_into(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]), out);
                        remainder.drain(..valid_up_to + invalid_len);
                    }
                    None => {
                        remainder.drain(..valid_up_to);
                        return;
                    }
                }
            }
        }
    }
}

struct FrameStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    parser: SseParser,
    remainder: Vec<u8>,
    parsed: Vec<SseEvent>,
    pending: PendingEvents,
    failed: bool,
}

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Bytes arriving from an HTTP response body are decoded as UTF-8,
/// fed into the parser, and complete [`SseEvent`] frames are yielded.
/// A transport error is yielded once, after every event completed before
/// it, and ends the stream.
pub fn sse_frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    let state = FrameStreamState {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::with_capacity(8),
        failed: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.failed {
                return None;
            }

            match state.stream.as_mut().next().await? {
                Ok(bytes) => {
                    feed_utf8(
                        &mut state.parser,
                        &mut state.remainder,
                        &bytes,
                        &mut state.parsed,
                    );
                    state.pending.extend_from_vec(&mut state.parsed);
                }
                Err(err) => {
                    state.failed = true;
                    return Some((Err(err), state));
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
