//! Blocking pull iterator over a streaming chat response.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader};

use tracing::{debug, error, warn};

use super::sse::SseParser;
use super::SseEvent;
use crate::error::QwenError;
use crate::protocol::{decode_stream_chunk, is_done_payload, StreamChunk};

/// Pull iterator over a live blocking HTTP response.
pub type ChatStream = ChunkStream<BufReader<reqwest::blocking::Response>>;

enum State {
    Reading,
    Ready(StreamChunk),
    Failed(QwenError),
    Finished,
}

/// Forward-only, single-pass iterator of [`StreamChunk`]s read from an SSE
/// body.
///
/// The reader is owned exclusively and released exactly once: when the
/// `[DONE]` sentinel arrives, when the body ends, on a read error, on
/// [`close`](Self::close), or on drop, whichever comes first. Malformed frames
/// are logged and skipped. Probing may block on the next network read.
pub struct ChunkStream<R> {
    reader: Option<R>,
    parser: SseParser,
    parsed: Vec<SseEvent>,
    pending: VecDeque<SseEvent>,
    line: Vec<u8>,
    state: State,
    span: tracing::Span,
}

impl<R: BufRead> ChunkStream<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self::with_span(reader, tracing::Span::none())
    }

    /// Iterator whose reads and log events run inside `span`.
    #[must_use]
    pub fn with_span(reader: R, span: tracing::Span) -> Self {
        Self {
            reader: Some(reader),
            parser: SseParser::new(),
            parsed: Vec::with_capacity(4),
            pending: VecDeque::new(),
            line: Vec::with_capacity(256),
            state: State::Reading,
            span,
        }
    }

    /// Whether another chunk is available, reading ahead if none is buffered.
    pub fn has_next(&mut self) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        loop {
            match self.state {
                State::Ready(_) => return true,
                State::Failed(_) | State::Finished => return false,
                State::Reading => {}
            }

            match self.next_frame() {
                Ok(Some(data)) => {
                    if is_done_payload(&data) {
                        debug!("received [DONE], finishing SSE stream");
                        self.finish();
                        continue;
                    }
                    match decode_stream_chunk(&data) {
                        Ok(chunk) => self.state = State::Ready(chunk),
                        Err(err) => warn!(error = %err, data = %data, "skipping malformed SSE frame"),
                    }
                }
                Ok(None) => {
                    debug!("SSE stream ended");
                    self.finish();
                }
                Err(err) => {
                    error!(error = %err, "error reading SSE stream");
                    self.release();
                    self.state =
                        State::Failed(QwenError::transport(format!("Error reading SSE stream: {err}")));
                }
            }
        }
    }

    /// Take the buffered chunk, probing first if necessary.
    ///
    /// # Errors
    ///
    /// Returns the stream's transport error once if reading failed, and
    /// [`QwenError::Exhausted`] when nothing is left.
    pub fn take_next(&mut self) -> Result<StreamChunk, QwenError> {
        if !self.has_next() {
            return match std::mem::replace(&mut self.state, State::Finished) {
                State::Failed(err) => Err(err),
                _ => Err(QwenError::Exhausted),
            };
        }
        match std::mem::replace(&mut self.state, State::Reading) {
            State::Ready(chunk) => Ok(chunk),
            other => {
                self.state = other;
                Err(QwenError::Exhausted)
            }
        }
    }

    /// Next complete frame payload, or `None` once the body is exhausted.
    fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event.data));
            }
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            self.line.clear();
            if reader.read_until(b'\n', &mut self.line)? == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&self.line);
            self.parser.feed_into(&text, &mut self.parsed);
            self.pending.extend(self.parsed.drain(..));
        }
    }
}

impl<R> ChunkStream<R> {
    /// Release the underlying reader and discard anything buffered.
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        self.finish();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    fn finish(&mut self) {
        self.release();
        self.pending.clear();
        if !matches!(self.state, State::Failed(_)) {
            self.state = State::Finished;
        }
    }

    fn release(&mut self) {
        if let Some(reader) = self.reader.take() {
            drop(reader);
            let _enter = self.span.enter();
            debug!("SSE stream closed");
        }
    }
}

impl<R: BufRead> Iterator for ChunkStream<R> {
    type Item = Result<StreamChunk, QwenError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.take_next() {
            Ok(chunk) => Some(Ok(chunk)),
            Err(QwenError::Exhausted) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

impl<R> Drop for ChunkStream<R> {
    fn drop(&mut self) {
        self.release();
    }
}
