//! Push-mode stream delivery: a transport task feeds [`SourceEvent`]s into a
//! bounded channel and a single consumer task decodes them and invokes the
//! caller's sinks in arrival order.

use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::SseEvent;
use crate::error::QwenError;
use crate::protocol::{decode_stream_chunk, StreamChunk};

/// Raw transport signal delivered to a [`StreamListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Response headers arrived with a success status.
    Open { status: u16 },
    Event(SseEvent),
    /// The body ended cleanly.
    Closed,
    /// The request failed, was rejected, or the body broke mid-stream.
    Failure {
        status: Option<u16>,
        body: Option<String>,
        cause: Option<String>,
    },
}

impl SourceEvent {
    #[must_use]
    pub fn data(data: impl Into<String>) -> Self {
        SourceEvent::Event(SseEvent {
            data: data.into(),
            ..SseEvent::default()
        })
    }
}

/// Decodes inbound events and drives the two caller sinks.
///
/// `on_chunk` fires once per decoded chunk. `on_complete` fires exactly once
/// per stream; anything arriving after it is ignored.
pub struct StreamListener<F, C> {
    on_chunk: F,
    on_complete: Option<C>,
}

impl<F, C> StreamListener<F, C>
where
    F: FnMut(StreamChunk),
    C: FnOnce(Result<(), QwenError>),
{
    pub fn new(on_chunk: F, on_complete: C) -> Self {
        Self {
            on_chunk,
            on_complete: Some(on_complete),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.on_complete.is_none()
    }

    /// Handle one transport signal. Breaks once the stream is terminal.
    pub fn on_event(&mut self, event: SourceEvent) -> ControlFlow<()> {
        if self.is_completed() {
            debug!(?event, "ignoring event after completion");
            return ControlFlow::Break(());
        }
        match event {
            SourceEvent::Open { status } => {
                info!(status, "SSE connection opened.");
                ControlFlow::Continue(())
            }
            SourceEvent::Event(event) => {
                if event.is_done() {
                    debug!("received [DONE]");
                    return ControlFlow::Continue(());
                }
                match decode_stream_chunk(&event.data) {
                    Ok(chunk) => (self.on_chunk)(chunk),
                    Err(err) => warn!(error = %err, data = %event.data, "skipping malformed SSE frame"),
                }
                ControlFlow::Continue(())
            }
            SourceEvent::Closed => {
                info!("SSE connection closed.");
                self.complete(Ok(()));
                ControlFlow::Break(())
            }
            SourceEvent::Failure {
                status,
                body,
                cause,
            } => {
                let err = failure_error(status, body.as_deref(), cause.as_deref());
                self.complete(Err(err));
                ControlFlow::Break(())
            }
        }
    }

    /// Fire the completion sink. Returns `false` if it had already fired.
    pub fn complete(&mut self, result: Result<(), QwenError>) -> bool {
        match self.on_complete.take() {
            Some(on_complete) => {
                on_complete(result);
                true
            }
            None => {
                debug!("completion already delivered");
                false
            }
        }
    }

    /// Consume events until a terminal one, the channel closing, or `cancel`.
    pub async fn run(mut self, mut events: mpsc::Receiver<SourceEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("SSE stream cancelled");
                    self.complete(Err(QwenError::Cancelled));
                    return;
                }
                event = events.recv() => event,
            };
            match event {
                Some(event) => {
                    if self.on_event(event).is_break() {
                        return;
                    }
                }
                None => {
                    error!("SSE event source ended without a terminal event");
                    self.complete(Err(QwenError::transport(
                        "SSE connection dropped without a close or failure signal",
                    )));
                    return;
                }
            }
        }
    }
}

fn failure_error(status: Option<u16>, body: Option<&str>, cause: Option<&str>) -> QwenError {
    let cause = cause.unwrap_or("unknown error");
    match status {
        Some(status) => {
            error!(
                status,
                body = body.unwrap_or(""),
                "SSE connection failed: {cause} (status code: {status})"
            );
            QwenError::api(status, body.unwrap_or(""))
        }
        None => {
            error!("SSE connection failed: {cause}");
            QwenError::transport(format!("SSE connection failed: {cause}"))
        }
    }
}

/// Handle to a running push-mode stream.
///
/// Dropping the handle leaves the stream running; use [`cancel`](Self::cancel)
/// to stop it.
pub struct StreamHandle {
    cancel: CancellationToken,
    consumer: JoinHandle<()>,
    producer: AbortHandle,
}

impl StreamHandle {
    /// Spawn the consumer task for `listener` on the current runtime.
    pub fn spawn<F, C>(
        listener: StreamListener<F, C>,
        events: mpsc::Receiver<SourceEvent>,
        producer: AbortHandle,
        span: tracing::Span,
    ) -> Self
    where
        F: FnMut(StreamChunk) + Send + 'static,
        C: FnOnce(Result<(), QwenError>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(listener.run(events, cancel.clone()).instrument(span));
        Self {
            cancel,
            consumer,
            producer,
        }
    }

    /// Stop the stream and release the connection. The completion sink
    /// receives [`QwenError::Cancelled`] unless it already fired.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.producer.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.consumer.is_finished()
    }

    /// Wait until the completion sink has fired.
    pub async fn join(self) {
        if let Err(err) = self.consumer.await {
            if err.is_panic() {
                error!("stream callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Record = Arc<Mutex<Vec<String>>>;

    fn recording_listener(
        log: &Record,
    ) -> StreamListener<impl FnMut(StreamChunk), impl FnOnce(Result<(), QwenError>)> {
        let chunks = Arc::clone(log);
        let completions = Arc::clone(log);
        StreamListener::new(
            move |chunk: StreamChunk| {
                chunks
                    .lock()
                    .unwrap()
                    .push(format!("chunk:{}", chunk.delta_text()));
            },
            move |result: Result<(), QwenError>| {
                let entry = match result {
                    Ok(()) => "complete".to_string(),
                    Err(err) => {
                        let detail = err.detail().map_or_else(|| err.to_string(), str::to_owned);
                        format!("failed:{}:{detail}", err.status_code())
                    }
                };
                completions.lock().unwrap().push(entry);
            },
        )
    }

    async fn run_events(events: Vec<SourceEvent>) -> Vec<String> {
        let log = Record::default();
        let listener = recording_listener(&log);
        let (tx, rx) = mpsc::channel(8);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        listener.run(rx, CancellationToken::new()).await;
        let entries = log.lock().unwrap().clone();
        entries
    }

    #[tokio::test]
    async fn test_chunk_then_close() {
        let log = run_events(vec![
            SourceEvent::Open { status: 200 },
            SourceEvent::data(r#"{"id":"c1","choices":[{"delta":{"content":"Hi"}}]}"#),
            SourceEvent::Closed,
            SourceEvent::data(r#"{"id":"c2","choices":[{"delta":{"content":"late"}}]}"#),
        ])
        .await;
        assert_eq!(log, ["chunk:Hi", "complete"]);
    }

    #[tokio::test]
    async fn test_failure_with_status_and_body() {
        let log = run_events(vec![SourceEvent::Failure {
            status: Some(500),
            body: Some(r#"{"error":{"message":"boom"}}"#.to_string()),
            cause: Some("Internal Server Error".to_string()),
        }])
        .await;
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("failed:500:"));
        assert!(log[0].contains("boom"));
    }

    #[tokio::test]
    async fn test_failure_without_status_is_transport() {
        let log = run_events(vec![SourceEvent::Failure {
            status: None,
            body: None,
            cause: Some("connection refused".to_string()),
        }])
        .await;
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("failed:0:"));
        assert!(log[0].contains("connection refused"));
    }

    #[tokio::test]
    async fn test_done_sentinel_is_suppressed() {
        let log = run_events(vec![
            SourceEvent::data(r#"{"id":"c1","choices":[{"delta":{"content":"a"}}]}"#),
            SourceEvent::data("[DONE]"),
            SourceEvent::Closed,
        ])
        .await;
        assert_eq!(log, ["chunk:a", "complete"]);
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_fail_stream() {
        let log = run_events(vec![
            SourceEvent::data("{broken"),
            SourceEvent::data(r#"{"id":"c2","choices":[{"delta":{"content":"b"}}]}"#),
            SourceEvent::Closed,
        ])
        .await;
        assert_eq!(log, ["chunk:b", "complete"]);
    }

    #[tokio::test]
    async fn test_close_and_failure_race_fires_once() {
        let log = run_events(vec![
            SourceEvent::Closed,
            SourceEvent::Failure {
                status: Some(502),
                body: None,
                cause: None,
            },
        ])
        .await;
        assert_eq!(log, ["complete"]);
    }

    #[tokio::test]
    async fn test_channel_dropped_without_terminal_event() {
        let log = run_events(vec![SourceEvent::Open { status: 200 }]).await;
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("failed:0:"));
    }

    #[test]
    fn test_complete_is_set_once() {
        let log = Record::default();
        let mut listener = recording_listener(&log);
        assert!(listener.complete(Ok(())));
        assert!(!listener.complete(Err(QwenError::Cancelled)));
        assert!(listener.is_completed());
        assert!(listener.on_event(SourceEvent::Closed).is_break());
        assert_eq!(*log.lock().unwrap(), ["complete"]);
    }

    #[tokio::test]
    async fn test_cancel_surfaces_cancelled_once() {
        let log = Record::default();
        let (tx, rx) = mpsc::channel(8);
        let producer = tokio::spawn(std::future::pending::<()>());
        let handle = StreamHandle::spawn(
            recording_listener(&log),
            rx,
            producer.abort_handle(),
            tracing::Span::none(),
        );
        tx.send(SourceEvent::Open { status: 200 }).await.unwrap();
        handle.cancel();
        handle.cancel();
        handle.join().await;

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("cancelled"));
        assert!(producer.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_silent() {
        let log = Record::default();
        let (tx, rx) = mpsc::channel(8);
        let producer = tokio::spawn(async {});
        let handle = StreamHandle::spawn(
            recording_listener(&log),
            rx,
            producer.abort_handle(),
            tracing::Span::none(),
        );
        tx.send(SourceEvent::Closed).await.unwrap();
        while !handle.is_finished() {
            tokio::task::yield_now().await;
        }
        handle.cancel();
        handle.join().await;
        assert_eq!(*log.lock().unwrap(), ["complete"]);
    }
}
