use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::stream::sse::sse_frame_stream;
use crate::stream::SourceEvent;

/// Spawn the task that executes `request` and forwards its SSE body into
/// `events`.
///
/// Exactly one terminal event (`Closed` or `Failure`) is sent unless the
/// receiver goes away first. The response body is dropped, and the
/// connection released, as soon as the task ends or is aborted.
pub fn spawn_event_source(
    client: reqwest::Client,
    request: reqwest::Request,
    events: mpsc::Sender<SourceEvent>,
    span: tracing::Span,
) -> JoinHandle<()> {
    tokio::spawn(run_event_source(client, request, events).instrument(span))
}

async fn run_event_source(
    client: reqwest::Client,
    request: reqwest::Request,
    events: mpsc::Sender<SourceEvent>,
) {
    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(err) => {
            let _ = events
                .send(SourceEvent::Failure {
                    status: None,
                    body: None,
                    cause: Some(err.to_string()),
                })
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let cause = status
            .canonical_reason()
            .map_or_else(|| format!("HTTP {}", status.as_u16()), str::to_owned);
        let body = response.text().await.ok();
        let _ = events
            .send(SourceEvent::Failure {
                status: Some(status.as_u16()),
                body,
                cause: Some(cause),
            })
            .await;
        return;
    }

    if events
        .send(SourceEvent::Open {
            status: status.as_u16(),
        })
        .await
        .is_err()
    {
        return;
    }

    let mut frames = std::pin::pin!(sse_frame_stream(response.bytes_stream()));
    while let Some(frame) = frames.next().await {
        let event = match frame {
            Ok(event) => SourceEvent::Event(event),
            Err(err) => SourceEvent::Failure {
                status: None,
                body: None,
                cause: Some(format!("Error reading SSE stream: {err}")),
            },
        };
        let terminal = matches!(event, SourceEvent::Failure { .. });
        if events.send(event).await.is_err() {
            debug!("stream listener gone, dropping SSE connection");
            return;
        }
        if terminal {
            return;
        }
    }

    let _ = events.send(SourceEvent::Closed).await;
}
