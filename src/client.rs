//! Client entry point and the chat completions resource.

use std::io::BufReader;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, Instrument};

use crate::auth::{AcceptMode, Credentials};
use crate::config::validation::validate_config;
use crate::config::ClientConfig;
use crate::error::QwenError;
use crate::observability::client_span;
use crate::observability::token_counter::{
    estimate_request_tokens, estimate_tokens, log_request_usage, merge_usage,
};
use crate::protocol::{
    decode_chat_response, encode_chat_request, ChatRequest, ChatResponse, StreamChunk,
};
use crate::stream::{ChatStream, ChunkStream, StreamHandle, StreamListener};
use crate::transport::{spawn_event_source, HttpTransport};

struct ClientInner {
    config: ClientConfig,
    credentials: Credentials,
    transport: HttpTransport,
    span: tracing::Span,
}

/// Qwen API client. Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct QwenClient {
    inner: Arc<ClientInner>,
}

impl QwenClient {
    /// # Errors
    ///
    /// Returns [`QwenError::Config`] for an invalid configuration and
    /// [`QwenError::InvalidRequest`] for unusable credentials.
    pub fn new(config: ClientConfig) -> Result<Self, QwenError> {
        validate_config(&config)?;
        let credentials = Credentials::from_config(&config)?;
        let transport = HttpTransport::new(&config)?;
        let span = client_span(config.normalized_base_url());
        span.in_scope(|| {
            debug!(
                endpoint = %transport.endpoint(),
                timeout_secs = config.timeout_duration().as_secs(),
                "Qwen client initialized"
            );
        });
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                credentials,
                transport,
                span,
            }),
        })
    }

    /// Client configured from `QWEN_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`] and [`QwenClient::new`].
    pub fn from_env() -> Result<Self, QwenError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// The chat completions resource.
    #[must_use]
    pub fn chat(&self) -> ChatCompletions {
        ChatCompletions {
            client: self.clone(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        self.inner.config.normalized_base_url()
    }

    #[must_use]
    pub fn default_model(&self) -> &str {
        self.inner.config.effective_default_model()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout_duration()
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for QwenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QwenClient")
            .field("base_url", &self.base_url())
            .field("default_model", &self.default_model())
            .finish_non_exhaustive()
    }
}

/// `POST /v1/chat/completions` in its four flavors.
///
/// The blocking operations refuse to run inside a Tokio runtime; use the
/// async variants there.
#[derive(Clone)]
pub struct ChatCompletions {
    client: QwenClient,
}

impl ChatCompletions {
    fn inner(&self) -> &ClientInner {
        &self.client.inner
    }

    fn encode(&self, request: &ChatRequest, stream: bool) -> Result<Vec<u8>, QwenError> {
        encode_chat_request(request, stream, self.inner().config.effective_default_model())
    }

    fn resolved_model<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        match request.model.trim() {
            "" => self.inner().config.effective_default_model(),
            model => model,
        }
    }

    /// Send a chat completion and wait for the full response.
    ///
    /// # Errors
    ///
    /// [`QwenError::InvalidRequest`] for an unusable request or when called
    /// from inside a Tokio runtime,
    /// [`QwenError::Transport`] when no response arrives,
    /// [`QwenError::Api`] for a non-2xx status,
    /// [`QwenError::EmptyBody`] or [`QwenError::Decode`] for an unusable body.
    pub fn create(&self, request: &ChatRequest) -> Result<ChatResponse, QwenError> {
        ensure_blocking_context("create")?;
        let inner = self.inner();
        let _enter = inner.span.enter();
        let body = self.encode(request, false)?;
        let started = Instant::now();

        let response = inner
            .transport
            .send_blocking(inner.credentials.request_headers(AcceptMode::Json), body)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().map_err(read_error)?;

        let parsed = parse_chat_response(status, &bytes)?;
        self.log_usage(request, &parsed, started.elapsed());
        Ok(parsed)
    }

    /// Async counterpart of [`create`](Self::create) with the same error
    /// mapping.
    ///
    /// # Errors
    ///
    /// See [`create`](Self::create).
    pub async fn create_async(&self, request: &ChatRequest) -> Result<ChatResponse, QwenError> {
        let span = self.inner().span.clone();
        self.create_async_inner(request).instrument(span).await
    }

    async fn create_async_inner(&self, request: &ChatRequest) -> Result<ChatResponse, QwenError> {
        let inner = self.inner();
        let body = self.encode(request, false)?;
        let started = Instant::now();

        let response = inner
            .transport
            .send(inner.credentials.request_headers(AcceptMode::Json), body)
            .await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(read_error)?;

        let parsed = parse_chat_response(status, &bytes)?;
        self.log_usage(request, &parsed, started.elapsed());
        Ok(parsed)
    }

    /// Open a streaming completion and return a blocking pull iterator over
    /// its chunks.
    ///
    /// A non-2xx status or an empty body fails here, after the response has
    /// been released.
    ///
    /// # Errors
    ///
    /// [`QwenError::InvalidRequest`], [`QwenError::Transport`],
    /// [`QwenError::Api`] or [`QwenError::EmptyBody`].
    pub fn create_stream(&self, request: &ChatRequest) -> Result<ChatStream, QwenError> {
        ensure_blocking_context("create_stream")?;
        let inner = self.inner();
        let _enter = inner.span.enter();
        let body = self.encode(request, true)?;

        let response = inner
            .transport
            .send_blocking(inner.credentials.request_headers(AcceptMode::EventStream), body)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            error!(status = status.as_u16(), body = %text, "API request failed");
            return Err(QwenError::api(status.as_u16(), &text));
        }
        if response.content_length() == Some(0) {
            error!(status = status.as_u16(), "empty response body from API");
            return Err(QwenError::EmptyBody {
                status: status.as_u16(),
            });
        }

        debug!(model = self.resolved_model(request), "SSE stream opened");
        Ok(ChunkStream::with_span(
            BufReader::new(response),
            inner.span.clone(),
        ))
    }

    /// Open a streaming completion delivered to callbacks on the current
    /// Tokio runtime. Returns as soon as the request is scheduled.
    ///
    /// `on_chunk` runs once per chunk, in arrival order, on a runtime worker.
    /// `on_complete` runs exactly once, after the last chunk: `Ok(())` on a
    /// clean close, the failure otherwise.
    ///
    /// # Errors
    ///
    /// Fails synchronously, without invoking either callback, for an unusable
    /// request or when called outside a Tokio runtime.
    pub fn create_stream_async<F, C>(
        &self,
        request: &ChatRequest,
        on_chunk: F,
        on_complete: C,
    ) -> Result<StreamHandle, QwenError>
    where
        F: FnMut(StreamChunk) + Send + 'static,
        C: FnOnce(Result<(), QwenError>) + Send + 'static,
    {
        let inner = self.inner();
        let _enter = inner.span.enter();
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(QwenError::InvalidRequest(
                "create_stream_async must be called from within a Tokio runtime".to_string(),
            ));
        }
        let body = self.encode(request, true)?;

        let client = inner.transport.async_client()?.clone();
        let http_request = inner
            .transport
            .build_request(inner.credentials.request_headers(AcceptMode::EventStream), body);
        let (tx, rx) = mpsc::channel(inner.config.stream_channel_capacity.max(1));

        debug!(model = self.resolved_model(request), "starting SSE event source");
        let producer = spawn_event_source(client, http_request, tx, inner.span.clone());
        Ok(StreamHandle::spawn(
            StreamListener::new(on_chunk, on_complete),
            rx,
            producer.abort_handle(),
            inner.span.clone(),
        ))
    }

    fn log_usage(&self, request: &ChatRequest, response: &ChatResponse, elapsed: Duration) {
        let estimated_output = response.first_content().map_or(0, estimate_tokens);
        let usage = merge_usage(
            response.usage.as_ref(),
            estimate_request_tokens(request),
            estimated_output,
        );
        let model = if response.model.is_empty() {
            self.resolved_model(request)
        } else {
            response.model.as_str()
        };
        log_request_usage(model, &usage, elapsed);
    }
}

/// The blocking reqwest client drives its own runtime and panics when used
/// from within another one.
fn ensure_blocking_context(operation: &str) -> Result<(), QwenError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        error!(operation, "blocking call made from within a Tokio runtime");
        return Err(QwenError::InvalidRequest(format!(
            "{operation} is blocking and cannot be called from within a Tokio runtime; use the async variant"
        )));
    }
    Ok(())
}

fn read_error(err: reqwest::Error) -> QwenError {
    error!(error = %err, "failed to read response body");
    QwenError::transport(format!("Failed to read response body: {err}"))
}

/// Map a buffered non-streaming response to a [`ChatResponse`] or an error.
fn parse_chat_response(status: u16, body: &[u8]) -> Result<ChatResponse, QwenError> {
    if !(200..300).contains(&status) {
        let text = String::from_utf8_lossy(body);
        error!(status, body = %text, "API request failed");
        return Err(QwenError::api(status, &text));
    }
    if body.is_empty() {
        error!(status, "empty response body from API");
        return Err(QwenError::EmptyBody { status });
    }
    tracing::trace!(body = %String::from_utf8_lossy(body), "response JSON");
    decode_chat_response(body)
}
