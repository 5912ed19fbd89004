/// Error type shared by the blocking, async and streaming chat paths.
#[derive(Debug, thiserror::Error)]
pub enum QwenError {
    #[error("Transport error: {message}")]
    Transport { message: String },
    #[error("API request failed with status code {status}: {message}")]
    Api {
        status: u16,
        message: String,
        detail: String,
    },
    #[error("Empty response body from API (status={status})")]
    EmptyBody { status: u16 },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("No more chunks in SSE stream")]
    Exhausted,
    #[error("Stream cancelled")]
    Cancelled,
}

impl QwenError {
    /// Build an API error from a non-2xx status and the raw response body.
    #[must_use]
    pub fn api(status: u16, body: &str) -> Self {
        let message = extract_error_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                "Unknown API error".to_string()
            } else {
                body.to_string()
            }
        });
        QwenError::Api {
            status,
            message,
            detail: body.to_string(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        QwenError::Transport {
            message: message.into(),
        }
    }

    /// HTTP status carried by the error, `0` when no response was received.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            QwenError::Api { status, .. } | QwenError::EmptyBody { status } => *status,
            _ => 0,
        }
    }

    /// Server-provided error detail, when a response body was available.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            QwenError::Api { detail, .. } => Some(detail.as_str()),
            QwenError::EmptyBody { .. } => Some("Empty response body"),
            _ => None,
        }
    }

    /// Whether a caller-side retry could plausibly succeed. This crate never
    /// retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            QwenError::Transport { .. } => true,
            QwenError::Api { status, .. } => matches!(status, 429 | 500..=599),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for QwenError {
    fn from(err: reqwest::Error) -> Self {
        QwenError::transport(err.to_string())
    }
}

impl From<serde_json::Error> for QwenError {
    fn from(err: serde_json::Error) -> Self {
        QwenError::Decode(err.to_string())
    }
}

impl From<crate::config::ConfigError> for QwenError {
    fn from(err: crate::config::ConfigError) -> Self {
        QwenError::Config(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Server error bodies
// ---------------------------------------------------------------------------

/// Pull the human-readable message out of a server error body.
///
/// Recognized shapes: `{"error":{"message":..}}`, `{"error":".."}`,
/// `{"message":..}` and `{"detail":..}`.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidate = match value.get("error") {
        Some(serde_json::Value::Object(obj)) => obj.get("message"),
        Some(err @ serde_json::Value::String(_)) => Some(err),
        _ => value.get("message").or_else(|| value.get("detail")),
    }?;
    candidate.as_str().map(str::to_owned)
}
