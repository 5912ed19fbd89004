use std::fmt;

use http::header::{HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, COOKIE};

use crate::config::ClientConfig;
use crate::error::QwenError;

const APPLICATION_JSON: &str = "application/json";
const TEXT_EVENT_STREAM: &str = "text/event-stream";

/// Response mode selected through the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptMode {
    Json,
    EventStream,
}

/// API key and session cookie sent with every request.
#[derive(Clone)]
pub struct Credentials {
    authorization: HeaderValue,
    cookie: HeaderValue,
}

impl Credentials {
    /// Validate credentials and pre-build their header values.
    ///
    /// # Errors
    ///
    /// Returns [`QwenError::InvalidRequest`] when either value is blank or is
    /// not a legal header value.
    pub fn new(api_key: &str, cookie: &str) -> Result<Self, QwenError> {
        let api_key = api_key.trim();
        let cookie = cookie.trim();
        if api_key.is_empty() {
            return Err(QwenError::InvalidRequest(
                "API key cannot be empty".to_string(),
            ));
        }
        if cookie.is_empty() {
            return Err(QwenError::InvalidRequest("Cookie cannot be empty".to_string()));
        }

        let mut authorization = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| QwenError::InvalidRequest("API key is not a valid header value".into()))?;
        authorization.set_sensitive(true);
        let mut cookie = HeaderValue::from_str(cookie)
            .map_err(|_| QwenError::InvalidRequest("Cookie is not a valid header value".into()))?;
        cookie.set_sensitive(true);

        Ok(Self {
            authorization,
            cookie,
        })
    }

    /// # Errors
    ///
    /// See [`Credentials::new`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, QwenError> {
        Self::new(&config.api_key, &config.cookie)
    }

    #[must_use]
    pub fn authorization_header(&self) -> &HeaderValue {
        &self.authorization
    }

    #[must_use]
    pub fn cookie_header(&self) -> &HeaderValue {
        &self.cookie
    }

    /// Headers for a chat completion call in the given response mode.
    #[must_use]
    pub fn request_headers(&self, mode: AcceptMode) -> http::HeaderMap {
        let mut headers = http::HeaderMap::with_capacity(5);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(AUTHORIZATION, self.authorization.clone());
        headers.insert(COOKIE, self.cookie.clone());
        match mode {
            AcceptMode::Json => {
                headers.insert(ACCEPT, HeaderValue::from_static(APPLICATION_JSON));
            }
            AcceptMode::EventStream => {
                headers.insert(ACCEPT, HeaderValue::from_static(TEXT_EVENT_STREAM));
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }
        }
        headers
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("authorization", &"Bearer <redacted>")
            .field("cookie", &"<redacted>")
            .finish()
    }
}
