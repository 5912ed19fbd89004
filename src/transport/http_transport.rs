use std::sync::OnceLock;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::QwenError;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Connection settings shared by the async and blocking clients.
#[derive(Debug, Clone)]
struct ClientSettings {
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<String>,
}

impl ClientSettings {
    fn from_config(config: &ClientConfig) -> Self {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let proxy_url = config
            .proxy
            .as_deref()
            .map(str::trim)
            .filter(|proxy| !proxy.is_empty())
            .map(str::to_owned);
        Self {
            pool_max_idle_per_host: config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            timeout: config.timeout_duration(),
            use_env_proxy: config.http_use_env_proxy,
            proxy_url,
        }
    }

    fn proxy(&self) -> Result<Option<reqwest::Proxy>, QwenError> {
        self.proxy_url
            .as_deref()
            .map(|url| {
                reqwest::Proxy::all(url)
                    .map_err(|err| QwenError::Config(format!("Invalid proxy URL: {err}")))
            })
            .transpose()
    }
}

/// Async client. The timeout bounds connecting and every individual read, so
/// long-running streams stay open as long as data keeps arriving.
fn build_async_client(settings: &ClientSettings) -> Result<reqwest::Client, QwenError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(settings.timeout)
        .read_timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy) = settings.proxy()? {
        builder = builder.no_proxy().proxy(proxy);
    } else if !settings.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| QwenError::transport(format!("Failed to build HTTP client: {err}")))
}

fn build_blocking_client(
    settings: &ClientSettings,
) -> Result<reqwest::blocking::Client, QwenError> {
    let mut builder = reqwest::blocking::Client::builder()
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(settings.timeout)
        .timeout(settings.timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy) = settings.proxy()? {
        builder = builder.no_proxy().proxy(proxy);
    } else if !settings.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| QwenError::transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP transport for the chat completions endpoint.
///
/// Both clients are built on first use and then shared by every request;
/// they are safe to use from many streams at once.
pub struct HttpTransport {
    endpoint: url::Url,
    settings: ClientSettings,
    async_client: OnceLock<reqwest::Client>,
    blocking_client: OnceLock<reqwest::blocking::Client>,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`QwenError::Config`] when the base URL does not form a valid
    /// endpoint URL.
    pub fn new(config: &ClientConfig) -> Result<Self, QwenError> {
        let raw = format!("{}{CHAT_COMPLETIONS_PATH}", config.normalized_base_url());
        let endpoint = url::Url::parse(&raw)
            .map_err(|err| QwenError::Config(format!("Invalid base URL '{raw}': {err}")))?;
        Ok(Self {
            endpoint,
            settings: ClientSettings::from_config(config),
            async_client: OnceLock::new(),
            blocking_client: OnceLock::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// # Errors
    ///
    /// Returns an error when the client cannot be built from the settings.
    pub fn async_client(&self) -> Result<&reqwest::Client, QwenError> {
        if let Some(existing) = self.async_client.get() {
            return Ok(existing);
        }
        let built = build_async_client(&self.settings)?;
        Ok(self.async_client.get_or_init(|| built))
    }

    /// The blocking client runs its own runtime thread; it must not be built
    /// or dropped from inside an async context.
    ///
    /// # Errors
    ///
    /// Returns an error when the client cannot be built from the settings.
    pub fn blocking_client(&self) -> Result<&reqwest::blocking::Client, QwenError> {
        if let Some(existing) = self.blocking_client.get() {
            return Ok(existing);
        }
        let built = build_blocking_client(&self.settings)?;
        Ok(self.blocking_client.get_or_init(|| built))
    }

    /// Build a POST to the chat completions endpoint.
    #[must_use]
    pub fn build_request(&self, headers: http::HeaderMap, body: Vec<u8>) -> reqwest::Request {
        let mut request = reqwest::Request::new(http::Method::POST, self.endpoint.clone());
        *request.headers_mut() = headers;
        *request.body_mut() = Some(reqwest::Body::from(body));
        request
    }

    /// Send a request and wait for the response headers. The body is left
    /// unread.
    ///
    /// # Errors
    ///
    /// Returns [`QwenError::Transport`] when no response was received.
    pub async fn send(
        &self,
        headers: http::HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, QwenError> {
        let client = self.async_client()?;
        let request = self.build_request(headers, body);
        tracing::debug!(url = %self.endpoint, "sending request");
        client.execute(request).await.map_err(|err| {
            tracing::error!(error = %err, "request failed");
            QwenError::transport(format!("Request failed: {err}"))
        })
    }

    /// Blocking counterpart of [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// Returns [`QwenError::Transport`] when no response was received.
    pub fn send_blocking(
        &self,
        headers: http::HeaderMap,
        body: Vec<u8>,
    ) -> Result<reqwest::blocking::Response, QwenError> {
        let client = self.blocking_client()?;
        tracing::debug!(url = %self.endpoint, "sending request");
        client
            .post(self.endpoint.clone())
            .headers(headers)
            .body(body)
            .send()
            .map_err(|err| {
                tracing::error!(error = %err, "request failed");
                QwenError::transport(format!("Request failed: {err}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("sk-test", "session=abc")
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let transport = HttpTransport::new(&config().with_base_url("http://127.0.0.1:9000/")).unwrap();
        assert_eq!(
            transport.endpoint().as_str(),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let transport =
            HttpTransport::new(&config().with_base_url("https://gw.example.com/qwen")).unwrap();
        assert_eq!(
            transport.endpoint().as_str(),
            "https://gw.example.com/qwen/v1/chat/completions"
        );
    }

    #[test]
    fn test_async_client_is_lazy() {
        let transport = HttpTransport::new(&config()).unwrap();
        assert!(transport.async_client.get().is_none());
        let _ = transport.async_client().unwrap();
        assert!(transport.async_client.get().is_some());
        assert!(transport.blocking_client.get().is_none());
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = config().with_timeout(0).with_proxy("  ");
        cfg.http_pool_idle_timeout_secs = 0;
        let settings = ClientSettings::from_config(&cfg);
        assert_eq!(settings.timeout, Duration::from_secs(600));
        assert!(settings.pool_idle_timeout.is_none());
        assert!(settings.proxy_url.is_none());
    }

    #[test]
    fn test_build_request_sets_method_headers_and_body() {
        let transport = HttpTransport::new(&config()).unwrap();
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        let request = transport.build_request(headers, br#"{"model":"qwen-turbo"}"#.to_vec());
        assert_eq!(request.method(), &http::Method::POST);
        assert_eq!(request.url().path(), CHAT_COMPLETIONS_PATH);
        assert_eq!(
            request.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            request.body().and_then(reqwest::Body::as_bytes),
            Some(&br#"{"model":"qwen-turbo"}"#[..])
        );
    }
}
