pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

pub const DEFAULT_BASE_URL: &str = "https://chat.qwen.ai";
pub const DEFAULT_MODEL: &str = "qwen-turbo";

/// Client configuration. Timeouts and pool settings are applied once, when
/// the client is built, to every request it issues.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    pub cookie: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default = "default_stream_channel_capacity")]
    pub stream_channel_capacity: usize,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_timeout() -> u64 {
    600
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_stream_channel_capacity() -> usize {
    64
}

impl ClientConfig {
    /// Config with the given credentials and defaults for everything else.
    #[must_use]
    pub fn new(api_key: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            cookie: cookie.into(),
            base_url: default_base_url(),
            timeout: default_timeout(),
            default_model: default_model(),
            log_level: default_log_level(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            proxy: None,
            stream_channel_capacity: default_stream_channel_capacity(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Build a config from `QWEN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when credentials are missing or the
    /// resulting config is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("QWEN_API_KEY")
            .or_else(|| lookup("QWEN_AUTH_TOKEN"))
            .ok_or_else(|| ConfigError::Validation("QWEN_API_KEY is not set".to_string()))?;
        let cookie = lookup("QWEN_COOKIE")
            .ok_or_else(|| ConfigError::Validation("QWEN_COOKIE is not set".to_string()))?;

        let mut config = Self::new(api_key, cookie);
        if let Some(base_url) = lookup("QWEN_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(timeout) = lookup("QWEN_TIMEOUT") {
            config.timeout = timeout.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("QWEN_TIMEOUT is not a number: {timeout}"))
            })?;
        }
        if let Some(model) = lookup("QWEN_MODEL") {
            config.default_model = model;
        }
        if let Some(level) = lookup("QWEN_LOG_LEVEL") {
            config.log_level = level;
        }
        validate_config(&config)?;
        Ok(config)
    }

    /// Request timeout; `0` falls back to the default.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        let secs = if self.timeout == 0 {
            default_timeout()
        } else {
            self.timeout
        };
        Duration::from_secs(secs)
    }

    /// Base URL without trailing slashes; blank falls back to the default.
    #[must_use]
    pub fn normalized_base_url(&self) -> &str {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            DEFAULT_BASE_URL
        } else {
            trimmed
        }
    }

    /// Default model; blank falls back to `qwen-turbo`.
    #[must_use]
    pub fn effective_default_model(&self) -> &str {
        let trimmed = self.default_model.trim();
        if trimmed.is_empty() {
            DEFAULT_MODEL
        } else {
            trimmed
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("cookie", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("default_model", &self.default_model)
            .field("log_level", &self.log_level)
            .field(
                "http_pool_max_idle_per_host",
                &self.http_pool_max_idle_per_host,
            )
            .field(
                "http_pool_idle_timeout_secs",
                &self.http_pool_idle_timeout_secs,
            )
            .field("http_use_env_proxy", &self.http_use_env_proxy)
            .field("proxy", &self.proxy)
            .field("stream_channel_capacity", &self.stream_channel_capacity)
            .finish()
    }
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn parse_config(yaml: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(yaml)?;
    validate_config(&config)?;
    Ok(config)
}
