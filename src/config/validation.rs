use super::{ClientConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
];

/// Validate the client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_credentials(config)?;
    validate_base_url(config)?;
    validate_http_settings(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_credentials(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.api_key.trim().is_empty() {
        return Err(validation_err("api_key cannot be empty"));
    }
    if config.cookie.trim().is_empty() {
        return Err(validation_err("cookie cannot be empty"));
    }
    Ok(())
}

fn validate_base_url(config: &ClientConfig) -> Result<(), ConfigError> {
    let base_url = config.normalized_base_url();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(validation_err(format!(
            "base_url must start with http:// or https:// (got '{base_url}')"
        )));
    }
    url::Url::parse(base_url)
        .map_err(|err| validation_err(format!("base_url is not a valid URL: {err}")))?;
    Ok(())
}

fn validate_http_settings(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if config.stream_channel_capacity == 0 {
        return Err(validation_err(
            "stream_channel_capacity must be greater than 0",
        ));
    }
    if let Some(proxy) = config.proxy.as_deref() {
        let proxy = proxy.trim();
        if !proxy.is_empty() {
            url::Url::parse(proxy)
                .map_err(|err| validation_err(format!("proxy is not a valid URL: {err}")))?;
        }
    }
    Ok(())
}

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let level = config.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "log_level '{}' is invalid. Must be one of: {}",
            config.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ClientConfig {
        ClientConfig::new("sk-test", "session=abc")
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let mut config = valid();
        config.api_key = "   ".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }

    #[test]
    fn test_blank_cookie_rejected() {
        let mut config = valid();
        config.cookie = String::new();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cookie"));
    }

    #[test]
    fn test_base_url_scheme_required() {
        let config = valid().with_base_url("ftp://example.com");
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let mut config = valid();
        config.http_pool_max_idle_per_host = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let mut config = valid();
        config.stream_channel_capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let config = valid().with_proxy("not a url");
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_log_level_case_insensitive() {
        assert!(validate_config(&valid().with_log_level("warning")).is_ok());
        assert!(validate_config(&valid().with_log_level("verbose")).is_err());
    }
}
