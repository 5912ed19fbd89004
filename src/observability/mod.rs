pub mod token_counter;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (TRACE, DEBUG, INFO, ERROR)
///
/// Meant for applications embedding the client. A subscriber that is already
/// installed is left in place.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Translate a configured level name into an `EnvFilter` directive.
#[must_use]
pub fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        "" => Some("INFO".to_string()),
        _ => Some(level),
    }
}

/// Span every request and stream of one client runs inside.
#[must_use]
pub fn client_span(base_url: &str) -> tracing::Span {
    tracing::info_span!("qwen_client", base_url = %base_url)
}
