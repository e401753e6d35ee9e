// Tracing subscriber setup

use crate::config::Config;
use crate::core::errors::CoordinationError;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// RUST_LOG overrides `log_level`. Installing twice is an error rather than a
/// panic so embedding services can own the subscriber themselves.
pub fn init_tracing(config: &Config) -> Result<(), CoordinationError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    let installed = if config.log_format == "json" {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    installed.map_err(|e| CoordinationError::ConfigurationError(format!("Failed to install tracing subscriber: {}", e)))
}

/// Parse a log level string to a tracing Level
pub fn parse_log_level(level: &str) -> Result<tracing::Level, CoordinationError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        _ => Err(CoordinationError::ConfigurationError(format!("Invalid log level: {}", level))),
    }
}
