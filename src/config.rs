// Configuration management

use crate::core::errors::CoordinationError;
use crate::core::models::RateLimitAlgorithm;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Upper bounds keeping window and grant expiry arithmetic in range
const MAX_RATE_LIMIT_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;
const MAX_GRANT_TTL_DAYS: u64 = 100 * 365;

/// Coordination core configuration loaded from environment variables
///
/// All values are validated on load with clear error messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Shared store
    pub redis_url: String,
    pub redis_pool_max_size: u32,
    pub redis_connection_timeout_secs: u64, // Pool checkout timeout
    pub redis_operation_timeout_ms: u64,    // Per-call bound for every store operation

    // Fallback store and circuit breaker
    pub store_fallback_enabled: bool,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,

    // Rate limiting
    pub rate_limit_key_prefix: String,
    pub rate_limit_default_limit: u64,
    pub rate_limit_default_window_secs: u64,
    pub rate_limit_algorithm: RateLimitAlgorithm,

    // Cache
    pub cache_key_prefix: String,
    pub cache_default_ttl_secs: u64,
    pub edge_cache_prefix: String,
    pub edge_purge_url: Option<String>,

    // Authorization
    pub grant_default_ttl_days: u64,

    // Roles, permission definitions and invalidation rules
    pub catalog_path: Option<PathBuf>,

    // HTTP surface
    pub request_timeout_secs: u64,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, CoordinationError> {
        // Skip in test builds so .env files cannot leak into test environment variables
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let redis_url = Self::get_env_or_default("REDIS_URL", "redis://localhost:6379/0")?;

        let config = Self {
            redis_url: redis_url.clone(),
            redis_pool_max_size: Self::parse_u32_or_default("REDIS_POOL_MAX_SIZE", 16)?,
            redis_connection_timeout_secs: Self::detect_redis_connection_timeout(&redis_url)?,
            redis_operation_timeout_ms: Self::parse_u64_or_default("REDIS_OPERATION_TIMEOUT_MS", 500)?,
            store_fallback_enabled: Self::parse_bool_or_default("STORE_FALLBACK_ENABLED", true)?,
            circuit_breaker_failure_threshold: Self::parse_u32_or_default("CIRCUIT_BREAKER_FAILURE_THRESHOLD", 5)?,
            circuit_breaker_cooldown_secs: Self::parse_u64_or_default("CIRCUIT_BREAKER_COOLDOWN_SECS", 30)?,
            rate_limit_key_prefix: Self::get_env_or_default("RATE_LIMIT_KEY_PREFIX", "ratelimit:")?,
            rate_limit_default_limit: Self::parse_u64_or_default("RATE_LIMIT_DEFAULT_LIMIT", 100)?,
            rate_limit_default_window_secs: Self::parse_u64_or_default("RATE_LIMIT_DEFAULT_WINDOW_SECS", 60)?,
            rate_limit_algorithm: Self::get_env_or_default("RATE_LIMIT_ALGORITHM", "sliding")?.parse()?,
            cache_key_prefix: Self::get_env_or_default("CACHE_KEY_PREFIX", "cache:")?,
            cache_default_ttl_secs: Self::parse_u64_or_default("CACHE_DEFAULT_TTL_SECS", 300)?,
            edge_cache_prefix: Self::get_env_or_default("EDGE_CACHE_PREFIX", "edge:")?,
            edge_purge_url: Self::get_optional_env("EDGE_PURGE_URL")?,
            grant_default_ttl_days: Self::parse_u64_or_default("GRANT_DEFAULT_TTL_DAYS", 365)?,
            catalog_path: Self::get_optional_path("COORDINATION_CATALOG_PATH")?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info")?,
            log_format: Self::get_env_or_default("LOG_FORMAT", "json")?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Get environment variable or return default value
    fn get_env_or_default(key: &str, default: &str) -> Result<String, CoordinationError> {
        Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
    }

    /// Get optional environment variable
    fn get_optional_env(key: &str) -> Result<Option<String>, CoordinationError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Get optional file path from environment variable
    fn get_optional_path(key: &str) -> Result<Option<PathBuf>, CoordinationError> {
        Ok(Self::get_optional_env(key)?.map(PathBuf::from))
    }

    /// Parse u64 from environment variable or return default
    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, CoordinationError> {
        match env::var(key) {
            Ok(value) => Self::parse_u64(&value, key),
            _ => Ok(default),
        }
    }

    /// Parse u32 from environment variable or return default
    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, CoordinationError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u32>().map_err(|e| {
                    CoordinationError::ConfigurationError(format!("Invalid {} value '{}': {}", key, value, e))
                })?;

                if parsed == 0 {
                    return Err(CoordinationError::ConfigurationError(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    /// Parse a boolean flag (`true/false`, `1/0`, `yes/no`)
    fn parse_bool_or_default(key: &str, default: bool) -> Result<bool, CoordinationError> {
        match env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(CoordinationError::ConfigurationError(format!(
                    "Invalid {} value '{}': must be true or false",
                    key, value
                ))),
            },
            _ => Ok(default),
        }
    }

    /// Detect the pool checkout timeout for the store URL
    ///
    /// Local servers get a longer default since first connections through
    /// forwarded ports can be slow. REDIS_CONNECTION_TIMEOUT_SECS overrides it.
    fn detect_redis_connection_timeout(redis_url: &str) -> Result<u64, CoordinationError> {
        if let Ok(val) = env::var("REDIS_CONNECTION_TIMEOUT_SECS") {
            return Self::parse_u64(&val, "REDIS_CONNECTION_TIMEOUT_SECS");
        }

        let is_localhost = redis_url.contains("localhost") || redis_url.contains("127.0.0.1");
        Ok(if is_localhost { 10 } else { 5 })
    }

    /// Parse a positive u64 (no default)
    fn parse_u64(value: &str, env_key: &str) -> Result<u64, CoordinationError> {
        let parsed = value.parse::<u64>().map_err(|e| {
            CoordinationError::ConfigurationError(format!("Invalid {} value '{}': {}", env_key, value, e))
        })?;

        if parsed == 0 {
            return Err(CoordinationError::ConfigurationError(format!(
                "{} must be greater than 0",
                env_key
            )));
        }

        Ok(parsed)
    }

    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), CoordinationError> {
        Self::validate_url(&self.redis_url, "Redis")?;
        if let Some(ref url) = self.edge_purge_url {
            Self::validate_url(url, "Edge purge")?;
        }

        for (prefix, name) in [
            (&self.rate_limit_key_prefix, "RATE_LIMIT_KEY_PREFIX"),
            (&self.cache_key_prefix, "CACHE_KEY_PREFIX"),
            (&self.edge_cache_prefix, "EDGE_CACHE_PREFIX"),
        ] {
            if prefix.is_empty() {
                return Err(CoordinationError::ConfigurationError(format!("{} is empty", name)));
            }
        }

        // Rate limit, cache and edge keys must not be able to collide
        if self.rate_limit_key_prefix == self.cache_key_prefix || self.cache_key_prefix == self.edge_cache_prefix {
            return Err(CoordinationError::ConfigurationError(
                "Rate limit, cache and edge key prefixes must differ".to_string(),
            ));
        }

        if self.rate_limit_default_window_secs > MAX_RATE_LIMIT_WINDOW_SECS {
            return Err(CoordinationError::ConfigurationError(format!(
                "RATE_LIMIT_DEFAULT_WINDOW_SECS must be at most {}",
                MAX_RATE_LIMIT_WINDOW_SECS
            )));
        }
        if self.grant_default_ttl_days > MAX_GRANT_TTL_DAYS {
            return Err(CoordinationError::ConfigurationError(format!(
                "GRANT_DEFAULT_TTL_DAYS must be at most {}",
                MAX_GRANT_TTL_DAYS
            )));
        }

        if let Some(ref path) = self.catalog_path {
            if !path.is_file() {
                return Err(CoordinationError::ConfigurationError(format!(
                    "Catalog file not found at {:?}",
                    path
                )));
            }
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate URL format
    fn validate_url(url: &str, description: &str) -> Result<(), CoordinationError> {
        url::Url::parse(url).map_err(|e| {
            CoordinationError::ConfigurationError(format!("Invalid {} URL '{}': {}", description, url, e))
        })?;
        Ok(())
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), CoordinationError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(CoordinationError::ConfigurationError(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), CoordinationError> {
        if format != "json" && format != "text" {
            return Err(CoordinationError::ConfigurationError(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration
    ///
    /// Bypasses environment loading; no catalog file, no edge purge endpoint.
    pub fn test_config() -> Self {
        Self {
            redis_url: "redis://localhost:6379/0".to_string(),
            redis_pool_max_size: 4,
            redis_connection_timeout_secs: 2,
            redis_operation_timeout_ms: 500,
            store_fallback_enabled: true,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_secs: 30,
            rate_limit_key_prefix: "ratelimit:".to_string(),
            rate_limit_default_limit: 100,
            rate_limit_default_window_secs: 60,
            rate_limit_algorithm: RateLimitAlgorithm::SlidingWindow,
            cache_key_prefix: "cache:".to_string(),
            cache_default_ttl_secs: 300,
            edge_cache_prefix: "edge:".to_string(),
            edge_purge_url: None,
            grant_default_ttl_days: 365,
            catalog_path: None,
            request_timeout_secs: 30,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}
