//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared bearer secret; when unset, requests are accepted anonymously
    pub auth_secret: Option<String>,
    /// Clock skew beyond which a warning is logged
    pub max_clock_skew_ms: u64,
    /// Most messages accepted in one exchange request
    pub max_batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let auth_secret = lookup("AUTH_SECRET").filter(|s| !s.is_empty());

        let max_clock_skew_ms = match lookup("MAX_CLOCK_SKEW_MS") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("MAX_CLOCK_SKEW_MS"))?,
            None => converge_engine::clock::DEFAULT_MAX_SKEW_MS,
        };

        let max_batch_size = match lookup("MAX_BATCH_SIZE") {
            Some(v) => v
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidNumber("MAX_BATCH_SIZE"))?,
            None => 10_000,
        };

        Ok(Self {
            host,
            port,
            database_url,
            auth_secret,
            max_clock_skew_ms,
            max_batch_size,
        })
    }

    /// Clock settings for group replicas.
    pub fn clock_config(&self) -> converge_engine::ClockConfig {
        converge_engine::ClockConfig {
            max_skew_ms: self.max_clock_skew_ms,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid {0} value")]
    InvalidNumber(&'static str),
}
