//! Commerce core configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `COMMERCE_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`); only needed when using the Postgres repositories
//! - `COMMERCE_SESSION_TTL_SECS` - Session lifetime in seconds (default: 86400)
//! - `COMMERCE_TOKEN_TTL_SECS` - Bearer token lifetime in seconds (default: 3600)

use chrono::Duration;
use secrecy::SecretString;
use thiserror::Error;

/// Default session lifetime: 24 hours.
const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Default token lifetime: 1 hour.
const DEFAULT_TOKEN_TTL_SECS: i64 = 3_600;

/// Ceiling on configured TTLs: 30 days.
const MAX_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Commerce core configuration.
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    /// `PostgreSQL` connection URL, when a database-backed repository is used.
    pub database_url: Option<SecretString>,
    /// How long a new session stays active without an explicit logout.
    pub session_ttl: Duration,
    /// How long an issued bearer token is valid.
    pub token_ttl: Duration,
}

impl CommerceConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a TTL variable is present but not a positive
    /// number of seconds within the allowed range.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("COMMERCE_DATABASE_URL");
        let session_ttl = get_ttl("COMMERCE_SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)?;
        let token_ttl = get_ttl("COMMERCE_TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?;

        Ok(Self {
            database_url,
            session_ttl,
            token_ttl,
        })
    }

    /// Configuration with default TTLs and no database URL.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            database_url: None,
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        }
    }
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    std::env::var(primary_key)
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
        .map(SecretString::from)
}

/// Read a TTL variable, falling back to the default when unset.
fn get_ttl(key: &str, default_secs: i64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_ttl_secs(&raw)
            .map_err(|reason| ConfigError::InvalidEnvVar(key.to_owned(), reason)),
        Err(_) => Ok(Duration::seconds(default_secs)),
    }
}

/// Parse a TTL given in seconds, bounded to a sane range.
fn parse_ttl_secs(raw: &str) -> Result<Duration, String> {
    let secs: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("expected an integer number of seconds, got {raw:?}"))?;

    if secs <= 0 {
        return Err(format!("TTL must be positive, got {secs}"));
    }
    if secs > MAX_TTL_SECS {
        return Err(format!("TTL must be at most {MAX_TTL_SECS} seconds, got {secs}"));
    }

    Ok(Duration::seconds(secs))
}
