//! Configuration loader for the `aqi-watch` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        parse_env_num!($var_name, u32, $default)
    };
}

/// Parse an optional numeric environment variable of the given type.
macro_rules! parse_env_num {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// The single location the service tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub state: String,
    pub country: String,
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// `postgres://…` or `sqlite:…` connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// IQAir API base URL.
    pub api_url: String,

    /// IQAir API key.
    pub api_key: String,

    /// Upstream request timeout, seconds.
    pub source_timeout_secs: u64,

    /// Location polled by the scheduler and used as the default `city`.
    pub location: Location,

    /// Seconds between scheduled fetches.
    pub fetch_interval_secs: u64,

    /// Seconds between SSE heartbeat events.
    pub heartbeat_secs: u64,

    /// Per-subscriber outbound queue capacity.
    pub subscriber_buffer: usize,

    pub host: String,
    pub port: u16,

    pub admin_username: String,
    pub admin_password: String,

    /// Lifetime of an issued admin bearer token, seconds.
    pub admin_token_ttl_secs: u64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL or SQLite connection string
/// - `IQAIR_API_KEY` – IQAir API key
/// - `ADMIN_PASSWORD` – admin login password
///
/// Optional:
/// - `IQAIR_API_URL` – upstream base URL (default: `https://api.airvisual.com/v2`)
/// - `TARGET_CITY` / `TARGET_STATE` / `TARGET_COUNTRY` – polled location
///   (default: Tashkent, Toshkent Shahri, Uzbekistan)
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `FETCH_INTERVAL_SECS` – scheduler period (default: 720)
/// - `SOURCE_TIMEOUT_SECS` – upstream timeout (default: 10)
/// - `HEARTBEAT_SECS` – SSE heartbeat period (default: 30)
/// - `SUBSCRIBER_BUFFER` – per-subscriber queue size (default: 16)
/// - `HOST` / `PORT` – listen address (default: 0.0.0.0:3000)
/// - `ADMIN_USERNAME` – admin login name (default: admin)
/// - `ADMIN_TOKEN_TTL_SECS` – bearer token lifetime (default: 43200)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let api_key = require_env!("IQAIR_API_KEY");
    let admin_password = require_env!("ADMIN_PASSWORD");
    let api_url = env_or!("IQAIR_API_URL", "https://api.airvisual.com/v2");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let fetch_interval_secs = parse_env_num!("FETCH_INTERVAL_SECS", u64, 720);
    let source_timeout_secs = parse_env_num!("SOURCE_TIMEOUT_SECS", u64, 10);
    let heartbeat_secs = parse_env_num!("HEARTBEAT_SECS", u64, 30);
    let subscriber_buffer = parse_env_num!("SUBSCRIBER_BUFFER", usize, 16);
    let port = parse_env_num!("PORT", u16, 3000);
    let admin_token_ttl_secs = parse_env_num!("ADMIN_TOKEN_TTL_SECS", u64, 43_200);

    if fetch_interval_secs == 0 || heartbeat_secs == 0 || subscriber_buffer == 0 {
        return Err(anyhow!(
            "FETCH_INTERVAL_SECS, HEARTBEAT_SECS and SUBSCRIBER_BUFFER must be non-zero"
        ));
    }

    Ok(Config {
        db_url,
        db_pool_max,
        api_url,
        api_key,
        source_timeout_secs,
        location: Location {
            city: env_or!("TARGET_CITY", "Tashkent"),
            state: env_or!("TARGET_STATE", "Toshkent Shahri"),
            country: env_or!("TARGET_COUNTRY", "Uzbekistan"),
        },
        fetch_interval_secs,
        heartbeat_secs,
        subscriber_buffer,
        host: env_or!("HOST", "0.0.0.0"),
        port,
        admin_username: env_or!("ADMIN_USERNAME", "admin"),
        admin_password,
        admin_token_ttl_secs,
    })
}

/// Replace the password component of a connection URL with `****`.
pub fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // `postgres://user@…` has no password; that colon is the scheme's
            if !db_url[..colon_pos].contains("//") {
                return db_url.to_string();
            }
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and the API key
    /// while showing all other configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL         : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX          : {}", self.db_pool_max);
        tracing::info!("  IQAIR_API_URL        : {}", self.api_url);
        tracing::info!("  IQAIR_API_KEY        : ****");
        tracing::info!(
            "  TARGET               : {}, {}, {}",
            self.location.city,
            self.location.state,
            self.location.country
        );
        tracing::info!("  FETCH_INTERVAL_SECS  : {}", self.fetch_interval_secs);
        tracing::info!("  SOURCE_TIMEOUT_SECS  : {}", self.source_timeout_secs);
        tracing::info!("  HEARTBEAT_SECS       : {}", self.heartbeat_secs);
        tracing::info!("  SUBSCRIBER_BUFFER    : {}", self.subscriber_buffer);
        tracing::info!("  LISTEN               : {}:{}", self.host, self.port);
        tracing::info!("  ADMIN_USERNAME       : {}", self.admin_username);
        tracing::info!("  ADMIN_TOKEN_TTL_SECS : {}", self.admin_token_ttl_secs);
    }
}
