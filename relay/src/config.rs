//! Configuration module for environment variable parsing.
//!
//! Every setting has a default so the relay can boot locally without a
//! database or Redis; missing stores fall back to in-memory routing and a
//! disabled recent-request log.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Public base URL of this service, used when logging endpoint URLs
    pub service_url: Option<String>,

    /// Path to the `jq` binary used for filter evaluation
    pub jq_path: String,

    /// Postgres URL holding the routing table (in-memory store when unset)
    pub database_url: Option<String>,

    /// Redis URL for the recent-request log (log disabled when unset)
    pub redis_url: Option<String>,

    /// Trello application key sent with every Trello API call
    pub trello_api_key: String,

    /// Base URL of the Trello REST API
    pub trello_api_url: String,

    /// Deadline for a single filter evaluation in milliseconds
    pub filter_timeout_ms: u64,

    /// Deadline for a single sink dispatch in milliseconds
    pub dispatch_timeout_ms: u64,

    /// Number of payloads kept per address after trimming
    pub recent_requests_max: usize,

    /// Expiry of an address's recent-request list in seconds
    pub recent_requests_ttl_secs: i64,

    /// A write trims the log with probability 1 / `recent_trim_one_in`
    pub recent_trim_one_in: u32,

    /// Trim on every write instead of sampling
    pub recent_trim_every_write: bool,

    /// Deadline for one recent-request log write in milliseconds
    pub recent_log_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_or("PORT", 8080),

            service_url: non_empty("SERVICE_URL"),

            jq_path: env::var("JQ_PATH").unwrap_or_else(|_| "jq".to_string()),

            database_url: non_empty("DATABASE_URL"),

            redis_url: non_empty("REDIS_URL"),

            trello_api_key: env::var("TRELLO_API_KEY").unwrap_or_default(),

            trello_api_url: env::var("TRELLO_API_URL")
                .unwrap_or_else(|_| "https://api.trello.com".to_string()),

            filter_timeout_ms: parse_or("FILTER_TIMEOUT_MS", 2_000),

            dispatch_timeout_ms: parse_or("DISPATCH_TIMEOUT_MS", 10_000),

            recent_requests_max: parse_or::<usize>("RECENT_REQUESTS_MAX", 6).max(1),

            recent_requests_ttl_secs: parse_or("RECENT_REQUESTS_TTL_SECS", 60 * 60 * 24 * 30),

            recent_trim_one_in: parse_or("RECENT_TRIM_ONE_IN", 7),

            recent_trim_every_write: parse_or("RECENT_TRIM_EVERY_WRITE", false),

            recent_log_timeout_ms: parse_or("RECENT_LOG_TIMEOUT_MS", 500),
        }
    }

    pub fn filter_timeout(&self) -> Duration {
        Duration::from_millis(self.filter_timeout_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn recent_log_timeout(&self) -> Duration {
        Duration::from_millis(self.recent_log_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            service_url: None,
            jq_path: "jq".to_string(),
            database_url: None,
            redis_url: None,
            trello_api_key: String::new(),
            trello_api_url: "https://api.trello.com".to_string(),
            filter_timeout_ms: 2_000,
            dispatch_timeout_ms: 10_000,
            recent_requests_max: 6,
            recent_requests_ttl_secs: 60 * 60 * 24 * 30,
            recent_trim_one_in: 7,
            recent_trim_every_write: false,
            recent_log_timeout_ms: 500,
        }
    }
}

/// Parse an environment variable, falling back to `default` when it is unset
/// or malformed.
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Read an environment variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
