//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Bot API configuration.
    pub bot: BotConfig,
    /// Delivery queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis keys.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Bot API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot token used to authenticate against the messaging platform.
    pub token: String,
    /// Base URL of the messaging platform API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

/// Delivery queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent dispatch workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Global ceiling on external API calls per second across all workers.
    #[serde(default = "default_dispatch_rate")]
    pub dispatch_rate_per_sec: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Maximum execution attempts per job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lease on a claimed job before it is considered stalled, in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    /// TTL of channel supersession pointers, in seconds.
    #[serde(default = "default_pointer_ttl_secs")]
    pub pointer_ttl_secs: i64,
    /// Number of targets per broadcast chunk.
    #[serde(default = "default_broadcast_chunk_size")]
    pub broadcast_chunk_size: usize,
    /// Delay between broadcast chunks, in milliseconds.
    #[serde(default = "default_broadcast_chunk_delay_ms")]
    pub broadcast_chunk_delay_ms: u64,
    /// Priority tier for broadcast jobs. Kept at the lowest tier so
    /// broadcasts never starve interactive traffic.
    #[serde(default = "default_broadcast_priority")]
    pub broadcast_priority: i32,
    /// Worker poll interval when the queue is empty, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dispatch_rate_per_sec: default_dispatch_rate(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            max_attempts: default_max_attempts(),
            lease_secs: default_lease_secs(),
            pointer_ttl_secs: default_pointer_ttl_secs(),
            broadcast_chunk_size: default_broadcast_chunk_size(),
            broadcast_chunk_delay_ms: default_broadcast_chunk_delay_ms(),
            broadcast_priority: default_broadcast_priority(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_redis_prefix() -> String {
    "clickrush".to_string()
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

const fn default_workers() -> usize {
    10
}

const fn default_dispatch_rate() -> u32 {
    28
}

const fn default_base_retry_delay_ms() -> u64 {
    2000
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_lease_secs() -> i64 {
    30
}

const fn default_pointer_ttl_secs() -> i64 {
    300
}

const fn default_broadcast_chunk_size() -> usize {
    30
}

const fn default_broadcast_chunk_delay_ms() -> u64 {
    1000
}

const fn default_broadcast_priority() -> i32 {
    -10
}

const fn default_poll_interval_ms() -> u64 {
    50
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `CLICKRUSH_ENV`)
    /// 3. Environment variables with `CLICKRUSH` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("CLICKRUSH_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("CLICKRUSH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("CLICKRUSH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.dispatch_rate_per_sec, 28);
        assert_eq!(config.base_retry_delay_ms, 2000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.pointer_ttl_secs, 300);
        assert_eq!(config.broadcast_chunk_size, 30);
        assert_eq!(config.broadcast_priority, -10);
    }
}
