//! Runtime configuration from environment variables

use std::env;

/// Configuration for the pipeline runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite durable-state database
    pub db_path: String,

    /// Path to the per-source JSON configuration file
    pub sources_path: String,

    /// JSONL input path with raw collector envelopes; None reads stdin
    pub input_path: Option<String>,

    /// Keep tailing the input file after EOF (daemon mode)
    pub follow_input: bool,

    /// Channel buffer size for inbound raw messages
    pub channel_buffer: usize,

    /// Aggregation due-flush sweep interval in milliseconds
    pub flush_interval_ms: u64,

    /// Blacklist expiry sweep interval in milliseconds
    pub expire_interval_ms: u64,

    /// Durable-store retry budget before the stage is declared dead
    pub store_max_retries: u32,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `THREATFLOW_DB_PATH` (default: threatflow.db)
    /// - `THREATFLOW_SOURCES_PATH` (default: sources.json)
    /// - `THREATFLOW_INPUT_PATH` (default: stdin; "-" also means stdin)
    /// - `THREATFLOW_FOLLOW_INPUT` (default: false)
    /// - `THREATFLOW_CHANNEL_BUFFER` (default: 10000)
    /// - `AGGREGATE_FLUSH_INTERVAL_MS` (default: 30000)
    /// - `BLACKLIST_EXPIRE_INTERVAL_MS` (default: 60000)
    /// - `STORE_MAX_RETRIES` (default: 5)
    pub fn from_env() -> Self {
        let input_path = env::var("THREATFLOW_INPUT_PATH")
            .ok()
            .filter(|p| !p.is_empty() && p != "-");

        Self {
            db_path: env::var("THREATFLOW_DB_PATH")
                .unwrap_or_else(|_| "threatflow.db".to_string()),

            sources_path: env::var("THREATFLOW_SOURCES_PATH")
                .unwrap_or_else(|_| "sources.json".to_string()),

            input_path,

            follow_input: env::var("THREATFLOW_FOLLOW_INPUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(false),

            channel_buffer: env::var("THREATFLOW_CHANNEL_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),

            flush_interval_ms: env::var("AGGREGATE_FLUSH_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30_000),

            expire_interval_ms: env::var("BLACKLIST_EXPIRE_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60_000),

            store_max_retries: env::var("STORE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test to avoid racing env-var mutation across parallel tests
    #[test]
    fn test_config_from_env() {
        env::remove_var("THREATFLOW_DB_PATH");
        env::remove_var("THREATFLOW_INPUT_PATH");
        env::remove_var("AGGREGATE_FLUSH_INTERVAL_MS");

        let config = Config::from_env();
        assert_eq!(config.db_path, "threatflow.db");
        assert_eq!(config.sources_path, "sources.json");
        assert!(config.input_path.is_none());
        assert!(!config.follow_input);
        assert_eq!(config.channel_buffer, 10_000);
        assert_eq!(config.flush_interval_ms, 30_000);
        assert_eq!(config.expire_interval_ms, 60_000);
        assert_eq!(config.store_max_retries, 5);

        env::set_var("THREATFLOW_DB_PATH", "/tmp/tf-test.db");
        env::set_var("THREATFLOW_INPUT_PATH", "-");
        env::set_var("AGGREGATE_FLUSH_INTERVAL_MS", "2500");

        let config = Config::from_env();
        assert_eq!(config.db_path, "/tmp/tf-test.db");
        assert!(config.input_path.is_none()); // "-" means stdin
        assert_eq!(config.flush_interval_ms, 2_500);

        env::remove_var("THREATFLOW_DB_PATH");
        env::remove_var("THREATFLOW_INPUT_PATH");
        env::remove_var("AGGREGATE_FLUSH_INTERVAL_MS");
    }
}
