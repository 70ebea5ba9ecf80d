//! Application configuration

use std::env;

/// Which shared pub/sub layer backs the room multiplexer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubSubBackend {
    /// Redis pub/sub — required for multi-process deployments
    Redis,
    /// Process-local broadcast channels — single-node deployments and dev
    Memory,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Pub/sub layer
    pub pubsub_backend: PubSubBackend,
    pub redis_url: String,

    // History pagination
    pub history_default_limit: i64,
    pub history_max_limit: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Pub/sub layer
            pubsub_backend: match env::var("PUBSUB_BACKEND")
                .unwrap_or_else(|_| "redis".to_string())
                .as_str()
            {
                "redis" => PubSubBackend::Redis,
                "memory" => PubSubBackend::Memory,
                _ => {
                    return Err(ConfigError::Invalid(
                        "PUBSUB_BACKEND must be \"redis\" or \"memory\"",
                    ))
                }
            },
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),

            // History pagination
            history_default_limit: env::var("HISTORY_DEFAULT_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
            history_max_limit: env::var("HISTORY_MAX_LIMIT")
                .unwrap_or_else(|_| "200".to_string())
                .parse()
                .unwrap_or(200),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration value: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("PUBSUB_BACKEND");
        env::remove_var("BIND_ADDRESS");
    }

    #[test]
    fn test_config_from_env() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        // === Test 1: DATABASE_URL is required ===
        cleanup_config();
        let result = Config::from_env();
        match result {
            Err(ConfigError::Missing("DATABASE_URL")) => {}
            other => panic!("Expected Missing error for DATABASE_URL, got: {:?}", other),
        }

        // === Test 2: defaults apply ===
        env::set_var("DATABASE_URL", "postgres://test");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.pubsub_backend, PubSubBackend::Redis);
        assert_eq!(config.history_default_limit, 50);

        // === Test 3: memory backend ===
        env::set_var("PUBSUB_BACKEND", "memory");
        let config = Config::from_env().unwrap();
        assert_eq!(config.pubsub_backend, PubSubBackend::Memory);

        // === Test 4: unknown backend rejected ===
        env::set_var("PUBSUB_BACKEND", "rabbitmq");
        let result = Config::from_env();
        assert!(
            matches!(result, Err(ConfigError::Invalid(_))),
            "Unknown backend should return Invalid error"
        );

        cleanup_config();
    }
}
