//! Process configuration read from environment variables
//!
//! Every key is optional and falls back to the defaults used by the
//! docker-compose deployment. A `.env` file in the working directory is
//! loaded first when present. `DATABASE_URL`, when set, replaces all of
//! the `POSTGRES_*` keys.

use std::time::Duration;
use thiserror::Error;

use crate::broker::{BrokerConfig, QueueBinding, Topology};
use crate::storage::{parse_ssl_mode, DatabaseConfig, RetryPolicy};

/// Shortest accepted producer interval
pub const MIN_PRODUCER_INTERVAL: Duration = Duration::from_millis(1);

/// Errors that can occur when reading configuration
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },

    /// `DATABASE_URL` could not be parsed; the value is left out since it
    /// carries the password
    #[error("Invalid DATABASE_URL: {0}")]
    DatabaseUrl(String),
}

/// Everything the consumer and producer binaries need
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,

    /// Backoff for database (re)connects
    pub retry: RetryPolicy,

    /// Pause between broker reconnect attempts
    pub reconnect_delay: Duration,

    /// Pause between generated readings (producer only)
    pub producer_interval: Duration,

    /// Publish a single reading and exit (producer only)
    pub producer_once: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            retry: RetryPolicy::default(),
            reconnect_delay: Duration::from_secs(5),
            producer_interval: Duration::from_secs(5),
            producer_once: false,
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment, after applying `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();
        let default_topology = Topology::default();

        let broker = BrokerConfig {
            host: env.string("RABBITMQ_HOST", &defaults.broker.host),
            port: env.parse("RABBITMQ_PORT", defaults.broker.port)?,
            user: env.string("RABBIT_USER", &defaults.broker.user),
            password: env.string("RABBIT_PASS", &defaults.broker.password),
            vhost: env.string("RABBITMQ_VHOST", &defaults.broker.vhost),
            topology: Topology {
                main: QueueBinding::new(
                    env.string("RABBITMQ_EXCHANGE", &default_topology.main.exchange),
                    env.string("RABBITMQ_QUEUE", &default_topology.main.queue),
                    env.string("ROUTING_KEY", &default_topology.main.routing_key),
                ),
                dead_letter: QueueBinding::new(
                    env.string("RABBITMQ_DLQ_EXCHANGE", &default_topology.dead_letter.exchange),
                    env.string("RABBITMQ_DLQ_QUEUE", &default_topology.dead_letter.queue),
                    env.string("DLQ_ROUTING_KEY", &default_topology.dead_letter.routing_key),
                ),
            },
        };

        let database = match env.get("DATABASE_URL") {
            Some(url) => DatabaseConfig::from_connection_string(&url).map_err(|e| ConfigError::DatabaseUrl(e.0))?,
            None => {
                let ssl_mode = match env.get("POSTGRES_SSLMODE") {
                    Some(value) => parse_ssl_mode(&value).ok_or_else(|| invalid("POSTGRES_SSLMODE", &value))?,
                    None => defaults.database.ssl_mode,
                };

                DatabaseConfig {
                    host: env.string("POSTGRES_HOST", &defaults.database.host),
                    port: env.parse("POSTGRES_PORT", defaults.database.port)?,
                    database: env.string("POSTGRES_DB", &defaults.database.database),
                    user: env.string("POSTGRES_USER", &defaults.database.user),
                    password: env.string("POSTGRES_PASSWORD", &defaults.database.password),
                    ssl_mode,
                }
            }
        };

        let retry = RetryPolicy::new(
            env.parse("DB_MAX_RETRIES", defaults.retry.max_attempts)?,
            env.seconds("DB_RETRY_BASE_DELAY", defaults.retry.base_delay)?,
        );

        Ok(Self {
            broker,
            database,
            retry,
            reconnect_delay: env.seconds("RECONNECT_DELAY", defaults.reconnect_delay)?,
            producer_interval: env.interval("PRODUCER_INTERVAL", defaults.producer_interval)?,
            producer_once: env.flag("PRODUCER_ONCE", defaults.producer_once)?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `key`, treating blank values as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| invalid(key, &value)),
            None => Ok(default),
        }
    }

    /// Fractional seconds, e.g. `0.5`
    fn seconds(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.get(key) {
            Some(value) => value
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| invalid(key, &value)),
            None => Ok(default),
        }
    }

    /// Like `seconds`, but a ticker period must not be zero
    fn interval(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let interval = self.seconds(key, default)?;
        if interval < MIN_PRODUCER_INTERVAL {
            return Err(invalid(key, &self.get(key).unwrap_or_default()));
        }
        Ok(interval)
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, &value)),
            },
            None => Ok(default),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}
