//! Configuration management for the book-sync service.
//!
//! Loads configuration from environment variables with defaults matching a
//! local single-broker setup.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be used
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Broker connection settings
    pub kafka: KafkaConfig,
    /// Channel names
    pub topics: Topics,
    /// Listener pool settings
    pub listener: ListenerConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub bootstrap_servers: String,
    /// Consumer group shared by all listener workers
    pub consumer_group_id: String,
    /// Where a group without committed offsets starts reading
    pub auto_offset_reset: String,
    /// Producer acknowledgment mode
    pub producer_acks: String,
    /// Producer compression codec
    pub compression: String,
    /// Consumer session timeout in milliseconds
    pub session_timeout_ms: u64,
}

/// Channel names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    /// `NEW_BOOK` and `BOOK_UPDATE` notifications
    pub book_notifications: String,
    /// `STOCK_UPDATE` notifications
    pub stock_updates: String,
    /// Informational book events, never reconciled
    pub book_events: String,
    /// Payloads that could not be reconciled after retries
    pub dead_letter: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            book_notifications: "book-notifications".to_string(),
            stock_updates: "book-stock-updates".to_string(),
            book_events: "book-events".to_string(),
            dead_letter: "book-notifications.DLT".to_string(),
        }
    }
}

impl Topics {
    /// Channels the listener subscribes to.
    #[must_use]
    pub fn subscribed(&self) -> [&str; 2] {
        [
            self.book_notifications.as_str(),
            self.stock_updates.as_str(),
        ]
    }
}

/// Listener pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Number of workers in the consumer group
    pub concurrency: usize,
    /// Retries after the first failed attempt before dead-lettering
    pub max_retries: usize,
    /// Fixed delay between retries in milliseconds
    pub retry_backoff_ms: u64,
    /// Delay before a worker resubscribes after its subscription ended
    pub resubscribe_delay_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            retry_backoff_ms: 1000,
            resubscribe_delay_ms: 5000,
        }
    }
}

impl ListenerConfig {
    /// Delay between retries.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Delay before resubscribing.
    #[must_use]
    pub const fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a numeric variable does not parse or
    /// `LISTENER_CONCURRENCY` is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// See [`ServiceConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let defaults = Topics::default();
        let listener_defaults = ListenerConfig::default();

        let concurrency = parse(&lookup, "LISTENER_CONCURRENCY", listener_defaults.concurrency)?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "LISTENER_CONCURRENCY".to_string(),
                value: "0".to_string(),
            });
        }

        Ok(Self {
            kafka: KafkaConfig {
                bootstrap_servers: text("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
                consumer_group_id: text("KAFKA_CONSUMER_GROUP_ID", "book-service-group"),
                auto_offset_reset: text("KAFKA_AUTO_OFFSET_RESET", "earliest"),
                producer_acks: text("KAFKA_PRODUCER_ACKS", "all"),
                compression: text("KAFKA_COMPRESSION", "snappy"),
                session_timeout_ms: parse(&lookup, "KAFKA_SESSION_TIMEOUT_MS", 30_000)?,
            },
            topics: Topics {
                book_notifications: text(
                    "KAFKA_TOPIC_BOOK_NOTIFICATIONS",
                    &defaults.book_notifications,
                ),
                stock_updates: text("KAFKA_TOPIC_STOCK_UPDATES", &defaults.stock_updates),
                book_events: text("KAFKA_TOPIC_BOOK_EVENTS", &defaults.book_events),
                dead_letter: text("KAFKA_TOPIC_DEAD_LETTER", &defaults.dead_letter),
            },
            listener: ListenerConfig {
                concurrency,
                max_retries: parse(&lookup, "LISTENER_MAX_RETRIES", listener_defaults.max_retries)?,
                retry_backoff_ms: parse(
                    &lookup,
                    "LISTENER_RETRY_BACKOFF_MS",
                    listener_defaults.retry_backoff_ms,
                )?,
                resubscribe_delay_ms: parse(
                    &lookup,
                    "LISTENER_RESUBSCRIBE_DELAY_MS",
                    listener_defaults.resubscribe_delay_ms,
                )?,
            },
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = load(&[]).unwrap();
        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
        assert_eq!(config.kafka.consumer_group_id, "book-service-group");
        assert_eq!(config.kafka.auto_offset_reset, "earliest");
        assert_eq!(config.kafka.producer_acks, "all");
        assert_eq!(config.kafka.compression, "snappy");
        assert_eq!(config.kafka.session_timeout_ms, 30_000);
        assert_eq!(config.topics, Topics::default());
        assert_eq!(config.listener, ListenerConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("KAFKA_BOOTSTRAP_SERVERS", "kafka:29092"),
            ("KAFKA_TOPIC_STOCK_UPDATES", "stock"),
            ("LISTENER_CONCURRENCY", "8"),
            ("LISTENER_RETRY_BACKOFF_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.kafka.bootstrap_servers, "kafka:29092");
        assert_eq!(config.topics.stock_updates, "stock");
        assert_eq!(config.topics.subscribed(), ["book-notifications", "stock"]);
        assert_eq!(config.listener.concurrency, 8);
        assert_eq!(config.listener.retry_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn unparseable_number_is_invalid() {
        let err = load(&[("LISTENER_MAX_RETRIES", "three")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "LISTENER_MAX_RETRIES".to_string(),
                value: "three".to_string(),
            }
        );
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let err = load(&[("LISTENER_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "LISTENER_CONCURRENCY"));
    }
}
