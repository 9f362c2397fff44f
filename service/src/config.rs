//! Configuration management for the booking service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unlike a missing variable, an unparsable one is an error: a typo in
//! `PORT` should stop the service, not silently bind to 8080.

use booking_pipeline_core::{
    AutoOffsetReset, SubscriptionConfig, TOPIC_BOOKING_CONFIRMATION, TOPIC_BOOKING_REQUEST,
};
use booking_pipeline_runtime::BackoffPolicy;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but its value cannot be used
    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        /// Environment variable name
        name: &'static str,
        /// The offending value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Broker and topic names
    pub kafka: KafkaConfig,
    /// Processing consumer settings
    pub consumer: ConsumerConfig,
    /// Producer settings
    pub producer: ProducerConfig,
    /// Backoff between failed loop iterations
    pub backoff: BackoffConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

/// Broker and topic configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic carrying booking requests
    pub request_topic: String,
    /// Topic carrying booking confirmations
    pub confirmation_topic: String,
    /// Topic for undecodable requests; none disables dead-lettering
    pub dead_letter_topic: Option<String>,
}

/// Consumer configuration for the processing loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Consumer group (default: `booking-processing`)
    pub group_id: String,
    /// Start position without committed offsets (default: earliest)
    pub auto_offset_reset: AutoOffsetReset,
    /// Background commits instead of commit-after-read (default: false)
    pub enable_auto_commit: bool,
    /// Report end of partition (default: false)
    pub enable_partition_eof: bool,
    /// Group session timeout in milliseconds (default: 6000)
    pub session_timeout_ms: u64,
}

/// Producer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Acknowledgment mode: `0`, `1` or `all` (default: `all`)
    pub acks: String,
    /// Compression codec (default: `none`)
    pub compression: String,
    /// How long a write waits for its delivery report, in milliseconds
    pub delivery_timeout_ms: u64,
}

/// Backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// First delay in milliseconds; 0 disables backoff (default)
    pub initial_ms: u64,
    /// Delay cap in milliseconds (default: 30000)
    pub max_ms: u64,
    /// Growth factor per consecutive failure (default: 2.0)
    pub multiplier: f64,
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a set variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let acks = text("PRODUCER_ACKS", "all");
        if !matches!(acks.as_str(), "0" | "1" | "all" | "-1") {
            return Err(ConfigError::Invalid {
                name: "PRODUCER_ACKS",
                value: acks,
                reason: "expected 0, 1 or all".to_string(),
            });
        }

        let compression = text("PRODUCER_COMPRESSION", "none");
        if !matches!(
            compression.as_str(),
            "none" | "gzip" | "snappy" | "lz4" | "zstd"
        ) {
            return Err(ConfigError::Invalid {
                name: "PRODUCER_COMPRESSION",
                value: compression,
                reason: "expected none, gzip, snappy, lz4 or zstd".to_string(),
            });
        }

        let multiplier: f64 = parse(&lookup, "BACKOFF_MULTIPLIER", 2.0)?;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                name: "BACKOFF_MULTIPLIER",
                value: multiplier.to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }

        Ok(Self {
            kafka: KafkaConfig {
                brokers: text("KAFKA_BROKERS", "localhost:9092"),
                request_topic: text("BOOKING_REQUEST_TOPIC", TOPIC_BOOKING_REQUEST),
                confirmation_topic: text("BOOKING_CONFIRMATION_TOPIC", TOPIC_BOOKING_CONFIRMATION),
                dead_letter_topic: lookup("BOOKING_DEAD_LETTER_TOPIC").filter(|t| !t.is_empty()),
            },
            consumer: ConsumerConfig {
                group_id: text("CONSUMER_GROUP", "booking-processing"),
                auto_offset_reset: parse(
                    &lookup,
                    "CONSUMER_AUTO_OFFSET_RESET",
                    AutoOffsetReset::Earliest,
                )?,
                enable_auto_commit: parse(&lookup, "CONSUMER_ENABLE_AUTO_COMMIT", false)?,
                enable_partition_eof: parse(&lookup, "CONSUMER_ENABLE_PARTITION_EOF", false)?,
                session_timeout_ms: parse(&lookup, "CONSUMER_SESSION_TIMEOUT_MS", 6000)?,
            },
            producer: ProducerConfig {
                acks,
                compression,
                delivery_timeout_ms: parse(&lookup, "PRODUCER_DELIVERY_TIMEOUT_MS", 5000)?,
            },
            backoff: BackoffConfig {
                initial_ms: parse(&lookup, "BACKOFF_INITIAL_MS", 0)?,
                max_ms: parse(&lookup, "BACKOFF_MAX_MS", 30_000)?,
                multiplier,
            },
            server: ServerConfig {
                host: text("HOST", "0.0.0.0"),
                port: parse(&lookup, "PORT", 8080)?,
            },
        })
    }

    /// Subscription for the processing loop's reader.
    #[must_use]
    pub fn request_subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig::new(&self.kafka.request_topic, &self.consumer.group_id)
            .auto_offset_reset(self.consumer.auto_offset_reset)
            .enable_auto_commit(self.consumer.enable_auto_commit)
            .enable_partition_eof(self.consumer.enable_partition_eof)
    }

    /// Backoff policy for the processing loop.
    #[must_use]
    pub fn backoff_policy(&self) -> BackoffPolicy {
        if self.backoff.initial_ms == 0 {
            return BackoffPolicy::none();
        }
        BackoffPolicy::builder()
            .initial_delay(Duration::from_millis(self.backoff.initial_ms))
            .max_delay(Duration::from_millis(self.backoff.max_ms))
            .multiplier(self.backoff.multiplier)
            .build()
    }

    /// Consumer group session timeout.
    #[must_use]
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.consumer.session_timeout_ms)
    }

    /// Producer delivery timeout.
    #[must_use]
    pub const fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.producer.delivery_timeout_ms)
    }

    /// `host:port` to bind the HTTP server to.
    #[must_use]
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
