//! Stream configuration and its validation.
//!
//! A [`StreamConfig`] is a plain, serde-friendly value so it can be loaded
//! from any document format. It is checked once, by [`StreamConfig::validate`]
//! (called from `Stream::new`), and every violation is a permanent
//! [`ConfigError`] naming the offending field.
//!
//! Durations are serialized as integer milliseconds (`*_ms` keys).

use crate::errors::ConfigError;
use crate::types::{Namespace, StreamName};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// URI schemes accepted for the broker address.
pub const SUPPORTED_SCHEMES: [&str; 5] = ["nats", "tls", "ws", "wss", "memory"];

/// Configuration of a [`Stream`](crate::stream::Stream) and everything it spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Durable log identifier
    pub name: String,
    /// Broker address, e.g. `nats://127.0.0.1:4222`
    pub uri: String,
    /// Subject namespace captured by the stream
    #[serde(default)]
    pub namespace: Namespace,
    /// Number of replicas of the stream (0 lets the broker decide)
    #[serde(default)]
    pub replicas: usize,
    /// Storage limits of the stream
    #[serde(default)]
    pub limits: Limits,
    /// Window in which a republished event id is recognised as duplicate
    #[serde(
        default = "default_duplicate_window",
        rename = "duplicate_window_ms",
        with = "duration_millis"
    )]
    pub duplicate_window: Duration,
    /// Publisher tuning
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Subscriber tuning
    #[serde(default)]
    pub subscriber: SubscriberConfig,
}

/// Storage limits of a stream. Every limit must be greater than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum total size of stored messages in bytes
    pub bytes: u64,
    /// Maximum size of one message in bytes
    pub msg_size: usize,
    /// Maximum number of stored messages
    pub msg_count: u64,
    /// Maximum age of a stored message
    #[serde(rename = "msg_age_ms", with = "duration_millis")]
    pub msg_age: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            bytes: 100 * 1024 * 1024,
            msg_size: 1024 * 1024,
            msg_count: 1_000_000,
            msg_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Publisher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Maximum number of publishes in flight per `publish` call
    pub rate_limit: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { rate_limit: 100 }
    }
}

/// Subscriber tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    /// Ack wait of the durable consumer and maximum wait of one fetch
    #[serde(rename = "timeout_ms", with = "duration_millis")]
    pub timeout: Duration,
    /// How many times a failed event is redelivered
    pub max_retry: u32,
    /// Maximum number of messages per fetch
    pub concurrency: usize,
}

impl SubscriberConfig {
    /// Delivery bound of the durable consumer: the first delivery plus every retry.
    pub fn max_deliver(&self) -> i64 {
        i64::from(self.max_retry) + 1
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retry: 3,
            concurrency: 100,
        }
    }
}

const fn default_duplicate_window() -> Duration {
    Duration::from_secs(120)
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "streamcore".to_string(),
            uri: "nats://127.0.0.1:4222".to_string(),
            namespace: Namespace::default(),
            replicas: 0,
            limits: Limits::default(),
            duplicate_window: default_duplicate_window(),
            publisher: PublisherConfig::default(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Creates a configuration with default tuning.
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON document and validates the result.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(document).map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the subject namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    /// Sets the replica count.
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Sets the storage limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the duplicate detection window.
    #[must_use]
    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    /// Sets the publisher concurrency bound.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: usize) -> Self {
        self.publisher.rate_limit = rate_limit;
        self
    }

    /// Sets the subscriber tuning.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: SubscriberConfig) -> Self {
        self.subscriber = subscriber;
        self
    }

    /// The validated stream name.
    pub fn stream_name(&self) -> Result<StreamName, ConfigError> {
        StreamName::try_new(self.name.clone())
            .map_err(|error| ConfigError::InvalidName(error.to_string()))
    }

    /// Checks every field, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream_name()?;
        validate_uri(&self.uri)?;

        if let Some((field, segment)) = self.namespace.invalid_segment() {
            return Err(ConfigError::InvalidNamespace {
                field,
                reason: format!("'{segment}' is not a subject token"),
            });
        }

        non_zero("limits.bytes", self.limits.bytes)?;
        non_zero("limits.msg_size", self.limits.msg_size as u64)?;
        non_zero("limits.msg_count", self.limits.msg_count)?;
        non_zero_duration("limits.msg_age", self.limits.msg_age)?;
        non_zero_duration("duplicate_window", self.duplicate_window)?;
        non_zero("publisher.rate_limit", self.publisher.rate_limit as u64)?;
        non_zero_duration("subscriber.timeout", self.subscriber.timeout)?;
        non_zero("subscriber.concurrency", self.subscriber.concurrency as u64)?;

        if self.subscriber.max_retry < 1 {
            return Err(ConfigError::OutOfRange {
                field: "subscriber.max_retry",
                constraint: ">= 1",
                actual: self.subscriber.max_retry.to_string(),
            });
        }

        Ok(())
    }
}

fn validate_uri(uri: &str) -> Result<(), ConfigError> {
    if uri.trim().is_empty() {
        return Err(ConfigError::InvalidUri("uri is required".to_string()));
    }

    let Some((scheme, rest)) = uri.split_once("://") else {
        return Err(ConfigError::InvalidUri(format!("'{uri}' has no scheme")));
    };

    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return Err(ConfigError::InvalidUri(format!(
            "scheme '{scheme}' is not one of {SUPPORTED_SCHEMES:?}"
        )));
    }

    if rest.is_empty() || rest.starts_with('/') {
        return Err(ConfigError::InvalidUri(format!("'{uri}' has no host")));
    }

    Ok(())
}

fn non_zero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            field,
            constraint: "> 0",
            actual: value.to_string(),
        });
    }
    Ok(())
}

fn non_zero_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::OutOfRange {
            field,
            constraint: "> 0ms",
            actual: format!("{value:?}"),
        });
    }
    Ok(())
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
