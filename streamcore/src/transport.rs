//! The broker transport contract.
//!
//! Publishers and subscribers never talk to a broker client directly; they
//! go through [`Transport`], a narrow pull-consumer interface:
//!
//! - `publish(message)` returns the broker's ack, including its duplicate flag
//! - `create_or_update_consumer(config)` declares a durable pull consumer
//! - `fetch(batch, expires)` pulls deliveries that must each be settled with
//!   [`Acker::ack`], [`Acker::nak`] or [`Acker::term`]
//!
//! A [`Connector`] opens transports, which lets a `Stream` own the
//! connection lifecycle while tests substitute an in-memory broker.

use crate::config::{Limits, StreamConfig};
use crate::errors::TransportResult;
use crate::mapper::Message;
use crate::types::StreamName;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Definition of a stream as created on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefinition {
    /// Stream name
    pub name: StreamName,
    /// Subjects captured by the stream
    pub subjects: Vec<String>,
    /// Replica count
    pub replicas: usize,
    /// Storage limits
    pub limits: Limits,
    /// Dedup window
    pub duplicate_window: Duration,
}

impl StreamDefinition {
    /// Builds the definition described by a validated configuration.
    pub fn from_config(name: StreamName, config: &StreamConfig) -> Self {
        Self {
            name,
            subjects: vec![config.namespace.wildcard()],
            replicas: config.replicas,
            limits: config.limits,
            duplicate_window: config.duplicate_window,
        }
    }
}

/// Current state of a stream on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream name
    pub name: String,
    /// Number of stored messages
    pub messages: u64,
    /// Total stored bytes
    pub bytes: u64,
    /// Sequence of the first stored message
    pub first_sequence: u64,
    /// Sequence of the last stored message
    pub last_sequence: u64,
    /// Number of consumers bound to the stream
    pub consumers: usize,
}

/// Broker acknowledgement of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    /// Stream that stored the message
    pub stream: String,
    /// Sequence assigned to the message
    pub sequence: u64,
    /// True when the message id was already stored within the dedup window
    pub duplicate: bool,
}

/// Where a new consumer starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverPolicy {
    /// Every message still stored in the stream
    All,
    /// Only messages published after the consumer was created
    New,
}

/// How a consumer expects deliveries to be acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckPolicy {
    /// Every delivery is settled individually
    Explicit,
    /// Deliveries are never acknowledged
    None,
}

/// Configuration of a durable pull consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Durable name, also the consumer identity
    pub durable_name: String,
    /// Subject filter, may contain wildcards
    pub filter_subject: String,
    /// Maximum deliveries of one message, the first one included
    pub max_deliver: i64,
    /// Time after which an unsettled delivery is redelivered
    pub ack_wait: Duration,
    /// Maximum messages per fetch
    pub max_request_batch: usize,
    /// Start position
    pub deliver_policy: DeliverPolicy,
    /// Acknowledgement mode
    pub ack_policy: AckPolicy,
}

/// Broker bookkeeping of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryInfo {
    /// Sequence of the message in its stream
    pub stream_sequence: u64,
    /// How many times the message has been delivered, this delivery included
    pub delivered: u64,
}

/// Settles one delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Marks the delivery as processed; it is never redelivered.
    async fn ack(&self) -> TransportResult<()>;

    /// Asks for redelivery, optionally after `delay`, bounded by `max_deliver`.
    async fn nak(&self, delay: Option<Duration>) -> TransportResult<()>;

    /// Abandons the message; it is never redelivered.
    async fn term(&self) -> TransportResult<()>;
}

/// A message pulled from a consumer together with its acknowledger.
pub struct Delivery {
    /// The delivered message
    pub message: Message,
    /// Delivery bookkeeping
    pub info: DeliveryInfo,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Creates a delivery settled through `acker`.
    pub fn new(message: Message, info: DeliveryInfo, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            info,
            acker,
        }
    }

    /// See [`Acker::ack`].
    pub async fn ack(&self) -> TransportResult<()> {
        self.acker.ack().await
    }

    /// See [`Acker::nak`].
    pub async fn nak(&self, delay: Option<Duration>) -> TransportResult<()> {
        self.acker.nak(delay).await
    }

    /// See [`Acker::term`].
    pub async fn term(&self) -> TransportResult<()> {
        self.acker.term().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// A connection to a broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Creates the stream, or updates it when it already exists.
    async fn create_or_update_stream(&self, definition: &StreamDefinition) -> TransportResult<()>;

    /// Looks a stream up; used as the cheap health round trip.
    async fn stream_info(&self, stream: &StreamName) -> TransportResult<StreamInfo>;

    /// Publishes one message and waits for the broker's ack.
    async fn publish(&self, message: Message) -> TransportResult<PublishAck>;

    /// Creates the durable consumer, or updates it when it already exists.
    async fn create_or_update_consumer(
        &self,
        stream: &StreamName,
        config: &ConsumerConfig,
    ) -> TransportResult<()>;

    /// Pulls up to `batch` deliveries, waiting at most `expires` for the first.
    ///
    /// An empty result means nothing arrived in time.
    ///
    /// Must be cancel-safe: subscribers drop an in-flight fetch when they
    /// stop, so nothing may be claimed from the consumer until the future
    /// completes. A message claimed and then dropped stays pending until
    /// `ack_wait` expires.
    async fn fetch(
        &self,
        stream: &StreamName,
        consumer: &str,
        batch: usize,
        expires: Duration,
    ) -> TransportResult<Vec<Delivery>>;

    /// Closes the connection. Later calls fail with `TransportError::Closed`.
    async fn close(&self) -> TransportResult<()>;
}

/// Opens transports for a stream configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to the broker addressed by `config.uri`.
    async fn connect(&self, config: &StreamConfig) -> TransportResult<Arc<dyn Transport>>;
}
