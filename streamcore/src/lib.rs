//! `streamcore` - publish/subscribe streaming over a durable log
//!
//! A [`Stream`] owns one broker connection and hands out named
//! [`Publisher`]s and [`Subscriber`]s that share it:
//!
//! - publishers send batches of [`Event`]s concurrently, bounded by a rate
//!   limit, and report per-event failures in a [`BatchErrors`] map
//! - subscribers pull batches from a durable consumer, hand them to a
//!   [`Handler`] and acknowledge or redeliver each event according to the
//!   handler's verdict
//!
//! The broker itself sits behind the [`Transport`] and [`Connector`] traits.
//! `streamcore-memory` provides an in-process implementation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod config;
pub mod errors;
pub mod event;
pub mod lifecycle;
pub mod mapper;
pub mod publisher;
pub mod stream;
pub mod subscriber;
pub mod transport;
pub mod types;
mod validation;

pub use batch::BatchErrors;
pub use config::{Limits, PublisherConfig, StreamConfig, SubscriberConfig};
pub use errors::{
    ConfigError, EventValidationError, HandlerError, PublishError, StreamError, StreamResult,
    TransportError, TransportResult,
};
pub use event::{Event, TRACE_CONTEXT_KEY};
pub use lifecycle::{ConnectionState, Lifecycle};
pub use mapper::{from_message, to_message, Message, MSG_ID_HEADER};
pub use publisher::Publisher;
pub use stream::Stream;
pub use subscriber::{Handler, Subscriber};
pub use transport::{
    AckPolicy, Acker, Connector, ConsumerConfig, DeliverPolicy, Delivery, DeliveryInfo,
    PublishAck, StreamDefinition, StreamInfo, Transport,
};
pub use types::{InstanceName, Namespace, StreamName, Topic};
pub use validation::subject_matches;

pub use tokio_util::sync::CancellationToken;
