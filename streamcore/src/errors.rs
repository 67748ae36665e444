//! Error types for streamcore.
//!
//! The error design separates failures by how a caller is expected to react:
//!
//! - **ConfigError**: invalid configuration, permanent, raised by `Stream::new`
//! - **StreamError**: lifecycle misuse and setup failures of streams and subscribers
//! - **EventValidationError**: a single event is malformed, never retried internally
//! - **PublishError**: per-event publish outcome reported inside a batch result
//! - **TransportError**: failures reported by the broker transport
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use streamcore::errors::{PublishError, StreamError};
//!
//! match stream.publisher("orders").await {
//!     Ok(publisher) => publish_all(publisher).await,
//!     Err(StreamError::NotConnected) => {
//!         stream.connect().await?;
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

use thiserror::Error;

/// Errors raised while validating a [`StreamConfig`](crate::config::StreamConfig).
///
/// Configuration errors are permanent: retrying with the same configuration
/// always fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The stream name is missing or malformed.
    #[error("config.name: {0}")]
    InvalidName(String),

    /// The broker URI is missing, has no host, or uses an unsupported scheme.
    #[error("config.uri: {0}")]
    InvalidUri(String),

    /// A namespace segment is not a valid subject token.
    #[error("config.namespace.{field}: {reason}")]
    InvalidNamespace {
        /// Which namespace segment failed
        field: &'static str,
        /// Why it failed
        reason: String,
    },

    /// A numeric setting is outside its allowed range.
    #[error("config.{field}: must be {constraint} (was {actual})")]
    OutOfRange {
        /// Dotted path of the offending field
        field: &'static str,
        /// The constraint that was violated
        constraint: &'static str,
        /// The rejected value, rendered for diagnostics
        actual: String,
    },

    /// The configuration document could not be parsed.
    #[error("config could not be parsed: {0}")]
    Parse(String),
}

/// Errors raised by [`Stream`](crate::stream::Stream) and
/// [`Subscriber`](crate::subscriber::Subscriber) lifecycle and setup operations.
///
/// # Error Handling Strategy
///
/// - **Config**: fix the configuration, never retry
/// - **AlreadyConnected / NotConnected**: programmer misuse of the lifecycle
/// - **InvalidName / InvalidTopic**: fix the argument
/// - **Transport**: broker failure, the caller decides whether to retry
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// `connect` was called on a connected component.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation requires a connected component.
    #[error("not connected")]
    NotConnected,

    /// A publisher or subscriber name was rejected.
    #[error("invalid instance name: {0}")]
    InvalidName(String),

    /// A subscription topic was rejected.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// A subscription loop ended abnormally.
    #[error("subscription loop of '{0}' terminated unexpectedly")]
    LoopTerminated(String),

    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Reasons an [`Event`](crate::event::Event) fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventValidationError {
    /// The subject is empty.
    #[error("event subject is required")]
    EmptySubject,

    /// The subject contains characters or tokens outside the allowed syntax.
    #[error("event subject '{0}' is malformed: expected [A-Za-z0-9_] tokens separated by '.'")]
    InvalidSubject(String),

    /// The id is empty.
    #[error("event id is required")]
    EmptyId,

    /// The payload is empty.
    #[error("event data is required")]
    EmptyData,

    /// A metadata key collides with a header the mapper sets itself.
    #[error("metadata key '{0}' is reserved")]
    ReservedMetadataKey(String),
}

/// Outcome of publishing one event, reported under its ref id.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// The event failed validation and was never sent.
    #[error("event validation failed: {0}")]
    Validation(#[from] EventValidationError),

    /// The broker recognised the event id as already published.
    ///
    /// Callers must not assume that republishing under this ref id is safe.
    #[error("event '{id}' was already published")]
    Duplicated {
        /// The duplicated event id
        id: String,
    },

    /// The transport failed to publish the message.
    #[error("publish failed: {0}")]
    Transport(#[from] TransportError),

    /// The caller stopped waiting before the publish resolved.
    #[error("publish cancelled before completion")]
    Cancelled,
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connection has been closed.
    #[error("connection closed")]
    Closed,

    /// The named stream does not exist.
    #[error("stream '{0}' not found")]
    NoStream(String),

    /// No stream captures the subject of a published message.
    #[error("no stream captures subject '{0}'")]
    NoStreamForSubject(String),

    /// The named consumer does not exist.
    #[error("consumer '{0}' not found")]
    NoConsumer(String),

    /// The message exceeds the stream's maximum message size.
    #[error("message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the rejected message
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// The broker rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Error reported by a subscription handler for one event.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for stream lifecycle results.
pub type StreamResult<T> = Result<T, StreamError>;

/// Type alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;
