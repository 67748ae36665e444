//! In-memory broker for `streamcore`
//!
//! This crate provides an in-process implementation of the `Connector` and
//! `Transport` traits from the streamcore crate, useful for testing and
//! development scenarios where no broker is available.
//!
//! The broker keeps append-only streams with subject filters, a dedup window
//! keyed by the `Nats-Msg-Id` header, storage limits, and durable pull
//! consumers with ack deadlines, nak redelivery and `max_deliver`
//! exhaustion. Tests can inspect what was stored and settled, and inject
//! failures into the next operations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod connection;
mod consumer;
mod log;

use crate::connection::MemoryConnection;
use crate::consumer::ConsumerState;
use crate::log::StoredStream;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streamcore::{
    Connector, ConsumerConfig, Message, PublishAck, StreamConfig, StreamDefinition, Transport,
    TransportError, TransportResult,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
pub(crate) struct Faults {
    connects: usize,
    fetches: usize,
    publishes: usize,
    stream_info: usize,
    pub(crate) fail_acks: bool,
    pub(crate) publish_latency: Option<Duration>,
}

fn take(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

impl Faults {
    fn take_connect(&mut self) -> bool {
        take(&mut self.connects)
    }

    pub(crate) fn take_fetch(&mut self) -> bool {
        take(&mut self.fetches)
    }

    pub(crate) fn take_publish(&mut self) -> bool {
        take(&mut self.publishes)
    }

    pub(crate) fn take_stream_info(&mut self) -> bool {
        take(&mut self.stream_info)
    }
}

#[derive(Default)]
pub(crate) struct BrokerState {
    pub(crate) streams: HashMap<String, StoredStream>,
    pub(crate) faults: Faults,
    pub(crate) open_connections: usize,
}

pub(crate) struct Shared {
    pub(crate) state: Mutex<BrokerState>,
    // Woken on every stored message, nak and close.
    pub(crate) notify: Notify,
}

impl Shared {
    pub(crate) fn publish(&self, message: Message) -> TransportResult<PublishAck> {
        let ack = {
            let mut state = self.state.lock();
            let stream = state
                .streams
                .values_mut()
                .find(|stream| stream.captures(&message.subject))
                .ok_or_else(|| TransportError::NoStreamForSubject(message.subject.clone()))?;
            stream.append(message, Instant::now())?
        };

        if !ack.duplicate {
            self.notify.notify_waiters();
        }
        debug!(
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "[memory.publish] stored"
        );
        Ok(ack)
    }
}

/// Thread-safe in-memory broker for testing.
///
/// Clones share the same streams, so a test can keep one handle for
/// inspection while a `Stream` owns another as its connector.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create a new empty broker.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Stores a message without going through a connection.
    ///
    /// Used to inject messages no publisher would produce, such as messages
    /// without a dedup id.
    pub fn publish_raw(&self, message: Message) -> TransportResult<PublishAck> {
        self.shared.publish(message)
    }

    /// Messages currently stored in `stream`, oldest first.
    pub fn messages(&self, stream: &str) -> Vec<Message> {
        self.shared
            .state
            .lock()
            .streams
            .get(stream)
            .map(|stored| {
                stored
                    .log
                    .iter()
                    .map(|stored| stored.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sequence of the stored message carrying dedup id `msg_id`.
    pub fn sequence_of(&self, stream: &str, msg_id: &str) -> Option<u64> {
        self.shared
            .state
            .lock()
            .streams
            .get(stream)?
            .log
            .iter()
            .find(|stored| stored.message.msg_id() == Some(msg_id))
            .map(|stored| stored.sequence)
    }

    /// Definition `stream` was last created or updated with.
    pub fn stream_definition(&self, stream: &str) -> Option<StreamDefinition> {
        self.shared
            .state
            .lock()
            .streams
            .get(stream)
            .map(|stored| stored.definition.clone())
    }

    /// How many times `consumer` has been handed the message at `sequence`.
    pub fn delivery_count(&self, stream: &str, consumer: &str, sequence: u64) -> u64 {
        self.with_consumer(stream, consumer, |state| state.delivery_count(sequence))
            .unwrap_or(0)
    }

    /// Sequences `consumer` has acknowledged, ascending.
    pub fn acked(&self, stream: &str, consumer: &str) -> Vec<u64> {
        self.with_consumer(stream, consumer, |state| {
            state.acked.iter().copied().collect()
        })
        .unwrap_or_default()
    }

    /// Sequences `consumer` has terminated, ascending.
    pub fn terminated(&self, stream: &str, consumer: &str) -> Vec<u64> {
        self.with_consumer(stream, consumer, |state| {
            state.terminated.iter().copied().collect()
        })
        .unwrap_or_default()
    }

    /// Configuration `consumer` was last created or updated with.
    pub fn consumer_config(&self, stream: &str, consumer: &str) -> Option<ConsumerConfig> {
        self.with_consumer(stream, consumer, |state| state.config.clone())
    }

    /// Number of connections opened and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.shared.state.lock().open_connections
    }

    /// Makes the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.shared.state.lock().faults.connects = n;
    }

    /// Makes the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: usize) {
        self.shared.state.lock().faults.fetches = n;
    }

    /// Makes the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.state.lock().faults.publishes = n;
    }

    /// Makes the next `n` stream lookups fail.
    pub fn fail_next_stream_info(&self, n: usize) {
        self.shared.state.lock().faults.stream_info = n;
    }

    /// Delays every publish by `latency`.
    pub fn set_publish_latency(&self, latency: Duration) {
        self.shared.state.lock().faults.publish_latency = Some(latency);
    }

    /// Makes every ack, nak and term fail while `fail` is set.
    pub fn fail_acks(&self, fail: bool) {
        self.shared.state.lock().faults.fail_acks = fail;
    }

    fn with_consumer<T>(
        &self,
        stream: &str,
        consumer: &str,
        read: impl FnOnce(&ConsumerState) -> T,
    ) -> Option<T> {
        let state = self.shared.state.lock();
        let consumer = state.streams.get(stream)?.consumers.get(consumer)?;
        Some(read(consumer))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, config: &StreamConfig) -> TransportResult<Arc<dyn Transport>> {
        {
            let mut state = self.shared.state.lock();
            if state.faults.take_connect() {
                return Err(TransportError::Connection(format!(
                    "injected connect failure for {}",
                    config.uri
                )));
            }
            state.open_connections += 1;
        }
        debug!(uri = %config.uri, "[memory.connection] opened");
        Ok(Arc::new(MemoryConnection::new(Arc::clone(&self.shared))))
    }
}
