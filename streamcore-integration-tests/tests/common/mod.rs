//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use streamcore::{
    BatchErrors, CancellationToken, Event, Handler, HandlerError, Lifecycle, Stream, StreamConfig,
    SubscriberConfig,
};
use streamcore_memory::InMemoryBroker;

pub const STREAM: &str = "orders";
pub const TOPIC: &str = "orders";
pub const SUBJECT: &str = "streamcore.local.default.orders.created";

/// A configuration with short fetch and ack timeouts.
pub fn config() -> StreamConfig {
    StreamConfig::new(STREAM, "memory://local").with_subscriber(SubscriberConfig {
        timeout: Duration::from_millis(200),
        max_retry: 2,
        concurrency: 10,
    })
}

pub async fn connected_stream(broker: &InMemoryBroker) -> Stream {
    connected_stream_with(broker, config()).await
}

pub async fn connected_stream_with(broker: &InMemoryBroker, config: StreamConfig) -> Stream {
    let stream = Stream::new(config, broker.clone()).unwrap();
    stream.connect().await.unwrap();
    stream
}

pub fn event(id: &str) -> Event {
    Event::new(SUBJECT, format!("payload of {id}").into_bytes()).with_id(id)
}

pub fn batch(ids: &[&str]) -> HashMap<String, Event> {
    ids.iter()
        .map(|id| (format!("ref-{id}"), event(id)))
        .collect()
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Handler that records every batch and fails a configurable set of ids.
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<HashMap<String, Event>>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    fail_once: Arc<Mutex<HashSet<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails `id` on every delivery.
    pub fn always_fail(&self, id: &str) {
        self.failing.lock().insert(id.to_string());
    }

    /// Fails `id` on its first delivery only.
    pub fn fail_once(&self, id: &str) {
        self.fail_once.lock().insert(id.to_string());
    }

    pub fn batches(&self) -> Vec<HashMap<String, Event>> {
        self.batches.lock().clone()
    }

    /// Every event handed to the handler, in delivery order.
    pub fn events(&self) -> Vec<Event> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| batch.values().cloned())
            .collect()
    }

    pub fn times_seen(&self, id: &str) -> usize {
        self.events().iter().filter(|event| event.id == id).count()
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle(
        &self,
        _ctx: &CancellationToken,
        events: HashMap<String, Event>,
    ) -> BatchErrors<HandlerError> {
        let mut errors = BatchErrors::new();
        {
            let failing = self.failing.lock();
            let mut fail_once = self.fail_once.lock();
            for id in events.keys() {
                if failing.contains(id) || fail_once.remove(id) {
                    errors.insert(id.clone(), HandlerError::from(format!("cannot handle {id}")));
                }
            }
        }
        self.batches.lock().push(events);
        errors
    }
}
