//! Broker connections and delivery acknowledgers.

use crate::consumer::ConsumerState;
use crate::log::StoredStream;
use crate::{BrokerState, Shared};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamcore::{
    Acker, ConsumerConfig, Delivery, DeliveryInfo, Message, PublishAck, StreamDefinition,
    StreamInfo, StreamName, Transport, TransportError, TransportResult,
};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::debug;

pub(crate) struct MemoryConnection {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

fn stream_mut<'a>(
    state: &'a mut BrokerState,
    stream: &str,
) -> TransportResult<&'a mut StoredStream> {
    state
        .streams
        .get_mut(stream)
        .ok_or_else(|| TransportError::NoStream(stream.to_string()))
}

#[async_trait]
impl Transport for MemoryConnection {
    async fn create_or_update_stream(&self, definition: &StreamDefinition) -> TransportResult<()> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        match state.streams.get_mut(definition.name.as_ref()) {
            Some(stream) => {
                stream.definition = definition.clone();
                stream.enforce_limits();
                debug!(stream = %definition.name, "[memory.stream] updated");
            }
            None => {
                state.streams.insert(
                    definition.name.to_string(),
                    StoredStream::new(definition.clone()),
                );
                debug!(
                    stream = %definition.name,
                    subjects = ?definition.subjects,
                    "[memory.stream] created"
                );
            }
        }
        Ok(())
    }

    async fn stream_info(&self, stream: &StreamName) -> TransportResult<StreamInfo> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        if state.faults.take_stream_info() {
            return Err(TransportError::Connection("injected stream info failure".to_string()));
        }
        let stored = stream_mut(&mut state, stream.as_ref())?;
        stored.expire(Instant::now());

        Ok(StreamInfo {
            name: stored.definition.name.to_string(),
            messages: stored.log.len() as u64,
            bytes: stored.bytes(),
            first_sequence: stored.first_sequence(),
            last_sequence: stored.last_sequence(),
            consumers: stored.consumers.len(),
        })
    }

    async fn publish(&self, message: Message) -> TransportResult<PublishAck> {
        self.ensure_open()?;
        let latency = self.shared.state.lock().faults.publish_latency;
        if let Some(latency) = latency {
            sleep(latency).await;
        }

        {
            let mut state = self.shared.state.lock();
            if state.faults.take_publish() {
                return Err(TransportError::Connection("injected publish failure".to_string()));
            }
        }
        self.shared.publish(message)
    }

    async fn create_or_update_consumer(
        &self,
        stream: &StreamName,
        config: &ConsumerConfig,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        let mut state = self.shared.state.lock();
        let stored = stream_mut(&mut state, stream.as_ref())?;
        let last_sequence = stored.last_sequence();

        stored
            .consumers
            .entry(config.durable_name.clone())
            .and_modify(|consumer| consumer.config = config.clone())
            .or_insert_with(|| ConsumerState::new(config.clone(), last_sequence));

        debug!(
            stream = %stream,
            consumer = %config.durable_name,
            filter = %config.filter_subject,
            "[memory.consumer] ready"
        );
        Ok(())
    }

    async fn fetch(
        &self,
        stream: &StreamName,
        consumer: &str,
        batch: usize,
        expires: Duration,
    ) -> TransportResult<Vec<Delivery>> {
        self.ensure_open()?;
        {
            let mut state = self.shared.state.lock();
            if state.faults.take_fetch() {
                return Err(TransportError::Connection("injected fetch failure".to_string()));
            }
        }

        let deadline = Instant::now() + expires;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let wake = {
                let mut state = self.shared.state.lock();
                let stored = stream_mut(&mut state, stream.as_ref())?;
                stored.expire(now);
                let durable = stored
                    .consumers
                    .get_mut(consumer)
                    .ok_or_else(|| TransportError::NoConsumer(consumer.to_string()))?;

                let picked = durable.next_batch(&stored.log, batch.max(1), now);
                if !picked.is_empty() {
                    return Ok(picked
                        .into_iter()
                        .map(|picked| {
                            let acker = MemoryAcker {
                                shared: Arc::clone(&self.shared),
                                stream: stream.to_string(),
                                consumer: consumer.to_string(),
                                sequence: picked.sequence,
                            };
                            Delivery::new(
                                picked.message,
                                DeliveryInfo {
                                    stream_sequence: picked.sequence,
                                    delivered: picked.delivered,
                                },
                                Box::new(acker),
                            )
                        })
                        .collect());
                }
                durable.next_wake()
            };

            if now >= deadline || self.closed.load(Ordering::Acquire) {
                return Ok(Vec::new());
            }
            let until = wake.map_or(deadline, |wake| wake.min(deadline));

            tokio::select! {
                () = notified.as_mut() => {}
                () = sleep_until(until) => {}
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TransportError::Closed);
        }
        self.shared.state.lock().open_connections -= 1;
        self.shared.notify.notify_waiters();
        debug!("[memory.connection] closed");
        Ok(())
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    stream: String,
    consumer: String,
    sequence: u64,
}

impl MemoryAcker {
    fn settle(
        &self,
        settle: impl FnOnce(&mut ConsumerState),
    ) -> TransportResult<()> {
        let mut state = self.shared.state.lock();
        if state.faults.fail_acks {
            return Err(TransportError::Rejected("injected ack failure".to_string()));
        }
        let stored = stream_mut(&mut state, &self.stream)?;
        let consumer = stored
            .consumers
            .get_mut(&self.consumer)
            .ok_or_else(|| TransportError::NoConsumer(self.consumer.clone()))?;
        settle(consumer);
        Ok(())
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> TransportResult<()> {
        self.settle(|consumer| consumer.ack(self.sequence))
    }

    async fn nak(&self, delay: Option<Duration>) -> TransportResult<()> {
        self.settle(|consumer| consumer.nak(self.sequence, delay, Instant::now()))?;
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self) -> TransportResult<()> {
        self.settle(|consumer| consumer.term(self.sequence))
    }
}
