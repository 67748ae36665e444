//! Pull-based consumption with per-event acknowledgement.
//!
//! A [`Subscriber`] binds a durable consumer to a topic and runs one
//! background loop per subscription:
//!
//! ```text
//! fetch(concurrency, timeout) -> map -> handler(batch) -> ack | nak
//!        ^                                                   |
//!        +---------------------------------------------------+
//! ```
//!
//! Fetch errors are logged and retried, messages that cannot be mapped to a
//! valid event are terminated, events the handler reports as failed are
//! nak'd and redelivered until the consumer's `max_deliver` is exhausted.
//! `disconnect` stops and joins every loop; a batch that has been fetched is
//! always settled first.

use crate::batch::BatchErrors;
use crate::config::SubscriberConfig;
use crate::errors::{HandlerError, StreamError, StreamResult};
use crate::event::Event;
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::mapper::from_message;
use crate::transport::{AckPolicy, ConsumerConfig, DeliverPolicy, Delivery, Transport};
use crate::types::{InstanceName, Namespace, StreamName, Topic};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Processes one fetched batch of events.
///
/// The returned map holds the events that failed, keyed by event id. Every
/// event absent from it is acknowledged; every event present is nak'd and
/// redelivered later.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles `events`, keyed by event id.
    async fn handle(
        &self,
        ctx: &CancellationToken,
        events: HashMap<String, Event>,
    ) -> BatchErrors<HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(CancellationToken, HashMap<String, Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = BatchErrors<HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        ctx: &CancellationToken,
        events: HashMap<String, Event>,
    ) -> BatchErrors<HandlerError> {
        self(ctx.clone(), events).await
    }
}

struct ConsumeLoop {
    topic: Topic,
    ctx: CancellationToken,
    handle: JoinHandle<()>,
}

enum SubscriberState {
    Disconnected,
    Connected {
        stop: CancellationToken,
        loops: Vec<ConsumeLoop>,
    },
}

/// Consumes a stream through a durable consumer named after the subscriber.
pub struct Subscriber {
    name: InstanceName,
    stream: StreamName,
    namespace: Namespace,
    config: SubscriberConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<SubscriberState>,
}

impl Subscriber {
    pub(crate) fn new(
        name: InstanceName,
        stream: StreamName,
        namespace: Namespace,
        config: SubscriberConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name,
            stream,
            namespace,
            config,
            transport,
            state: Mutex::new(SubscriberState::Disconnected),
        }
    }

    /// Name of the subscriber, also the durable consumer name.
    pub const fn name(&self) -> &InstanceName {
        &self.name
    }

    /// Consumer configuration used for `topic`.
    pub fn consumer_config(&self, topic: &Topic) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: self.name.as_ref().to_string(),
            filter_subject: self.namespace.filter(topic),
            max_deliver: self.config.max_deliver(),
            ack_wait: self.config.timeout,
            max_request_batch: self.config.concurrency,
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
        }
    }

    /// Subscribes `handler` to `topic`.
    ///
    /// Returns once the durable consumer exists and the background loop has
    /// been started; only setup failures are reported. The loop runs until
    /// `ctx` is cancelled or the subscriber is disconnected.
    #[instrument(
        name = "subscriber.subscribe",
        skip(self, ctx, handler),
        fields(subscriber = %self.name)
    )]
    pub async fn subscribe<H: Handler>(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        handler: H,
    ) -> StreamResult<()> {
        let mut state = self.state.lock().await;
        let SubscriberState::Connected { stop, loops } = &mut *state else {
            return Err(StreamError::NotConnected);
        };

        let topic = Topic::try_new(topic).map_err(|error| {
            StreamError::InvalidTopic(format!("'{topic}': {error}"))
        })?;
        let consumer = self.consumer_config(&topic);

        self.transport
            .create_or_update_consumer(&self.stream, &consumer)
            .await
            .map_err(|error| {
                error!(
                    subscriber = %self.name,
                    stream = %self.stream,
                    filter = %consumer.filter_subject,
                    error = %error,
                    "[subscriber.subscribe] failed to create consumer"
                );
                StreamError::Transport(error)
            })?;

        info!(
            subscriber = %self.name,
            stream = %self.stream,
            filter = %consumer.filter_subject,
            max_deliver = consumer.max_deliver,
            "[subscriber.subscribe] consumer ready, starting loop"
        );

        loops.retain(|consume| !consume.handle.is_finished() || !consume.ctx.is_cancelled());

        let worker = Worker {
            subscriber: self.name.clone(),
            stream: self.stream.clone(),
            config: self.config,
            transport: Arc::clone(&self.transport),
            handler,
        };
        let handle = tokio::spawn(worker.run(ctx.clone(), stop.clone()));
        loops.push(ConsumeLoop {
            topic,
            ctx: ctx.clone(),
            handle,
        });

        Ok(())
    }

    /// Number of subscription loops that are still running.
    pub async fn active_loops(&self) -> usize {
        match &*self.state.lock().await {
            SubscriberState::Disconnected => 0,
            SubscriberState::Connected { loops, .. } => loops
                .iter()
                .filter(|consume| !consume.handle.is_finished())
                .count(),
        }
    }
}

#[async_trait]
impl Lifecycle for Subscriber {
    #[instrument(name = "subscriber.connect", skip(self), fields(subscriber = %self.name))]
    async fn connect(&self) -> StreamResult<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, SubscriberState::Connected { .. }) {
            return Err(StreamError::AlreadyConnected);
        }

        *state = SubscriberState::Connected {
            stop: CancellationToken::new(),
            loops: Vec::new(),
        };
        debug!(subscriber = %self.name, "[subscriber.connect] connected");
        Ok(())
    }

    #[instrument(name = "subscriber.disconnect", skip(self), fields(subscriber = %self.name))]
    async fn disconnect(&self) -> StreamResult<()> {
        let loops = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, SubscriberState::Disconnected) {
                SubscriberState::Disconnected => return Err(StreamError::NotConnected),
                SubscriberState::Connected { stop, loops } => {
                    stop.cancel();
                    loops
                }
            }
        };

        for consume in loops {
            if let Err(error) = consume.handle.await {
                error!(
                    subscriber = %self.name,
                    topic = %consume.topic,
                    error = %error,
                    "[subscriber.disconnect] subscription loop ended abnormally"
                );
            }
        }

        debug!(subscriber = %self.name, "[subscriber.disconnect] disconnected");
        Ok(())
    }

    async fn readiness(&self) -> StreamResult<()> {
        if matches!(*self.state.lock().await, SubscriberState::Disconnected) {
            return Ok(());
        }
        self.transport.stream_info(&self.stream).await?;
        Ok(())
    }

    async fn liveness(&self) -> StreamResult<()> {
        {
            let state = self.state.lock().await;
            match &*state {
                SubscriberState::Disconnected => return Ok(()),
                SubscriberState::Connected { stop, loops } => {
                    let crashed = loops.iter().any(|consume| {
                        consume.handle.is_finished()
                            && !consume.ctx.is_cancelled()
                            && !stop.is_cancelled()
                    });
                    if crashed {
                        return Err(StreamError::LoopTerminated(
                            self.name.as_ref().to_string(),
                        ));
                    }
                }
            }
        }
        self.transport.stream_info(&self.stream).await?;
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        match *self.state.lock().await {
            SubscriberState::Disconnected => ConnectionState::Disconnected,
            SubscriberState::Connected { .. } => ConnectionState::Connected,
        }
    }
}

struct Worker<H> {
    subscriber: InstanceName,
    stream: StreamName,
    config: SubscriberConfig,
    transport: Arc<dyn Transport>,
    handler: H,
}

impl<H: Handler> Worker<H> {
    async fn run(self, ctx: CancellationToken, stop: CancellationToken) {
        debug!(subscriber = %self.subscriber, "[subscriber.loop] started");

        loop {
            let fetched = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                () = ctx.cancelled() => break,
                fetched = self.transport.fetch(
                    &self.stream,
                    self.subscriber.as_ref(),
                    self.config.concurrency,
                    self.config.timeout,
                ) => fetched,
            };

            match fetched {
                Ok(deliveries) if deliveries.is_empty() => {}
                Ok(deliveries) => self.process(&ctx, deliveries).await,
                Err(error) => {
                    error!(
                        subscriber = %self.subscriber,
                        stream = %self.stream,
                        error = %error,
                        "[subscriber.loop] fetch failed"
                    );
                    tokio::task::yield_now().await;
                }
            }
        }

        debug!(subscriber = %self.subscriber, "[subscriber.loop] stopped");
    }

    async fn process(&self, ctx: &CancellationToken, deliveries: Vec<Delivery>) {
        let mut events = HashMap::with_capacity(deliveries.len());
        let mut settlements: HashMap<String, Vec<Delivery>> =
            HashMap::with_capacity(deliveries.len());

        for delivery in deliveries {
            let event = from_message(delivery.message.clone());
            if let Err(reason) = event.validate() {
                warn!(
                    subscriber = %self.subscriber,
                    subject = %delivery.message.subject,
                    sequence = delivery.info.stream_sequence,
                    reason = %reason,
                    "[subscriber.process] terminating malformed message"
                );
                if let Err(error) = delivery.term().await {
                    error!(
                        subscriber = %self.subscriber,
                        sequence = delivery.info.stream_sequence,
                        error = %error,
                        "[subscriber.process] term failed"
                    );
                }
                continue;
            }

            settlements.entry(event.id.clone()).or_default().push(delivery);
            events.entry(event.id.clone()).or_insert(event);
        }

        if events.is_empty() {
            return;
        }

        let errors = self.handler.handle(ctx, events).await;

        for (event_id, deliveries) in settlements {
            match errors.get(&event_id) {
                None => {
                    for delivery in &deliveries {
                        if let Err(error) = delivery.ack().await {
                            error!(
                                subscriber = %self.subscriber,
                                event_id = %event_id,
                                error = %error,
                                "[subscriber.process] ack failed"
                            );
                        }
                    }
                }
                Some(reason) => {
                    for delivery in &deliveries {
                        warn!(
                            subscriber = %self.subscriber,
                            event_id = %event_id,
                            delivered = delivery.info.delivered,
                            reason = %reason,
                            "[subscriber.process] handler failed, requesting redelivery"
                        );
                        if let Err(error) = delivery.nak(None).await {
                            error!(
                                subscriber = %self.subscriber,
                                event_id = %event_id,
                                error = %error,
                                "[subscriber.process] nak failed"
                            );
                        }
                    }
                }
            }
        }
    }
}
