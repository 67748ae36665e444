//! Concurrent batch publishing.
//!
//! [`Publisher::publish`] takes a map of caller ref ids to events and returns
//! the errors of that batch under the same ref ids:
//!
//! 1. invalid events are reported immediately and never reach the broker
//! 2. valid events are published by a pool bounded by `rate_limit`
//! 3. a broker duplicate ack is reported as [`PublishError::Duplicated`]
//! 4. transport failures are reported as [`PublishError::Transport`]
//! 5. when the caller's token is cancelled, every ref id that has not resolved
//!    yet is reported as [`PublishError::Cancelled`]
//!
//! A ref id absent from the result was published successfully.

use crate::batch::BatchErrors;
use crate::config::PublisherConfig;
use crate::errors::PublishError;
use crate::event::Event;
use crate::mapper::to_message;
use crate::transport::Transport;
use crate::types::InstanceName;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Publishes batches of events through a shared transport.
pub struct Publisher {
    name: InstanceName,
    config: PublisherConfig,
    transport: Arc<dyn Transport>,
}

impl Publisher {
    pub(crate) fn new(
        name: InstanceName,
        config: PublisherConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name,
            config,
            transport,
        }
    }

    /// Name this publisher is registered under.
    pub const fn name(&self) -> &InstanceName {
        &self.name
    }

    /// Publishes `events` and reports the failures by ref id.
    ///
    /// Cancelling `ctx` stops the wait, not the broker calls already in
    /// flight; publishes that have not started yet are skipped.
    #[instrument(
        name = "publisher.publish",
        skip(self, ctx, events),
        fields(publisher = %self.name, count = events.len())
    )]
    pub async fn publish(
        &self,
        ctx: &CancellationToken,
        events: HashMap<String, Event>,
    ) -> BatchErrors<PublishError> {
        let mut errors = BatchErrors::new();
        let mut valid = Vec::with_capacity(events.len());

        for (ref_id, event) in events {
            match event.validate() {
                Ok(()) => valid.push((ref_id, event)),
                Err(error) => {
                    warn!(
                        publisher = %self.name,
                        ref_id = %ref_id,
                        event_id = %event.id,
                        error = %error,
                        "[publisher.publish] event failed validation"
                    );
                    errors.insert(ref_id, PublishError::Validation(error));
                }
            }
        }

        if valid.is_empty() {
            return errors;
        }

        let mut unresolved: HashSet<String> =
            valid.iter().map(|(ref_id, _)| ref_id.clone()).collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool_cancel = ctx.child_token();

        // The pool runs detached so in-flight publishes finish even when the
        // caller stops waiting.
        tokio::spawn(run_pool(
            self.name.clone(),
            Arc::clone(&self.transport),
            valid,
            self.config.rate_limit,
            pool_cancel,
            tx,
        ));

        loop {
            tokio::select! {
                biased;
                outcome = rx.recv() => match outcome {
                    Some((ref_id, result)) => {
                        unresolved.remove(&ref_id);
                        if let Err(error) = result {
                            errors.insert(ref_id, error);
                        }
                    }
                    None => break,
                },
                () = ctx.cancelled() => {
                    debug!(
                        publisher = %self.name,
                        unresolved = unresolved.len(),
                        "[publisher.publish] cancelled while waiting"
                    );
                    for ref_id in unresolved.drain() {
                        errors.insert(ref_id, PublishError::Cancelled);
                    }
                    break;
                }
            }
        }

        errors
    }
}

type Outcome = (String, Result<(), PublishError>);

async fn run_pool(
    publisher: InstanceName,
    transport: Arc<dyn Transport>,
    events: Vec<(String, Event)>,
    rate_limit: usize,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Outcome>,
) {
    stream::iter(events)
        .map(|(ref_id, event)| {
            let publisher = publisher.clone();
            let transport = Arc::clone(&transport);
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return (ref_id, Err(PublishError::Cancelled));
                }
                let result = publish_one(&publisher, transport.as_ref(), &ref_id, &event).await;
                (ref_id, result)
            }
        })
        .buffer_unordered(rate_limit.max(1))
        .for_each(|outcome| {
            // The receiver is gone once the caller stopped waiting.
            let _ = tx.send(outcome);
            async {}
        })
        .await;
}

async fn publish_one(
    publisher: &InstanceName,
    transport: &dyn Transport,
    ref_id: &str,
    event: &Event,
) -> Result<(), PublishError> {
    match transport.publish(to_message(event)).await {
        Ok(ack) if ack.duplicate => {
            warn!(
                publisher = %publisher,
                ref_id = %ref_id,
                event_id = %event.id,
                sequence = ack.sequence,
                "[publisher.publish] broker reported duplicate event"
            );
            Err(PublishError::Duplicated {
                id: event.id.clone(),
            })
        }
        Ok(ack) => {
            debug!(
                publisher = %publisher,
                ref_id = %ref_id,
                event_id = %event.id,
                stream = %ack.stream,
                sequence = ack.sequence,
                "[publisher.publish] event published"
            );
            Ok(())
        }
        Err(error) => {
            error!(
                publisher = %publisher,
                ref_id = %ref_id,
                event_id = %event.id,
                subject = %event.subject,
                error = %error,
                "[publisher.publish] transport failed to publish event"
            );
            Err(PublishError::Transport(error))
        }
    }
}
