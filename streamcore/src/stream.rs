//! The stream: broker connection owner and publisher/subscriber registry.

use crate::config::StreamConfig;
use crate::errors::{StreamError, StreamResult};
use crate::lifecycle::{ConnectionState, Lifecycle};
use crate::publisher::Publisher;
use crate::subscriber::Subscriber;
use crate::transport::{Connector, StreamDefinition, Transport};
use crate::types::{InstanceName, StreamName};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

struct Connection {
    transport: Arc<dyn Transport>,
    publishers: HashMap<InstanceName, Arc<Publisher>>,
    subscribers: HashMap<InstanceName, Arc<Subscriber>>,
}

enum StreamState {
    Disconnected,
    Connected(Connection),
}

/// A durable stream on a broker.
///
/// The stream owns the single broker connection shared by every publisher and
/// subscriber it hands out. Instances are cached by name: asking twice for the
/// same name returns the same `Arc`, also under concurrent calls.
///
/// # Example
///
/// ```rust,ignore
/// let stream = Stream::new(config, broker)?;
/// stream.connect().await?;
///
/// let publisher = stream.publisher("orders").await?;
/// let errors = publisher.publish(&ctx, events).await;
/// ```
pub struct Stream {
    name: StreamName,
    config: StreamConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<StreamState>,
}

impl Stream {
    /// Validates `config` and returns a disconnected stream.
    pub fn new<C>(config: StreamConfig, connector: C) -> StreamResult<Self>
    where
        C: Connector + 'static,
    {
        config.validate()?;
        let name = config.stream_name()?;

        Ok(Self {
            name,
            config,
            connector: Arc::new(connector),
            state: Mutex::new(StreamState::Disconnected),
        })
    }

    /// Name of the stream.
    pub const fn name(&self) -> &StreamName {
        &self.name
    }

    /// Configuration the stream was built with.
    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Returns the publisher registered under `name`, creating it on first use.
    pub async fn publisher(&self, name: &str) -> StreamResult<Arc<Publisher>> {
        let name = parse_instance_name(name)?;
        let mut state = self.state.lock().await;
        let StreamState::Connected(connection) = &mut *state else {
            return Err(StreamError::NotConnected);
        };

        let transport = &connection.transport;
        let publisher = connection
            .publishers
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(stream = %self.name, publisher = %name, "[stream.publisher] created");
                Arc::new(Publisher::new(
                    name,
                    self.config.publisher,
                    Arc::clone(transport),
                ))
            });
        Ok(Arc::clone(publisher))
    }

    /// Returns the subscriber registered under `name`, creating it on first use.
    ///
    /// New subscribers start disconnected.
    pub async fn subscriber(&self, name: &str) -> StreamResult<Arc<Subscriber>> {
        let name = parse_instance_name(name)?;
        let mut state = self.state.lock().await;
        let StreamState::Connected(connection) = &mut *state else {
            return Err(StreamError::NotConnected);
        };

        let transport = &connection.transport;
        let subscriber = connection
            .subscribers
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(stream = %self.name, subscriber = %name, "[stream.subscriber] created");
                Arc::new(Subscriber::new(
                    name,
                    self.name.clone(),
                    self.config.namespace.clone(),
                    self.config.subscriber,
                    Arc::clone(transport),
                ))
            });
        Ok(Arc::clone(subscriber))
    }
}

fn parse_instance_name(name: &str) -> StreamResult<InstanceName> {
    InstanceName::try_new(name)
        .map_err(|error| StreamError::InvalidName(format!("'{name}': {error}")))
}

#[async_trait]
impl Lifecycle for Stream {
    #[instrument(name = "stream.connect", skip(self), fields(stream = %self.name))]
    async fn connect(&self) -> StreamResult<()> {
        let mut state = self.state.lock().await;
        if matches!(*state, StreamState::Connected(_)) {
            return Err(StreamError::AlreadyConnected);
        }

        let transport = self.connector.connect(&self.config).await.map_err(|error| {
            error!(
                stream = %self.name,
                uri = %self.config.uri,
                error = %error,
                "[stream.connect] connection failed"
            );
            StreamError::Transport(error)
        })?;

        let definition = StreamDefinition::from_config(self.name.clone(), &self.config);
        if let Err(error) = transport.create_or_update_stream(&definition).await {
            error!(
                stream = %self.name,
                error = %error,
                "[stream.connect] stream definition rejected"
            );
            if let Err(close_error) = transport.close().await {
                warn!(
                    stream = %self.name,
                    error = %close_error,
                    "[stream.connect] closing rejected connection failed"
                );
            }
            return Err(StreamError::Transport(error));
        }

        *state = StreamState::Connected(Connection {
            transport,
            publishers: HashMap::new(),
            subscribers: HashMap::new(),
        });

        info!(
            stream = %self.name,
            subjects = ?definition.subjects,
            replicas = definition.replicas,
            "[stream.connect] connected"
        );
        Ok(())
    }

    #[instrument(name = "stream.disconnect", skip(self), fields(stream = %self.name))]
    async fn disconnect(&self) -> StreamResult<()> {
        let connection = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, StreamState::Disconnected) {
                StreamState::Disconnected => return Err(StreamError::NotConnected),
                StreamState::Connected(connection) => connection,
            }
        };

        for (name, subscriber) in &connection.subscribers {
            match subscriber.disconnect().await {
                Ok(()) | Err(StreamError::NotConnected) => {}
                Err(error) => {
                    warn!(
                        stream = %self.name,
                        subscriber = %name,
                        error = %error,
                        "[stream.disconnect] subscriber did not disconnect cleanly"
                    );
                }
            }
        }

        let Connection {
            transport,
            publishers,
            subscribers,
        } = connection;
        drop(publishers);
        drop(subscribers);

        transport.close().await?;

        info!(stream = %self.name, "[stream.disconnect] disconnected");
        Ok(())
    }

    async fn readiness(&self) -> StreamResult<()> {
        let transport = match &*self.state.lock().await {
            StreamState::Disconnected => return Ok(()),
            StreamState::Connected(connection) => Arc::clone(&connection.transport),
        };
        transport.stream_info(&self.name).await?;
        Ok(())
    }

    async fn liveness(&self) -> StreamResult<()> {
        let transport = match &*self.state.lock().await {
            StreamState::Disconnected => return Ok(()),
            StreamState::Connected(connection) => Arc::clone(&connection.transport),
        };
        transport.stream_info(&self.name).await?;
        Ok(())
    }

    async fn state(&self) -> ConnectionState {
        match *self.state.lock().await {
            StreamState::Disconnected => ConnectionState::Disconnected,
            StreamState::Connected(_) => ConnectionState::Connected,
        }
    }
}
