//! Stream lifecycle and instance registry.

mod common;

use common::{connected_stream, connected_stream_with, eventually, Recorder, STREAM, TOPIC};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use streamcore::{
    CancellationToken, ConfigError, ConnectionState, Lifecycle, Namespace, Stream, StreamConfig,
    StreamError, TransportError,
};
use streamcore_memory::InMemoryBroker;

#[tokio::test]
async fn connect_declares_the_stream_on_the_broker() {
    let broker = InMemoryBroker::new();
    let config = common::config()
        .with_namespace(Namespace::new("shop", "eu", "prod"))
        .with_replicas(3);

    let stream = connected_stream_with(&broker, config).await;

    assert_eq!(stream.state().await, ConnectionState::Connected);
    assert_eq!(broker.open_connections(), 1);
    let definition = broker.stream_definition(STREAM).unwrap();
    assert_eq!(definition.subjects, vec!["shop.eu.prod.>".to_string()]);
    assert_eq!(definition.replicas, 3);
}

#[tokio::test]
async fn invalid_configuration_is_rejected_before_connecting() {
    let broker = InMemoryBroker::new();

    let result = Stream::new(StreamConfig::new("", "memory://local"), broker.clone());

    assert!(matches!(
        result,
        Err(StreamError::Config(ConfigError::InvalidName(_)))
    ));
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn configuration_can_be_loaded_from_json() {
    let broker = InMemoryBroker::new();
    let config = StreamConfig::from_json(
        r#"{
            "name": "orders",
            "uri": "memory://local",
            "namespace": { "name": "shop", "region": "eu", "tier": "prod" },
            "subscriber": { "timeout_ms": 250, "max_retry": 1, "concurrency": 5 }
        }"#,
    )
    .unwrap();

    let stream = connected_stream_with(&broker, config).await;
    let subscriber = stream.subscriber("billing").await.unwrap();
    subscriber.connect().await.unwrap();
    subscriber
        .subscribe(&CancellationToken::new(), TOPIC, Recorder::new())
        .await
        .unwrap();

    let consumer = broker.consumer_config(STREAM, "billing").unwrap();
    assert_eq!(consumer.filter_subject, "shop.eu.prod.orders.>");
    assert_eq!(consumer.max_deliver, 2);
    assert_eq!(consumer.ack_wait, Duration::from_millis(250));
    assert_eq!(consumer.max_request_batch, 5);

    stream.disconnect().await.unwrap();
}

#[tokio::test]
async fn connection_failure_leaves_the_stream_disconnected() {
    let broker = InMemoryBroker::new();
    let stream = Stream::new(common::config(), broker.clone()).unwrap();
    broker.fail_next_connects(1);

    let error = stream.connect().await.unwrap_err();

    assert!(matches!(
        error,
        StreamError::Transport(TransportError::Connection(_))
    ));
    assert_eq!(stream.state().await, ConnectionState::Disconnected);
    assert!(stream.connect().await.is_ok());
}

#[tokio::test]
async fn lifecycle_misuse_is_reported() {
    let broker = InMemoryBroker::new();
    let stream = Stream::new(common::config(), broker.clone()).unwrap();

    assert!(matches!(
        stream.disconnect().await,
        Err(StreamError::NotConnected)
    ));
    assert!(matches!(
        stream.publisher("checkout").await,
        Err(StreamError::NotConnected)
    ));
    stream.connect().await.unwrap();
    assert!(matches!(
        stream.connect().await,
        Err(StreamError::AlreadyConnected)
    ));
    assert_eq!(broker.open_connections(), 1);
}

#[tokio::test]
async fn invalid_instance_names_are_rejected() {
    let broker = InMemoryBroker::new();
    let stream = connected_stream(&broker).await;

    for name in ["", "   ", "has space", "dotted.name", "wild*"] {
        assert!(
            matches!(
                stream.publisher(name).await,
                Err(StreamError::InvalidName(_))
            ),
            "publisher name {name:?} was accepted"
        );
        assert!(
            matches!(
                stream.subscriber(name).await,
                Err(StreamError::InvalidName(_))
            ),
            "subscriber name {name:?} was accepted"
        );
    }
}

#[tokio::test]
async fn concurrent_lookups_share_one_instance() {
    let broker = InMemoryBroker::new();
    let stream = Arc::new(connected_stream(&broker).await);

    let publishers = join_all((0..16).map(|_| {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.publisher("checkout").await.unwrap() })
    }))
    .await;
    let subscribers = join_all((0..16).map(|_| {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.subscriber("billing").await.unwrap() })
    }))
    .await;

    let first = publishers[0].as_ref().unwrap();
    assert!(publishers
        .iter()
        .all(|publisher| Arc::ptr_eq(first, publisher.as_ref().unwrap())));
    let first = subscribers[0].as_ref().unwrap();
    assert!(subscribers
        .iter()
        .all(|subscriber| Arc::ptr_eq(first, subscriber.as_ref().unwrap())));
}

#[tokio::test]
async fn disconnect_stops_subscribers_and_closes_the_connection() {
    let broker = InMemoryBroker::new();
    let stream = connected_stream(&broker).await;
    let subscriber = stream.subscriber("billing").await.unwrap();
    subscriber.connect().await.unwrap();
    subscriber
        .subscribe(&CancellationToken::new(), TOPIC, Recorder::new())
        .await
        .unwrap();
    let idle = stream.subscriber("audit").await.unwrap();

    stream.disconnect().await.unwrap();

    assert_eq!(stream.state().await, ConnectionState::Disconnected);
    assert_eq!(subscriber.state().await, ConnectionState::Disconnected);
    assert_eq!(subscriber.active_loops().await, 0);
    assert_eq!(idle.state().await, ConnectionState::Disconnected);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn reconnecting_starts_with_empty_caches() {
    let broker = InMemoryBroker::new();
    let stream = connected_stream(&broker).await;
    let before = stream.publisher("checkout").await.unwrap();

    stream.disconnect().await.unwrap();
    stream.connect().await.unwrap();
    let after = stream.publisher("checkout").await.unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(broker.open_connections(), 1);
}

#[tokio::test]
async fn probes_succeed_while_disconnected_and_reach_the_broker_when_connected() {
    let broker = InMemoryBroker::new();
    let stream = Stream::new(common::config(), broker.clone()).unwrap();

    assert!(stream.readiness().await.is_ok());
    assert!(stream.liveness().await.is_ok());

    stream.connect().await.unwrap();
    assert!(stream.readiness().await.is_ok());
    assert!(stream.liveness().await.is_ok());

    broker.fail_next_stream_info(2);
    assert!(matches!(
        stream.readiness().await,
        Err(StreamError::Transport(_))
    ));
    assert!(matches!(
        stream.liveness().await,
        Err(StreamError::Transport(_))
    ));
    assert!(stream.readiness().await.is_ok());
}

#[tokio::test]
async fn streams_share_a_broker_without_sharing_state() {
    let broker = InMemoryBroker::new();
    let orders = connected_stream(&broker).await;
    let payments = connected_stream_with(
        &broker,
        StreamConfig::new("payments", "memory://local")
            .with_namespace(Namespace::new("pay", "eu", "prod")),
    )
    .await;

    let publisher = payments.publisher("gateway").await.unwrap();
    let event = streamcore::Event::new("pay.eu.prod.payments.captured", b"42".to_vec());
    let errors = publisher
        .publish(
            &CancellationToken::new(),
            [("p".to_string(), event)].into_iter().collect(),
        )
        .await;

    assert!(errors.is_empty());
    assert!(eventually(Duration::from_secs(1), || broker.messages("payments").len() == 1).await);
    assert!(broker.messages(STREAM).is_empty());
    assert_eq!(broker.open_connections(), 2);

    orders.disconnect().await.unwrap();
    payments.disconnect().await.unwrap();
}
