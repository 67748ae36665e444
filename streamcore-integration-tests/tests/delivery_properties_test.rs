//! Property: whatever a publisher sends, a subscriber receives unchanged.

mod common;

use common::{connected_stream, eventually, Recorder, STREAM, TOPIC};
use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use streamcore::{CancellationToken, Event, Lifecycle};
use streamcore_memory::InMemoryBroker;

fn arb_event() -> impl Strategy<Value = Event> {
    (
        "[a-z0-9_]{1,8}",
        "[A-Za-z0-9-]{1,24}",
        prop::collection::vec(any::<u8>(), 1..64),
        prop::collection::hash_map("[a-z]{1,8}", "[ -~]{0,16}", 0..4),
    )
        .prop_map(|(key, id, data, metadata)| Event {
            subject: format!("streamcore.local.default.orders.{key}"),
            id,
            data,
            metadata,
        })
}

fn arb_batch() -> impl Strategy<Value = HashMap<String, Event>> {
    prop::collection::vec(arb_event(), 1..6).prop_map(|events| {
        events
            .into_iter()
            .map(|event| (event.id.clone(), event))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn subscribers_receive_published_events_unchanged(events in arb_batch()) {
        let received = tokio_test::block_on(async {
            let broker = InMemoryBroker::new();
            let stream = connected_stream(&broker).await;
            let publisher = stream.publisher("checkout").await.unwrap();
            let errors = publisher.publish(&CancellationToken::new(), events.clone()).await;
            assert!(errors.is_empty());

            let subscriber = stream.subscriber("billing").await.unwrap();
            subscriber.connect().await.unwrap();
            let recorder = Recorder::new();
            subscriber
                .subscribe(&CancellationToken::new(), TOPIC, recorder.clone())
                .await
                .unwrap();

            let expected = events.len();
            assert!(
                eventually(Duration::from_secs(5), || {
                    broker.acked(STREAM, "billing").len() == expected
                })
                .await
            );
            stream.disconnect().await.unwrap();

            recorder
                .events()
                .into_iter()
                .map(|event| (event.id.clone(), event))
                .collect::<HashMap<_, _>>()
        });

        prop_assert_eq!(received, events);
    }
}
