//! Virtual spout behavior against a scripted broker consumer.

use std::sync::Arc;

use integration_tests::fixtures::{my_record, offsets, opened_persistence, record};
use integration_tests::mocks::{ConstStep, MockBrokerConsumer, MockConsumerState, NullDeserializer};
use persistence::{MemoryPersistence, PersistenceManager};
use spout::VirtualSpout;
use spout_core::{
    Deserializer, Error, FilterChain, MessageId, OffsetMap, SidelineRequestId, TopicPartition,
    Utf8Deserializer,
};

async fn open_spout(
    consumer: MockBrokerConsumer,
    deserializer: Arc<dyn Deserializer>,
    chain: FilterChain,
    ending: Option<OffsetMap>,
) -> (VirtualSpout, MockConsumerState, Arc<MemoryPersistence>) {
    let state = consumer.state();
    let persistence = opened_persistence().await;
    let mut spout = VirtualSpout::new(
        "MyConsumerId",
        Box::new(consumer),
        deserializer,
        Arc::new(chain),
        persistence.clone(),
        ending,
    );
    spout.open().await.expect("open spout");
    (spout, state, persistence)
}

#[tokio::test]
async fn test_consumer_returns_none() {
    let consumer =
        MockBrokerConsumer::new().with_partition(TopicPartition::new("MyTopic", 3), 0);
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    assert!(spout.next_message().await.unwrap().is_none());
    assert!(state.commits().is_empty());
    assert_eq!(state.connect_count(), 1);
}

#[tokio::test]
async fn test_deserializer_returns_none() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(NullDeserializer), FilterChain::new(), None).await;

    assert!(spout.next_message().await.unwrap().is_none());
    // The poison record is dropped without a commit.
    assert!(state.commits().is_empty());
}

#[tokio::test]
async fn test_filter_drop() {
    let chain = FilterChain::new();
    chain.add_step(SidelineRequestId::new("drop-all"), Arc::new(ConstStep(true)));

    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), chain, None).await;

    assert!(spout.next_message().await.unwrap().is_none());
    assert!(state.commits().is_empty());
}

#[tokio::test]
async fn test_happy_path() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, _, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    let message = spout.next_message().await.unwrap().expect("a message");
    assert_eq!(message.id.topic(), "MyTopic");
    assert_eq!(message.id.partition(), 3);
    assert_eq!(message.id.offset(), 434323);
    assert_eq!(message.id.consumer_id(), "MyConsumerId");
    assert_eq!(
        message.values,
        vec![serde_json::json!("MyKey"), serde_json::json!("MyValue")]
    );
    assert_eq!(spout.in_flight_count(), 1);
}

#[tokio::test]
async fn test_ending_bound() {
    let tp = TopicPartition::new("MyTopic", 4);
    let consumer = MockBrokerConsumer::new()
        .with_partition(tp.clone(), 4344)
        .with_record(record("MyTopic", 4, 4344, "k", "v"))
        .with_record(record("MyTopic", 4, 4444, "k", "v"))
        .with_record(record("MyTopic", 4, 4544, "k", "v"));
    let ending = offsets(&[("MyTopic", 4, 4444)]);
    let (mut spout, state, _) = open_spout(
        consumer,
        Arc::new(Utf8Deserializer),
        FilterChain::new(),
        Some(ending),
    )
    .await;

    // The ending offset itself is not delivered: only 4344 comes out.
    let first = spout.next_message().await.unwrap().expect("first message");
    assert_eq!(first.id.offset(), 4344);

    assert!(spout.next_message().await.unwrap().is_none());
    assert!(spout.next_message().await.unwrap().is_none());

    assert!(!state.unsubscribes().is_empty());
    assert!(state.unsubscribes().iter().all(|u| *u == tp));

    // Every bounded partition is drained, so the spout asks to stop.
    assert!(spout.is_finished());
}

#[tokio::test]
async fn test_ending_bound_missing_partition_is_illegal_state() {
    // Bounds are configured but do not cover partition 3.
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let ending = offsets(&[("MyTopic", 4, 4444)]);
    let (mut spout, _, _) = open_spout(
        consumer,
        Arc::new(Utf8Deserializer),
        FilterChain::new(),
        Some(ending),
    )
    .await;

    assert!(matches!(
        spout.next_message().await,
        Err(Error::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_no_bounds_never_unsubscribes() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    assert!(spout.next_message().await.unwrap().is_some());
    assert!(state.unsubscribes().is_empty());
    assert!(!spout.is_finished());
}

#[tokio::test]
async fn test_ack_commits_exactly_once() {
    let consumer = MockBrokerConsumer::new();
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    let id = MessageId::new("MyTopic", 33, 313376, "RandomConsumer");
    spout.ack(Some(id)).await.unwrap();

    assert_eq!(
        state.commits(),
        vec![(TopicPartition::new("MyTopic", 33), 313376)]
    );
}

#[tokio::test]
async fn test_ack_none_commits_nothing() {
    let consumer = MockBrokerConsumer::new();
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    spout.ack(None).await.unwrap();
    assert!(state.commits().is_empty());
}

#[tokio::test]
async fn test_fail_rewinds_without_commit() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    let message = spout.next_message().await.unwrap().expect("a message");
    assert_eq!(spout.in_flight_count(), 1);

    spout.fail(Some(message.id)).await.unwrap();
    assert_eq!(spout.in_flight_count(), 0);
    assert_eq!(
        state.seeks(),
        vec![(TopicPartition::new("MyTopic", 3), 434323)]
    );
    assert!(state.commits().is_empty());
}

#[tokio::test]
async fn test_flush_state_persists_current_offsets() {
    let consumer = MockBrokerConsumer::new().with_partition(TopicPartition::new("events", 0), 5);
    let (mut spout, _, persistence) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    spout.flush_state().await.unwrap();

    let stored = persistence
        .retrieve_consumer_state("MyConsumerId")
        .await
        .unwrap();
    assert_eq!(stored, Some(offsets(&[("events", 0, 5)])));
}

#[tokio::test]
async fn test_ack_after_emit_advances_committed_state() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("MyTopic", 3), 0)
        .with_record(my_record());
    let (mut spout, state, _) =
        open_spout(consumer, Arc::new(Utf8Deserializer), FilterChain::new(), None).await;

    let handle = spout.state_handle();
    let message = spout.next_message().await.unwrap().expect("a message");
    spout.ack(Some(message.id)).await.unwrap();

    assert_eq!(
        state.commits(),
        vec![(TopicPartition::new("MyTopic", 3), 434323)]
    );
    // The shared mirror reflects the commit.
    assert_eq!(
        handle.get().get(&TopicPartition::new("MyTopic", 3)),
        Some(434323)
    );
}

#[tokio::test]
async fn test_drained_bounded_spout_clears_state_on_close() {
    let tp = TopicPartition::new("MyTopic", 4);
    let consumer = MockBrokerConsumer::new()
        .with_partition(tp.clone(), 4444)
        .with_record(record("MyTopic", 4, 4444, "k", "v"));
    let ending = offsets(&[("MyTopic", 4, 4444)]);
    let (mut spout, _, persistence) = open_spout(
        consumer,
        Arc::new(Utf8Deserializer),
        FilterChain::new(),
        Some(ending),
    )
    .await;

    persistence
        .persist_consumer_state("MyConsumerId", &offsets(&[("MyTopic", 4, 4444)]))
        .await
        .unwrap();

    assert!(spout.next_message().await.unwrap().is_none());
    assert!(spout.is_finished());

    spout.close().await.unwrap();
    assert_eq!(
        persistence
            .retrieve_consumer_state("MyConsumerId")
            .await
            .unwrap(),
        None
    );
}
