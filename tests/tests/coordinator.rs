//! Coordinator lifecycle: startup latch, routing, flush cadence, shutdown.

use std::sync::Arc;
use std::time::Duration;

use integration_tests::fixtures::{offsets, opened_persistence, record};
use integration_tests::mocks::MockBrokerConsumer;
use persistence::{MemoryPersistence, PersistenceManager};
use spout::{SpoutConfig, SpoutCoordinator, VirtualSpout};
use spout_core::{FilterChain, MessageId, StreamMessage, TopicPartition, Utf8Deserializer};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn fast_config() -> SpoutConfig {
    SpoutConfig {
        consumer_id_prefix: "test".to_string(),
        monitor_interval_ms: 20,
        flush_interval_ms: 60_000,
        max_stop_wait_ms: 2_000,
        output_queue_size: 64,
        idle_wait_ms: 2,
        tuple_wait_ms: 50,
    }
}

fn make_spout(
    consumer_id: &str,
    consumer: MockBrokerConsumer,
    persistence: Arc<MemoryPersistence>,
) -> VirtualSpout {
    VirtualSpout::new(
        consumer_id,
        Box::new(consumer),
        Arc::new(Utf8Deserializer),
        Arc::new(FilterChain::new()),
        persistence,
        None,
    )
}

async fn recv(rx: &mut mpsc::Receiver<StreamMessage>) -> StreamMessage {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("output queue closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within deadline");
}

#[tokio::test]
async fn test_open_starts_firehose_and_routes_acks() {
    let tp = TopicPartition::new("events", 0);
    let consumer = MockBrokerConsumer::new()
        .with_partition(tp.clone(), 0)
        .with_record(record("events", 0, 1, "k1", "v1"))
        .with_record(record("events", 0, 2, "k2", "v2"));
    let state = consumer.state();

    let persistence = opened_persistence().await;
    let coordinator = SpoutCoordinator::new(
        make_spout("test-firehose", consumer, persistence),
        fast_config(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    // The startup latch released only after the firehose opened.
    assert_eq!(state.connect_count(), 1);
    assert_eq!(coordinator.running_count(), 1);

    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.id.consumer_id(), "test-firehose");
    assert_eq!(first.id.offset(), 1);
    assert_eq!(second.id.offset(), 2);

    coordinator.ack(first.id.clone());
    wait_until(|| state.commits().contains(&(tp.clone(), 1))).await;

    coordinator.close().await;
    assert_eq!(coordinator.running_count(), 0);
    assert!(state.is_closed());
}

#[tokio::test]
async fn test_ack_for_unknown_consumer_is_dropped() {
    let persistence = opened_persistence().await;
    let coordinator = SpoutCoordinator::new(
        make_spout("test-firehose", MockBrokerConsumer::new(), persistence),
        fast_config(),
    );

    // Nothing is running yet; the ack has no mailbox and is dropped.
    coordinator.ack(MessageId::new("events", 0, 1, "nobody"));
    coordinator.fail(MessageId::new("events", 0, 1, "nobody"));
}

#[tokio::test]
async fn test_fail_routes_to_originating_spout() {
    let tp = TopicPartition::new("events", 0);
    let consumer = MockBrokerConsumer::new()
        .with_partition(tp.clone(), 0)
        .with_record(record("events", 0, 5, "k", "v"));
    let state = consumer.state();

    let persistence = opened_persistence().await;
    let coordinator = SpoutCoordinator::new(
        make_spout("test-firehose", consumer, persistence),
        fast_config(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    let message = recv(&mut rx).await;
    coordinator.fail(message.id);
    wait_until(|| state.seeks().contains(&(tp.clone(), 5))).await;
    assert!(state.commits().is_empty());

    coordinator.close().await;
}

#[tokio::test]
async fn test_dynamic_spout_addition() {
    let persistence = opened_persistence().await;
    let coordinator = SpoutCoordinator::new(
        make_spout(
            "test-firehose",
            MockBrokerConsumer::new(),
            persistence.clone(),
        ),
        fast_config(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("events", 1), 0)
        .with_record(record("events", 1, 9, "k", "v"));
    coordinator.add_sideline_spout(make_spout("test-sideline-x", consumer, persistence));

    // The next monitor sweep picks it up.
    let message = recv(&mut rx).await;
    assert_eq!(message.id.consumer_id(), "test-sideline-x");
    assert_eq!(coordinator.running_count(), 2);

    coordinator.close().await;
    assert_eq!(coordinator.running_count(), 0);
}

#[tokio::test]
async fn test_flush_cadence_persists_state() {
    let consumer = MockBrokerConsumer::new().with_partition(TopicPartition::new("events", 0), 7);

    let persistence = opened_persistence().await;
    let config = SpoutConfig {
        flush_interval_ms: 30,
        ..fast_config()
    };
    let coordinator = SpoutCoordinator::new(
        make_spout("test-firehose", consumer, persistence.clone()),
        config,
    );

    let (tx, _rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stored = persistence
        .retrieve_consumer_state("test-firehose")
        .await
        .unwrap();
    assert_eq!(stored, Some(offsets(&[("events", 0, 7)])));

    coordinator.close().await;
}

#[tokio::test]
async fn test_worker_survives_transient_poll_errors() {
    let consumer = MockBrokerConsumer::new()
        .with_partition(TopicPartition::new("events", 0), 0)
        .with_record(record("events", 0, 3, "k", "v"));
    let state = consumer.state();
    state.fail_next_polls(3);

    let persistence = opened_persistence().await;
    let coordinator = SpoutCoordinator::new(
        make_spout("test-firehose", consumer, persistence),
        fast_config(),
    );

    let (tx, mut rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    // The record still arrives once the injected failures pass.
    let message = recv(&mut rx).await;
    assert_eq!(message.id.offset(), 3);

    coordinator.close().await;
}

#[tokio::test]
async fn test_bounded_spout_terminates_on_its_own() {
    let tp = TopicPartition::new("events", 0);
    let consumer = MockBrokerConsumer::new()
        .with_partition(tp.clone(), 10)
        .with_record(record("events", 0, 10, "k", "v"));
    let state = consumer.state();

    let persistence = opened_persistence().await;
    let spout = VirtualSpout::new(
        "test-bounded",
        Box::new(consumer),
        Arc::new(Utf8Deserializer),
        Arc::new(FilterChain::new()),
        persistence,
        Some(offsets(&[("events", 0, 10)])),
    );

    let coordinator = SpoutCoordinator::new(spout, fast_config());
    let (tx, _rx) = mpsc::channel(64);
    coordinator.open(tx).await.unwrap();

    // The bound excludes the only record; the spout drains and stops
    // without an external close.
    wait_until(|| coordinator.running_count() == 0).await;
    assert!(!state.unsubscribes().is_empty());
    coordinator.close().await;
}
