//! Mock implementations for testing.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use broker::{BrokerConsumer, BrokerConsumerFactory};
use parking_lot::Mutex;
use spout_core::{Deserializer, Error, OffsetMap, RawRecord, Result, TopicPartition};

#[derive(Default)]
struct MockConsumerInner {
    records: VecDeque<RawRecord>,
    /// Assigned partitions and their committed offsets
    assigned: BTreeMap<TopicPartition, i64>,
    commits: Vec<(TopicPartition, i64)>,
    seeks: Vec<(TopicPartition, i64)>,
    unsubscribes: Vec<TopicPartition>,
    connects: usize,
    /// Remaining polls that fail with a broker error
    poll_errors: u32,
    closed: bool,
}

/// Shared view into a mock consumer, for assertions after the consumer has
/// moved onto a spout worker.
#[derive(Clone, Default)]
pub struct MockConsumerState {
    inner: Arc<Mutex<MockConsumerInner>>,
}

impl MockConsumerState {
    pub fn push_record(&self, record: RawRecord) {
        self.inner.lock().records.push_back(record);
    }

    pub fn commits(&self) -> Vec<(TopicPartition, i64)> {
        self.inner.lock().commits.clone()
    }

    pub fn seeks(&self) -> Vec<(TopicPartition, i64)> {
        self.inner.lock().seeks.clone()
    }

    pub fn unsubscribes(&self) -> Vec<TopicPartition> {
        self.inner.lock().unsubscribes.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn fail_next_polls(&self, n: u32) {
        self.inner.lock().poll_errors = n;
    }
}

/// Broker consumer stub that replays scripted records and captures every
/// contract call.
///
/// This implements the same `BrokerConsumer` trait as the real Kafka
/// consumer, allowing tests to verify the exact commits, seeks, and
/// unsubscribes a spout issues without a broker.
#[derive(Default)]
pub struct MockBrokerConsumer {
    state: MockConsumerState,
}

impl MockBrokerConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a partition with its initial committed offset.
    pub fn with_partition(self, tp: TopicPartition, offset: i64) -> Self {
        self.state.inner.lock().assigned.insert(tp, offset);
        self
    }

    /// Queues a record for delivery.
    pub fn with_record(self, record: RawRecord) -> Self {
        self.state.push_record(record);
        self
    }

    /// The shared assertion handle; grab it before boxing the consumer.
    pub fn state(&self) -> MockConsumerState {
        self.state.clone()
    }
}

#[async_trait]
impl BrokerConsumer for MockBrokerConsumer {
    async fn connect(&mut self) -> Result<()> {
        self.state.inner.lock().connects += 1;
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        let mut inner = self.state.inner.lock();
        if inner.poll_errors > 0 {
            inner.poll_errors -= 1;
            return Err(Error::broker("injected poll failure"));
        }
        // Records of unsubscribed partitions are no longer delivered.
        while let Some(record) = inner.records.pop_front() {
            if inner.assigned.contains_key(&record.topic_partition()) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut inner = self.state.inner.lock();
        inner.commits.push((tp.clone(), offset));
        if let Some(committed) = inner.assigned.get_mut(tp) {
            *committed = offset;
        }
        Ok(())
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.state.inner.lock().seeks.push((tp.clone(), offset));
        Ok(())
    }

    async fn unsubscribe_topic_partition(&mut self, tp: &TopicPartition) -> Result<bool> {
        let mut inner = self.state.inner.lock();
        inner.unsubscribes.push(tp.clone());
        Ok(inner.assigned.remove(tp).is_some())
    }

    fn current_state(&self) -> OffsetMap {
        let inner = self.state.inner.lock();
        let mut builder = OffsetMap::builder();
        for (tp, offset) in &inner.assigned {
            builder = builder.with_partition(tp.clone(), *offset);
        }
        builder.build()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.inner.lock().closed = true;
        Ok(())
    }
}

/// Factory handing out consumers prepared per consumer id; also captures
/// the starting offsets each spout was created with.
#[derive(Default)]
pub struct MockConsumerFactory {
    prepared: Mutex<BTreeMap<String, MockBrokerConsumer>>,
    requests: Mutex<Vec<(String, Option<OffsetMap>)>>,
}

impl MockConsumerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&self, consumer_id: impl Into<String>, consumer: MockBrokerConsumer) {
        self.prepared.lock().insert(consumer_id.into(), consumer);
    }

    pub fn creation_requests(&self) -> Vec<(String, Option<OffsetMap>)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl BrokerConsumerFactory for MockConsumerFactory {
    async fn create(
        &self,
        consumer_id: &str,
        starting_offsets: Option<OffsetMap>,
    ) -> Result<Box<dyn BrokerConsumer>> {
        self.requests
            .lock()
            .push((consumer_id.to_string(), starting_offsets));
        let consumer = self
            .prepared
            .lock()
            .remove(consumer_id)
            .unwrap_or_default();
        Ok(Box::new(consumer))
    }
}

/// Deserializer that rejects every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDeserializer;

impl Deserializer for NullDeserializer {
    fn deserialize(&self, _record: &RawRecord) -> Option<Vec<serde_json::Value>> {
        None
    }
}

/// Filter step with a fixed verdict.
#[derive(Debug)]
pub struct ConstStep(pub bool);

impl spout_core::FilterStep for ConstStep {
    fn evaluate(&self, _record: &RawRecord) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_consumer_replays_and_captures() {
        let tp = TopicPartition::new("events", 0);
        let mut consumer = MockBrokerConsumer::new()
            .with_partition(tp.clone(), 0)
            .with_record(RawRecord {
                topic: "events".into(),
                partition: 0,
                offset: 7,
                key: None,
                value: b"v".to_vec(),
            });
        let state = consumer.state();

        consumer.connect().await.unwrap();
        assert_eq!(state.connect_count(), 1);

        let record = consumer.next_record().await.unwrap().unwrap();
        assert_eq!(record.offset, 7);
        assert!(consumer.next_record().await.unwrap().is_none());

        consumer.commit_offset(&tp, 7).await.unwrap();
        assert_eq!(state.commits(), vec![(tp.clone(), 7)]);
        assert_eq!(consumer.current_state().get(&tp), Some(7));
    }

    #[tokio::test]
    async fn test_mock_consumer_drops_unsubscribed_records() {
        let tp = TopicPartition::new("events", 0);
        let mut consumer = MockBrokerConsumer::new()
            .with_partition(tp.clone(), 0)
            .with_record(RawRecord {
                topic: "events".into(),
                partition: 0,
                offset: 1,
                key: None,
                value: b"v".to_vec(),
            });

        assert!(consumer.unsubscribe_topic_partition(&tp).await.unwrap());
        assert!(!consumer.unsubscribe_topic_partition(&tp).await.unwrap());
        assert!(consumer.next_record().await.unwrap().is_none());
        assert!(consumer.current_state().is_empty());
    }
}
