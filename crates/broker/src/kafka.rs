//! rskafka-backed broker consumer.
//!
//! One partition client per assigned partition, per-partition fetch buffers
//! drained round-robin, manual offset management for at-least-once delivery.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rskafka::client::{
    partition::{OffsetAt, PartitionClient, UnknownTopicHandling},
    ClientBuilder, Credentials, SaslConfig,
};
use rskafka::record::RecordAndOffset;
use spout_core::{Error, OffsetMap, RawRecord, Result, TopicPartition};
use telemetry::metrics;
use tracing::{debug, info, warn};

use crate::config::{KafkaConfig, StartingPosition};
use crate::consumer::{BrokerConsumer, BrokerConsumerFactory};

/// Creates a TLS configuration for hosted clusters.
fn create_tls_config() -> Arc<rustls::ClientConfig> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}

/// Fetch state for one assigned partition.
struct PartitionState {
    client: Arc<PartitionClient>,
    /// Next offset to fetch from the broker
    next_fetch: i64,
    buffer: VecDeque<RecordAndOffset>,
}

/// Kafka consumer over rskafka partition clients.
pub struct KafkaConsumer {
    config: KafkaConfig,
    consumer_id: String,
    starting_offsets: Option<OffsetMap>,
    partitions: BTreeMap<TopicPartition, PartitionState>,
    /// Committed positions, including the initial positions resolved at
    /// connect time.
    committed: BTreeMap<TopicPartition, i64>,
    /// Round-robin order for draining partitions
    poll_order: VecDeque<TopicPartition>,
    connected: bool,
}

impl KafkaConsumer {
    pub fn new(
        config: KafkaConfig,
        consumer_id: impl Into<String>,
        starting_offsets: Option<OffsetMap>,
    ) -> Self {
        Self {
            config,
            consumer_id: consumer_id.into(),
            starting_offsets,
            partitions: BTreeMap::new(),
            committed: BTreeMap::new(),
            poll_order: VecDeque::new(),
            connected: false,
        }
    }

    /// Fetches into the partition buffer, retrying transient failures with
    /// backoff before surfacing a broker error.
    async fn fill_buffer(&mut self, tp: &TopicPartition) -> Result<()> {
        let retries = self.config.fetch_retries;
        let backoff = Duration::from_millis(self.config.fetch_retry_backoff_ms);
        let max_bytes = self.config.fetch_max_bytes;
        let max_wait_ms = self.config.fetch_max_wait_ms;

        let state = self
            .partitions
            .get_mut(tp)
            .ok_or_else(|| Error::broker(format!("partition not assigned: {tp}")))?;

        let mut last_error = None;

        for attempt in 0..=retries {
            if attempt > 0 {
                metrics().broker_errors.inc();
                warn!(
                    consumer_id = %self.consumer_id,
                    topic_partition = %tp,
                    attempt = attempt,
                    "Retrying fetch"
                );
                tokio::time::sleep(backoff * attempt).await;
            }

            match state
                .client
                .fetch_records(state.next_fetch, 1..max_bytes, max_wait_ms)
                .await
            {
                Ok((records, _high_watermark)) => {
                    if let Some(last) = records.last() {
                        state.next_fetch = last.offset + 1;
                    }
                    state.buffer.extend(records);
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        metrics().broker_errors.inc();
        Err(Error::broker(format!(
            "fetch failed for {tp}: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn to_raw_record(&self, tp: &TopicPartition, record: RecordAndOffset) -> RawRecord {
        RawRecord {
            topic: tp.topic().to_string(),
            partition: tp.partition(),
            offset: record.offset,
            key: record.record.key,
            value: record.record.value.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        info!(
            consumer_id = %self.consumer_id,
            brokers = %self.config.broker_string(),
            topic = %self.config.topic,
            partitions = ?self.config.partitions,
            "Connecting Kafka consumer"
        );

        let mut builder = ClientBuilder::new(self.config.brokers.clone());

        if let (Some(username), Some(password)) =
            (&self.config.sasl_username, &self.config.sasl_password)
        {
            builder = builder
                .tls_config(create_tls_config())
                .sasl_config(SaslConfig::ScramSha256(Credentials::new(
                    username.clone(),
                    password.clone(),
                )));
        }

        let client = builder
            .build()
            .await
            .map_err(|e| Error::broker(format!("failed to connect: {e}")))?;

        for &partition in &self.config.partitions {
            let tp = TopicPartition::new(self.config.topic.clone(), partition);

            let partition_client = client
                .partition_client(
                    self.config.topic.clone(),
                    partition,
                    UnknownTopicHandling::Retry,
                )
                .await
                .map_err(|e| Error::broker(format!("failed to get partition client: {e}")))?;

            let start = match self.starting_offsets.as_ref().and_then(|m| m.get(&tp)) {
                Some(offset) => offset,
                None => {
                    let at = match self.config.starting_position {
                        StartingPosition::Earliest => OffsetAt::Earliest,
                        StartingPosition::Latest => OffsetAt::Latest,
                    };
                    partition_client
                        .get_offset(at)
                        .await
                        .map_err(|e| Error::broker(format!("failed to resolve offset: {e}")))?
                }
            };

            debug!(
                consumer_id = %self.consumer_id,
                topic_partition = %tp,
                offset = start,
                "Partition assigned"
            );

            self.committed.insert(tp.clone(), start);
            self.poll_order.push_back(tp.clone());
            self.partitions.insert(
                tp,
                PartitionState {
                    client: Arc::new(partition_client),
                    next_fetch: start,
                    buffer: VecDeque::new(),
                },
            );
        }

        self.connected = true;
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<RawRecord>> {
        // One partition is examined per call; the rotation resumes where it
        // left off so an idle partition cannot starve the rest.
        let Some(tp) = self.poll_order.pop_front() else {
            return Ok(None);
        };
        self.poll_order.push_back(tp.clone());

        if self
            .partitions
            .get(&tp)
            .is_some_and(|state| state.buffer.is_empty())
        {
            self.fill_buffer(&tp).await?;
        }

        let record = match self.partitions.get_mut(&tp) {
            Some(state) => state.buffer.pop_front(),
            None => None,
        };

        match record {
            Some(record) => Ok(Some(self.to_raw_record(&tp, record))),
            None => Ok(None),
        }
    }

    async fn commit_offset(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let prev = self.committed.insert(tp.clone(), offset);
        debug!(
            consumer_id = %self.consumer_id,
            topic_partition = %tp,
            prev_offset = prev.unwrap_or(-1),
            new_offset = offset,
            "Committed offset"
        );
        Ok(())
    }

    async fn seek(&mut self, tp: &TopicPartition, offset: i64) -> Result<()> {
        match self.partitions.get_mut(tp) {
            Some(state) => {
                state.next_fetch = offset;
                state.buffer.clear();
                debug!(
                    consumer_id = %self.consumer_id,
                    topic_partition = %tp,
                    offset = offset,
                    "Seek"
                );
            }
            None => {
                warn!(
                    consumer_id = %self.consumer_id,
                    topic_partition = %tp,
                    "Seek requested for unassigned partition"
                );
            }
        }
        Ok(())
    }

    async fn unsubscribe_topic_partition(&mut self, tp: &TopicPartition) -> Result<bool> {
        let removed = self.partitions.remove(tp).is_some();
        if removed {
            self.committed.remove(tp);
            self.poll_order.retain(|other| other != tp);
            info!(
                consumer_id = %self.consumer_id,
                topic_partition = %tp,
                "Unsubscribed partition"
            );
        }
        Ok(removed)
    }

    fn current_state(&self) -> OffsetMap {
        let mut builder = OffsetMap::builder();
        for (tp, offset) in &self.committed {
            if self.partitions.contains_key(tp) {
                builder = builder.with_partition(tp.clone(), *offset);
            }
        }
        builder.build()
    }

    async fn close(&mut self) -> Result<()> {
        self.partitions.clear();
        self.committed.clear();
        self.poll_order.clear();
        self.connected = false;
        info!(consumer_id = %self.consumer_id, "Kafka consumer closed");
        Ok(())
    }
}

/// Factory handing each new virtual spout its own Kafka consumer.
pub struct KafkaConsumerFactory {
    config: KafkaConfig,
}

impl KafkaConsumerFactory {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrokerConsumerFactory for KafkaConsumerFactory {
    async fn create(
        &self,
        consumer_id: &str,
        starting_offsets: Option<OffsetMap>,
    ) -> Result<Box<dyn BrokerConsumer>> {
        Ok(Box::new(KafkaConsumer::new(
            self.config.clone(),
            consumer_id,
            starting_offsets,
        )))
    }
}
