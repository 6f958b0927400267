//! The virtual spout: one bounded, filtered, at-least-once consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use broker::BrokerConsumer;
use parking_lot::RwLock;
use persistence::PersistenceManager;
use spout_core::{
    Deserializer, Error, FilterChain, MessageId, OffsetMap, Result, StreamMessage, TopicPartition,
};
use telemetry::metrics;
use tracing::{debug, info, warn};

/// Lifecycle of a virtual spout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SpoutState {
    Created,
    Open,
    StopRequested,
    Closed,
}

/// Read-only mirror of a spout's committed offsets.
///
/// Refreshed on ack and flush, so collaborators like the sideline handler
/// can snapshot positions without touching the single-owner broker
/// consumer.
#[derive(Debug, Clone, Default)]
pub struct SharedConsumerState {
    inner: Arc<RwLock<OffsetMap>>,
}

impl SharedConsumerState {
    pub fn get(&self) -> OffsetMap {
        self.inner.read().clone()
    }

    fn set(&self, state: OffsetMap) {
        *self.inner.write() = state;
    }
}

/// One logical consumer inside the spout: owns a broker consumer and a
/// filter chain, enforces an optional per-partition ending bound, and
/// tracks emitted messages until the host acks or fails them.
pub struct VirtualSpout {
    consumer_id: String,
    consumer: Box<dyn BrokerConsumer>,
    deserializer: Arc<dyn Deserializer>,
    filter_chain: Arc<FilterChain>,
    persistence: Arc<dyn PersistenceManager>,
    /// Exclusive per-partition upper bound; `None` means unbounded.
    ending_offsets: Option<OffsetMap>,
    /// Emitted ids awaiting ack, with their enqueue time
    in_flight: HashMap<MessageId, Instant>,
    state: SpoutState,
    stop_requested: Arc<AtomicBool>,
    shared_state: SharedConsumerState,
}

impl VirtualSpout {
    pub fn new(
        consumer_id: impl Into<String>,
        consumer: Box<dyn BrokerConsumer>,
        deserializer: Arc<dyn Deserializer>,
        filter_chain: Arc<FilterChain>,
        persistence: Arc<dyn PersistenceManager>,
        ending_offsets: Option<OffsetMap>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            consumer,
            deserializer,
            filter_chain,
            persistence,
            ending_offsets,
            in_flight: HashMap::new(),
            state: SpoutState::Created,
            stop_requested: Arc::new(AtomicBool::new(false)),
            shared_state: SharedConsumerState::default(),
        }
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn filter_chain(&self) -> Arc<FilterChain> {
        self.filter_chain.clone()
    }

    /// The committed-state mirror; safe to hold after the spout moves onto
    /// its worker.
    pub fn state_handle(&self) -> SharedConsumerState {
        self.shared_state.clone()
    }

    /// The stop flag; the coordinator keeps it to request stop after the
    /// spout moves onto its worker.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_requested.clone()
    }

    pub fn state(&self) -> SpoutState {
        if self.state == SpoutState::Open && self.stop_requested.load(Ordering::SeqCst) {
            SpoutState::StopRequested
        } else {
            self.state
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Transitions CREATED → OPEN and connects the broker consumer, exactly
    /// once.
    pub async fn open(&mut self) -> Result<()> {
        if self.state != SpoutState::Created {
            return Err(Error::illegal_state(format!(
                "virtual spout {} is already open",
                self.consumer_id
            )));
        }
        self.consumer.connect().await?;
        self.state = SpoutState::Open;
        self.shared_state.set(self.consumer.current_state());
        info!(consumer_id = %self.consumer_id, "Virtual spout opened");
        Ok(())
    }

    /// Produces zero or one message.
    ///
    /// A record is silently dropped when the deserializer rejects it, when
    /// the filter chain matches, or when it reaches the ending bound (which
    /// also unsubscribes its partition). Dropped records are not committed;
    /// the group position advances when a later offset on the partition is
    /// acked.
    pub async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        match self.state() {
            SpoutState::Created | SpoutState::Closed => {
                return Err(Error::illegal_state(format!(
                    "virtual spout {} is not open",
                    self.consumer_id
                )));
            }
            SpoutState::Open | SpoutState::StopRequested => {}
        }

        let Some(record) = self.consumer.next_record().await? else {
            return Ok(None);
        };

        let Some(values) = self.deserializer.deserialize(&record) else {
            metrics().records_skipped_deserialize.inc();
            debug!(
                consumer_id = %self.consumer_id,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Record not deserializable; dropped"
            );
            return Ok(None);
        };

        let id = MessageId::new(
            record.topic.clone(),
            record.partition,
            record.offset,
            self.consumer_id.clone(),
        );
        let tp = id.topic_partition();

        if self.exceeds_ending_offset(&tp, record.offset)? {
            metrics().ending_bound_skips.inc();
            self.consumer.unsubscribe_topic_partition(&tp).await?;
            self.check_finished();
            return Ok(None);
        }

        if self.filter_chain.evaluate(&record) {
            metrics().records_filtered.inc();
            return Ok(None);
        }

        self.in_flight.insert(id.clone(), Instant::now());
        metrics().in_flight.inc();
        metrics().messages_emitted.inc();
        Ok(Some(StreamMessage::new(id, values)))
    }

    /// Commits the identified offset and releases the in-flight entry.
    /// `None` is silently ignored.
    pub async fn ack(&mut self, id: Option<MessageId>) -> Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        self.consumer
            .commit_offset(&id.topic_partition(), id.offset())
            .await?;
        if self.in_flight.remove(&id).is_some() {
            metrics().in_flight.dec();
        }
        metrics().messages_acked.inc();
        self.shared_state.set(self.consumer.current_state());
        Ok(())
    }

    /// Releases the in-flight entry and rewinds the broker consumer so the
    /// record is delivered again on a later poll.
    pub async fn fail(&mut self, id: Option<MessageId>) -> Result<()> {
        let Some(id) = id else {
            return Ok(());
        };
        warn!(
            consumer_id = %self.consumer_id,
            topic = %id.topic(),
            partition = id.partition(),
            offset = id.offset(),
            "Message failed; rewinding for redelivery"
        );
        if self.in_flight.remove(&id).is_some() {
            metrics().in_flight.dec();
        }
        metrics().messages_failed.inc();
        self.consumer.seek(&id.topic_partition(), id.offset()).await?;
        Ok(())
    }

    /// Persists the current offset map under this consumer id.
    pub async fn flush_state(&mut self) -> Result<()> {
        let state = self.consumer.current_state();
        self.persistence
            .persist_consumer_state(&self.consumer_id, &state)
            .await?;
        self.shared_state.set(state);
        metrics().state_flushes.inc();
        debug!(consumer_id = %self.consumer_id, "Flushed consumer state");
        Ok(())
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// True once an ending bound was declared and every bounded partition
    /// has been unsubscribed, or stop was requested externally.
    pub fn is_finished(&self) -> bool {
        self.state() >= SpoutState::StopRequested
    }

    /// Terminates the spout.
    ///
    /// A bounded spout that drained to its ending offsets no longer needs
    /// its persisted state; any other spout flushes its final positions.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            SpoutState::Closed => return Ok(()),
            SpoutState::Created => {
                self.state = SpoutState::Closed;
                return Ok(());
            }
            _ => {}
        }

        if self.has_drained() {
            if let Err(e) = self
                .persistence
                .clear_consumer_state(&self.consumer_id)
                .await
            {
                warn!(
                    consumer_id = %self.consumer_id,
                    error = %e,
                    "Failed to clear state of drained spout"
                );
            }
        } else if let Err(e) = self.flush_state().await {
            warn!(
                consumer_id = %self.consumer_id,
                error = %e,
                "Failed to flush state on close"
            );
        }

        self.consumer.close().await?;
        self.request_stop();
        self.state = SpoutState::Closed;
        info!(consumer_id = %self.consumer_id, "Virtual spout closed");
        Ok(())
    }

    /// Whether a configured ending bound excludes `offset`. The bound is
    /// exclusive; a partition missing from a configured bound is an
    /// inconsistent configuration.
    fn exceeds_ending_offset(&self, tp: &TopicPartition, offset: i64) -> Result<bool> {
        let Some(bounds) = &self.ending_offsets else {
            return Ok(false);
        };
        let Some(end) = bounds.get(tp) else {
            return Err(Error::illegal_state(format!(
                "no ending offset declared for {tp}"
            )));
        };
        Ok(offset >= end)
    }

    /// True when every partition in the ending-offset scope has been
    /// unsubscribed.
    fn has_drained(&self) -> bool {
        let Some(bounds) = &self.ending_offsets else {
            return false;
        };
        let assigned = self.consumer.current_state();
        bounds.partitions().all(|tp| !assigned.has(tp))
    }

    fn check_finished(&mut self) {
        if self.has_drained() {
            info!(
                consumer_id = %self.consumer_id,
                "All bounded partitions drained; requesting stop"
            );
            self.request_stop();
        }
    }
}
